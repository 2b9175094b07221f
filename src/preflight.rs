//! Preflight checks run before the first stage.
//!
//! Validates that the host has the build tool and the board's cross
//! compiler, and that the kernel source looks like a kernel tree.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::toolchain::Toolchain;

/// Host tools every kernel build needs, as (command, package).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("make", "make"),
    ("bc", "bc"),
    ("flex", "flex"),
    ("bison", "bison"),
    ("perl", "perl"),
];

/// Locate `cmd`, either as a path or on `PATH`.
pub fn find_command(cmd: &Path) -> Option<PathBuf> {
    if cmd.components().count() > 1 {
        return cmd.is_file().then(|| cmd.to_path_buf());
    }
    which::which(cmd).ok()
}

pub fn command_exists(cmd: &str) -> bool {
    find_command(Path::new(cmd)).is_some()
}

/// Check that specific tools are available.
///
/// Reports every missing tool with the package that provides it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Everything a board build needs from the host.
///
/// `make_program` replaces `make` in [`REQUIRED_TOOLS`] when it was
/// overridden in the settings.
pub fn check_board_host(toolchain: &Toolchain, make_program: &str, source_dir: &Path) -> Result<()> {
    let tools: Vec<(&str, &str)> = REQUIRED_TOOLS
        .iter()
        .map(|&(cmd, pkg)| if cmd == "make" { (make_program, pkg) } else { (cmd, pkg) })
        .collect();
    check_required_tools(&tools)?;

    let compiler = toolchain.compiler();
    let found = match &toolchain.path_prefix {
        Some(_) => compiler.is_file().then(|| compiler.clone()),
        None => find_command(&compiler),
    };
    match found {
        Some(path) => log::debug!("using compiler {}", path.display()),
        None => bail!(
            "cross compiler '{}' not found (check 'cc' and 'cc_path' for this board)",
            compiler.display()
        ),
    }

    check_kernel_source(source_dir)
}

/// A kernel tree has a top-level `Makefile` and `Kconfig`.
pub fn check_kernel_source(source_dir: &Path) -> Result<()> {
    for name in ["Makefile", "Kconfig"] {
        if !source_dir.join(name).is_file() {
            bail!(
                "'{}' does not look like a kernel source tree (no {})",
                source_dir.display(),
                name
            );
        }
    }
    Ok(())
}
