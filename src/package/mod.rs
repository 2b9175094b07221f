//! Package assembly.
//!
//! [`assemble`] drives the kernel build for one board and lays out the
//! package staging tree:
//!
//! ```text
//! <staging>/
//!     boot/<kernel_file>
//!     boot/<dtb_path>/...                  (optional)
//!     etc/mkinitcpio.d/<pkgbase>.preset
//!     usr/lib/modules/<release>/{vmlinuz,pkgbase,kernel/...}
//!     usr/share/libalpm/hooks/{60,90}-<pkgbase>.hook
//! ```
//!
//! Stages run in order and the first failure aborts the rest. Nothing is
//! rolled back, so a failed run can leave a partly populated staging tree.

mod archive;
mod install;
mod permissions;
pub mod templates;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::board::{Arch, BoardConfig, KernelConfigSource};
use crate::error::{BuildError, ConfigError, PackageError, ToolError};
use crate::toolchain::{BuildTool, Invocation};
use install::IoFailure;
use templates::TEMPLATES;

/// Package base name used when the caller does not pick one.
pub const DEFAULT_PKGBASE: &str = "linux-devel";

/// The numbered assembly stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configure = 1,
    Build = 2,
    ResolveVersion = 3,
    InstallBootImage = 4,
    InstallDeviceTrees = 5,
    ModuleTreeImage = 6,
    InstallModules = 7,
    Templates = 8,
    Permissions = 9,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Configure,
        Stage::Build,
        Stage::ResolveVersion,
        Stage::InstallBootImage,
        Stage::InstallDeviceTrees,
        Stage::ModuleTreeImage,
        Stage::InstallModules,
        Stage::Templates,
        Stage::Permissions,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::ResolveVersion => "resolve version",
            Stage::InstallBootImage => "install boot image",
            Stage::InstallDeviceTrees => "install device trees",
            Stage::ModuleTreeImage => "module tree boot image",
            Stage::InstallModules => "install modules",
            Stage::Templates => "templates",
            Stage::Permissions => "normalize permissions",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.name())
    }
}

/// Directories and knobs for one assembly run.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub pkgbase: String,
    /// Extra flags passed to the build step only.
    pub make_flags: Vec<String>,
}

impl AssembleOptions {
    pub fn new(source_dir: &Path, build_dir: &Path, staging_dir: &Path) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            staging_dir: staging_dir.to_path_buf(),
            pkgbase: DEFAULT_PKGBASE.to_string(),
            make_flags: Vec::new(),
        }
    }

    pub fn pkgbase(mut self, pkgbase: impl Into<String>) -> Self {
        self.pkgbase = pkgbase.into();
        self
    }

    pub fn make_flags(mut self, flags: Vec<String>) -> Self {
        self.make_flags = flags;
        self
    }
}

/// What a successful assembly produced.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub board: String,
    pub pkgbase: String,
    pub kernel_release: String,
    pub staging_dir: PathBuf,
    pub boot_image: PathBuf,
    pub boot_image_sha256: String,
    pub dtb_dir: Option<PathBuf>,
    pub modules_dir: PathBuf,
    pub module_count: usize,
    /// `update_ramfs` with `$ramfs_file` and `$version` filled in.
    pub initramfs_command: Option<String>,
    /// Stages that actually ran, in order.
    pub stages: Vec<Stage>,
    pub archive: Option<PathBuf>,
}

impl PackageResult {
    pub fn ran(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Write the staging tree to a `.tar.zst` and remember where it went.
    pub fn write_archive(&mut self, out_path: &Path) -> Result<(), PackageError> {
        log::info!("writing archive {}", out_path.display());
        archive::create_tar_zst(&self.staging_dir, out_path).map_err(|e| {
            PackageError::Archive {
                path: e.path,
                source: e.source,
            }
        })?;
        self.archive = Some(out_path.to_path_buf());
        Ok(())
    }
}

/// Build and stage the kernel package for `board`.
///
/// Configuration problems are reported before `tool` is invoked for the
/// first time.
pub fn assemble(
    board: &BoardConfig,
    options: &AssembleOptions,
    tool: &dyn BuildTool,
) -> Result<PackageResult, PackageError> {
    let arch = validate(board)?;
    let mut run = Assembly {
        board,
        options,
        tool,
        arch,
        stages: Vec::new(),
    };
    log::info!(
        "assembling '{}' ({arch}) into {}",
        board.name,
        options.staging_dir.display()
    );

    if run.board.config_source().is_some() {
        run.configure()?;
    }
    run.build()?;
    let release = run.resolve_version()?;
    let boot_image = run.install_boot_image()?;
    let dtb_dir = if board.dtb_path.is_some() || board.vendor.is_some() {
        Some(run.install_device_trees()?)
    } else {
        log::info!("no dtb_path or vendor configured; skipping device trees");
        None
    };
    let modules_dir = run.module_tree_image(&boot_image, &release)?;
    run.install_modules(&modules_dir)?;
    run.install_templates(&release)?;
    run.normalize_permissions()?;

    let boot_image_sha256 = checksum(&board.name, &boot_image)?;
    let module_count = install::count_modules(&modules_dir);
    log::info!(
        "packaged {} {release}: {module_count} modules, boot image sha256 {boot_image_sha256}",
        options.pkgbase
    );

    Ok(PackageResult {
        board: board.name.clone(),
        pkgbase: options.pkgbase.clone(),
        initramfs_command: board.render_update_ramfs(&release),
        kernel_release: release,
        staging_dir: options.staging_dir.clone(),
        boot_image,
        boot_image_sha256,
        dtb_dir,
        modules_dir,
        module_count,
        stages: run.stages,
        archive: None,
    })
}

/// Run only the configure stage, leaving `.config` in the build directory.
///
/// Returns `false` when the board names no kernel config and nothing ran.
pub fn configure(
    board: &BoardConfig,
    options: &AssembleOptions,
    tool: &dyn BuildTool,
) -> Result<bool, PackageError> {
    let arch = validate_kernel_config(board)?;
    if board.config_source().is_none() {
        log::warn!("board '{}' sets neither config_file nor config_target", board.name);
        return Ok(false);
    }
    let mut run = Assembly {
        board,
        options,
        tool,
        arch,
        stages: Vec::new(),
    };
    run.configure()?;
    Ok(true)
}

fn checksum(board: &str, boot_image: &Path) -> Result<String, PackageError> {
    install::sha256_file(boot_image).map_err(|e| PackageError::Finalize {
        board: board.to_string(),
        path: e.path,
        source: e.source,
    })
}

/// Checks that need no external tool.
fn validate(board: &BoardConfig) -> Result<Arch, ConfigError> {
    let arch = validate_kernel_config(board)?;

    let pkg_folder = board
        .pkg_folder
        .as_deref()
        .ok_or_else(|| ConfigError::MissingKey {
            section: board.name.clone(),
            key: "pkg_folder".to_string(),
        })?;
    for template in &TEMPLATES {
        let path = template.source_path(pkg_folder);
        if !path.is_file() {
            return Err(ConfigError::MissingFile {
                board: board.name.clone(),
                what: "package template",
                path,
            });
        }
    }
    Ok(arch)
}

/// The architecture is known and a `config_file`, if named, exists.
fn validate_kernel_config(board: &BoardConfig) -> Result<Arch, ConfigError> {
    let arch = crate::toolchain::Toolchain::for_board(board)?.arch;
    if let Some(KernelConfigSource::File(path)) = board.config_source() {
        if !path.is_file() {
            return Err(ConfigError::MissingFile {
                board: board.name.clone(),
                what: "kernel config file",
                path: path.to_path_buf(),
            });
        }
    }

    Ok(arch)
}

struct Assembly<'a> {
    board: &'a BoardConfig,
    options: &'a AssembleOptions,
    tool: &'a dyn BuildTool,
    arch: Arch,
    stages: Vec<Stage>,
}

impl Assembly<'_> {
    fn begin(&mut self, stage: Stage) {
        log::info!("[{}] {stage}", self.board.name);
        self.stages.push(stage);
    }

    fn run_tool(&self, stage: Stage, invocation: Invocation) -> Result<String, PackageError> {
        self.tool
            .invoke(&invocation)
            .map_err(|source| self.failed(stage, source))
    }

    fn failed(&self, stage: Stage, source: ToolError) -> PackageError {
        PackageError::Build(BuildError {
            board: self.board.name.clone(),
            stage,
            source,
        })
    }

    fn io(&self, stage: Stage, failure: IoFailure) -> PackageError {
        PackageError::Io {
            board: self.board.name.clone(),
            stage,
            path: failure.path,
            source: failure.source,
        }
    }

    fn staging(&self) -> &Path {
        &self.options.staging_dir
    }

    fn boot_dts_dir(&self) -> PathBuf {
        self.options
            .build_dir
            .join("arch")
            .join(self.arch.kernel_dir())
            .join("boot/dts")
    }

    fn configure(&mut self) -> Result<(), PackageError> {
        self.begin(Stage::Configure);
        match self.board.config_source() {
            Some(KernelConfigSource::Target(target)) => {
                log::info!("kernel config using target {target}");
                self.run_tool(Stage::Configure, Invocation::target(target))?;
            }
            Some(KernelConfigSource::File(path)) => {
                log::info!("kernel config using {}", path.display());
                let dot_config = self.options.build_dir.join(".config");
                install::copy_file(path, &dot_config).map_err(|e| self.io(Stage::Configure, e))?;
                self.run_tool(Stage::Configure, Invocation::target("olddefconfig"))?;
            }
            None => {}
        }
        Ok(())
    }

    fn build(&mut self) -> Result<(), PackageError> {
        self.begin(Stage::Build);
        let mut targets = vec![self.board.kernel_target.clone(), "modules".to_string()];
        if self.board.wants_dtbs() {
            targets.push("dtbs".to_string());
        }
        let mut invocation = Invocation::targets(targets);
        invocation.args = self.options.make_flags.clone();
        self.run_tool(Stage::Build, invocation)?;
        Ok(())
    }

    fn resolve_version(&mut self) -> Result<String, PackageError> {
        self.begin(Stage::ResolveVersion);
        let stdout = self.run_tool(
            Stage::ResolveVersion,
            Invocation::target("kernelrelease")
                .arg("-s")
                .arg("--no-print-directory")
                .captured(),
        )?;
        let release = parse_kernel_release(&stdout)
            .map_err(|e| self.failed(Stage::ResolveVersion, e))?;
        log::info!("kernel version: {release}");
        Ok(release)
    }

    fn install_boot_image(&mut self) -> Result<PathBuf, PackageError> {
        self.begin(Stage::InstallBootImage);
        let artifact = self
            .options
            .build_dir
            .join("arch")
            .join(self.arch.kernel_dir())
            .join("boot")
            .join(&self.board.kernel_target);
        if !artifact.is_file() {
            return Err(self.failed(
                Stage::InstallBootImage,
                ToolError::MissingArtifact(artifact),
            ));
        }
        let dest = self.staging().join("boot").join(&self.board.kernel_file);
        install::copy_file(&artifact, &dest)
            .map_err(|e| self.io(Stage::InstallBootImage, e))?;
        log::info!("installed /boot/{}", self.board.kernel_file);
        Ok(dest)
    }

    fn install_device_trees(&mut self) -> Result<PathBuf, PackageError> {
        const STAGE: Stage = Stage::InstallDeviceTrees;
        self.begin(STAGE);
        let boot = self.staging().join("boot");
        let dts = self.boot_dts_dir();

        let dest = if let Some(vendor) = &self.board.vendor {
            let dest = boot.join(self.board.dtb_path.as_deref().unwrap_or(Path::new(vendor)));
            let src = dts.join(vendor);
            if !src.is_dir() {
                return Err(self.failed(STAGE, ToolError::MissingArtifact(src)));
            }
            log::info!("copying vendor device trees {} -> {}", src.display(), dest.display());
            install::copy_dir_recursive(&src, &dest).map_err(|e| self.io(STAGE, e))?;
            dest
        } else {
            let dtb_path = self.board.dtb_path.as_deref().unwrap_or(Path::new(""));
            let dest = boot.join(dtb_path);
            install::create_dir(&dest).map_err(|e| self.io(STAGE, e))?;
            self.run_tool(
                STAGE,
                Invocation::target("dtbs_install").var("INSTALL_DTBS_PATH", &dest),
            )?;
            dest
        };

        if let Some(overlay_path) = &self.board.overlay_path {
            let src = dts.join("overlays");
            if !src.is_dir() {
                return Err(self.failed(STAGE, ToolError::MissingArtifact(src)));
            }
            install::copy_dir_recursive(&src, &boot.join(overlay_path))
                .map_err(|e| self.io(STAGE, e))?;
        }
        Ok(dest)
    }

    fn module_tree_image(&mut self, boot_image: &Path, release: &str) -> Result<PathBuf, PackageError> {
        const STAGE: Stage = Stage::ModuleTreeImage;
        self.begin(STAGE);
        let modules_dir = self.staging().join("usr/lib/modules").join(release);
        // systemd-hibernate looks for the kernel next to its modules.
        install::copy_file(boot_image, &modules_dir.join("vmlinuz"))
            .map_err(|e| self.io(STAGE, e))?;
        install::write_file(
            &modules_dir.join("pkgbase"),
            &format!("{}\n", self.options.pkgbase),
        )
        .map_err(|e| self.io(STAGE, e))?;
        Ok(modules_dir)
    }

    fn install_modules(&mut self, modules_dir: &Path) -> Result<(), PackageError> {
        const STAGE: Stage = Stage::InstallModules;
        self.begin(STAGE);
        let mod_root = self.staging().join("usr");
        self.run_tool(
            STAGE,
            Invocation::target("modules_install")
                .var("INSTALL_MOD_PATH", &mod_root)
                .arg("INSTALL_MOD_STRIP=1"),
        )?;
        // These point back into the build machine's tree.
        for removed in install::remove_module_links(modules_dir).map_err(|e| self.io(STAGE, e))? {
            log::debug!("removed {}/{removed}", modules_dir.display());
        }
        Ok(())
    }

    fn install_templates(&mut self, release: &str) -> Result<(), PackageError> {
        const STAGE: Stage = Stage::Templates;
        self.begin(STAGE);
        // Presence was checked in validate().
        let pkg_folder = self.board.pkg_folder.as_deref().unwrap_or(Path::new(""));
        for template in &TEMPLATES {
            let src = template.source_path(pkg_folder);
            let text = fs::read_to_string(&src).map_err(|source| {
                self.io(STAGE, IoFailure { path: src.clone(), source })
            })?;
            let dest = self.staging().join(template.destination(&self.options.pkgbase));
            let rendered = template.render(&text, &self.options.pkgbase, release);
            install::write_file(&dest, &rendered).map_err(|e| self.io(STAGE, e))?;
        }
        Ok(())
    }

    fn normalize_permissions(&mut self) -> Result<(), PackageError> {
        const STAGE: Stage = Stage::Permissions;
        self.begin(STAGE);
        let changed = permissions::normalize_permissions(self.staging())
            .map_err(|e| self.io(STAGE, e))?;
        log::debug!("adjusted permissions on {changed} entries");
        Ok(())
    }
}

/// The release must be exactly one non-empty line, usable as a single
/// directory name under `usr/lib/modules`.
fn parse_kernel_release(stdout: &str) -> Result<String, ToolError> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(release), None) if release.contains('/') || release == "." || release == ".." => {
            Err(ToolError::MalformedOutput(format!(
                "kernelrelease is not a plain directory name: {release:?}"
            )))
        }
        (Some(release), None) => Ok(release.to_string()),
        (None, _) => Err(ToolError::MalformedOutput(
            "kernelrelease printed nothing".to_string(),
        )),
        (Some(_), Some(_)) => Err(ToolError::MalformedOutput(format!(
            "kernelrelease printed more than one line: {:?}",
            stdout.trim()
        ))),
    }
}
