//! Cross-toolchain environment and the external build tool seam.
//!
//! The assembler never spawns processes itself. It describes each call as an
//! [`Invocation`] and hands it to a [`BuildTool`]. [`Make`] is the real
//! implementation; tests plug in a recorder.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::{Arch, BoardConfig};
use crate::error::{ConfigError, ToolError};
use crate::process::Cmd;

/// Toolchain settings derived from a board entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub arch: Arch,
    pub cross_compile: Option<String>,
    pub path_prefix: Option<PathBuf>,
}

impl Toolchain {
    pub fn for_board(board: &BoardConfig) -> Result<Self, ConfigError> {
        let arch = board.arch().ok_or_else(|| ConfigError::InvalidValue {
            section: board.name.clone(),
            key: "[section]".to_string(),
            line: board.line(),
            message: "cannot infer architecture; expected a name like '<board>_arm64'"
                .to_string(),
        })?;

        // Native x86 builds use the host compiler.
        if arch.is_x86() {
            return Ok(Self {
                arch,
                cross_compile: None,
                path_prefix: None,
            });
        }

        Ok(Self {
            arch,
            cross_compile: board.cross_compiler_prefix.clone(),
            path_prefix: board.cross_compiler_path.clone(),
        })
    }

    /// `KEY=VALUE` arguments every make call gets.
    pub fn make_vars(&self) -> Vec<String> {
        let mut vars = vec![format!("ARCH={}", self.arch.make_arch())];
        if let Some(prefix) = &self.cross_compile {
            vars.push(format!("CROSS_COMPILE={prefix}"));
        }
        vars
    }

    /// Environment overrides for the child process.
    pub fn env(&self) -> Vec<(OsString, OsString)> {
        let mut env = Vec::new();
        if let Some(prefix) = &self.cross_compile {
            env.push((OsString::from("CROSS_COMPILE"), OsString::from(prefix)));
        }
        if let Some(dir) = &self.path_prefix {
            env.push((OsString::from("PATH"), prepend_path(dir)));
        }
        env
    }

    /// Full path (or bare name) of the C compiler this toolchain uses.
    pub fn compiler(&self) -> PathBuf {
        let gcc = format!("{}gcc", self.cross_compile.as_deref().unwrap_or(""));
        match &self.path_prefix {
            Some(dir) => dir.join(gcc),
            None => PathBuf::from(gcc),
        }
    }
}

fn prepend_path(dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// One call of the external build tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Flags and `KEY=VALUE` overrides, in order.
    pub args: Vec<String>,
    pub targets: Vec<String>,
    /// Capture stdout instead of streaming it.
    pub capture: bool,
    /// Hand the terminal to the tool (menuconfig and friends). Never timed out.
    pub terminal: bool,
}

impl Invocation {
    pub fn target(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            ..Self::default()
        }
    }

    pub fn targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Free-form words from the command line: flags and `KEY=VALUE`
    /// overrides become arguments, everything else a target. The tool gets
    /// the terminal.
    pub fn passthrough<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (args, targets): (Vec<String>, Vec<String>) = words
            .into_iter()
            .map(Into::into)
            .partition(|w: &String| w.starts_with('-') || w.contains('='));
        Self {
            args,
            targets,
            capture: false,
            terminal: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn var(self, key: &str, value: impl AsRef<Path>) -> Self {
        let value = value.as_ref().display().to_string();
        self.arg(format!("{key}={value}"))
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

/// The external kernel build tool.
pub trait BuildTool {
    /// Run one invocation. Returns captured stdout, or an empty string when
    /// output was streamed.
    fn invoke(&self, invocation: &Invocation) -> Result<String, ToolError>;
}

/// `make -C <source> O=<build>` with the board's toolchain.
#[derive(Debug, Clone)]
pub struct Make {
    program: String,
    source_dir: PathBuf,
    build_dir: PathBuf,
    toolchain: Toolchain,
    jobs: usize,
    timeout: Option<Duration>,
}

impl Make {
    pub fn new(source_dir: &Path, build_dir: &Path, toolchain: Toolchain) -> Self {
        let jobs = match std::thread::available_parallelism() {
            Ok(n) => n.get(),
            Err(e) => {
                log::warn!("could not detect CPU count ({e}), using 4 jobs");
                4
            }
        };
        Self {
            program: "make".to_string(),
            source_dir: source_dir.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            toolchain,
            jobs,
            timeout: None,
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn command(&self, invocation: &Invocation) -> Cmd {
        let mut cmd = Cmd::new(&self.program)
            .arg("-C")
            .arg(&self.source_dir)
            .timeout(self.timeout);
        if self.build_dir != self.source_dir {
            cmd = cmd.arg(format!("O={}", self.build_dir.display()));
        }
        cmd = cmd
            .args(self.toolchain.make_vars())
            .arg(format!("-j{}", self.jobs))
            .args(&invocation.args)
            .args(&invocation.targets);
        for (key, value) in self.toolchain.env() {
            cmd = cmd.env(key, value);
        }
        cmd
    }
}

impl BuildTool for Make {
    fn invoke(&self, invocation: &Invocation) -> Result<String, ToolError> {
        let cmd = self.command(invocation);
        if invocation.terminal {
            cmd.run_terminal().map(|()| String::new())
        } else if invocation.capture {
            cmd.run_captured()
        } else {
            cmd.run_interactive().map(|()| String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Registry, Variables};

    fn board(section: &str) -> BoardConfig {
        let vars = Variables::new(Path::new("/srv/boards"));
        let reg = Registry::parse(section, Path::new("boards_config"), &vars).unwrap();
        reg.boards()[0].clone()
    }

    #[test]
    fn arm_board_gets_cross_environment() {
        let b = board(
            "[rk3399_arm64]\ncc = aarch64-linux-gnu-\ncc_path = /opt/cross/bin\n\
             kernel_target = Image\nkernel_file = Image\n",
        );
        let tc = Toolchain::for_board(&b).unwrap();
        assert_eq!(tc.make_vars(), ["ARCH=arm64", "CROSS_COMPILE=aarch64-linux-gnu-"]);
        assert_eq!(tc.compiler(), PathBuf::from("/opt/cross/bin/aarch64-linux-gnu-gcc"));

        let env = tc.env();
        assert!(env
            .iter()
            .any(|(k, v)| k == "CROSS_COMPILE" && v == "aarch64-linux-gnu-"));
        let path = env.iter().find(|(k, _)| k == "PATH").unwrap();
        let first = std::env::split_paths(&path.1).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/cross/bin"));
    }

    #[test]
    fn x86_board_ignores_cross_settings() {
        let b = board("[pc_x86_64]\ncc = foo-\nkernel_target = bzImage\nkernel_file = vmlinuz\n");
        let tc = Toolchain::for_board(&b).unwrap();
        assert_eq!(tc.cross_compile, None);
        assert!(tc.env().is_empty());
        assert_eq!(tc.make_vars(), ["ARCH=x86_64"]);
    }

    #[test]
    fn unknown_arch_is_config_error() {
        let b = board("[mystery]\nkernel_target = Image\nkernel_file = Image\n");
        assert!(matches!(
            Toolchain::for_board(&b),
            Err(ConfigError::InvalidValue { line: 1, .. })
        ));
    }

    #[test]
    fn make_command_line() {
        let tc = Toolchain {
            arch: Arch::Arm64,
            cross_compile: Some("aarch64-linux-gnu-".to_string()),
            path_prefix: None,
        };
        let make = Make::new(Path::new("/src/linux"), Path::new("/build/k"), tc).jobs(8);
        let inv = Invocation::target("dtbs_install").var("INSTALL_DTBS_PATH", "/stage/boot/dtbs");
        assert_eq!(
            make.command(&inv).display(),
            "make -C /src/linux O=/build/k ARCH=arm64 CROSS_COMPILE=aarch64-linux-gnu- -j8 \
             INSTALL_DTBS_PATH=/stage/boot/dtbs dtbs_install"
        );
    }

    #[test]
    fn in_tree_build_omits_output_dir() {
        let tc = Toolchain {
            arch: Arch::X86_64,
            cross_compile: None,
            path_prefix: None,
        };
        let make = Make::new(Path::new("/src/linux"), Path::new("/src/linux"), tc).jobs(2);
        let inv = Invocation::target("kernelrelease").arg("-s").captured();
        assert_eq!(
            make.command(&inv).display(),
            "make -C /src/linux ARCH=x86_64 -j2 -s kernelrelease"
        );
    }

    #[test]
    fn passthrough_words_split_into_args_and_targets() {
        let inv = Invocation::passthrough(["LOCALVERSION=-rc", "-k", "headers_install", "dtbs"]);
        assert_eq!(inv.args, ["LOCALVERSION=-rc", "-k"]);
        assert_eq!(inv.targets, ["headers_install", "dtbs"]);
        assert!(!inv.capture);
        assert!(inv.terminal);
    }

    #[test]
    fn make_runs_through_fake_program() {
        let temp = tempfile::tempdir().unwrap();
        let fake = temp.path().join("fake-make");
        std::fs::write(&fake, "#!/bin/sh\necho \"$CROSS_COMPILE|$*\"\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let tc = Toolchain {
            arch: Arch::Arm,
            cross_compile: Some("arm-none-".to_string()),
            path_prefix: None,
        };
        let make = Make::new(temp.path(), temp.path(), tc)
            .program(fake.display().to_string())
            .jobs(1);
        let out = make
            .invoke(&Invocation::target("kernelrelease").captured())
            .unwrap();
        assert!(out.starts_with("arm-none-|-C "));
        assert!(out.trim_end().ends_with("ARCH=arm CROSS_COMPILE=arm-none- -j1 kernelrelease"));
    }
}
