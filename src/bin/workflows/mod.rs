mod assemble;
mod board;
mod kernel;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use kernel_packager::{BoardConfig, Make, Registry, Settings, Toolchain};

pub(crate) use assemble::{assemble, AssembleArgs};
pub(crate) use board::{list_boards, power, print_env, print_section};
pub(crate) use kernel::{configure, print_kernel_config, run_make, CfgArgs, ConfigArgs, MakeArgs, TreeArgs};

/// Settings plus the loaded boards file.
pub(crate) struct Context {
    pub(crate) settings: Settings,
    pub(crate) registry: Registry,
}

/// Source and build directories of one run, both existing.
pub(crate) struct Tree {
    pub(crate) source: PathBuf,
    pub(crate) build: PathBuf,
}

impl Context {
    pub(crate) fn load(settings_path: Option<&Path>, boards_file: Option<&Path>) -> Result<Self> {
        let settings = Settings::load(settings_path).context("loading settings")?;
        let (boards_file, vars) = settings.boards_source(boards_file);
        let registry = Registry::load(&boards_file, &vars)
            .with_context(|| format!("loading boards file '{}'", boards_file.display()))?;
        Ok(Self { settings, registry })
    }

    pub(crate) fn board(&self, name: &str) -> Result<&BoardConfig> {
        Ok(self.registry.lookup(name)?)
    }

    /// `--source` defaults to the current directory and `--build` to
    /// `<build_root>/<board>/kernel`, which is created.
    pub(crate) fn tree(&self, board: &BoardConfig, args: &TreeArgs) -> Result<Tree> {
        let source = match &args.source {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("resolving current directory")?,
        };
        let build = args
            .build
            .clone()
            .unwrap_or_else(|| self.settings.board_build_dir(&board.name));
        std::fs::create_dir_all(&build)
            .with_context(|| format!("creating build directory '{}'", build.display()))?;
        Ok(Tree { source, build })
    }

    pub(crate) fn make(
        &self,
        tree: &Tree,
        toolchain: Toolchain,
        timeout_secs: Option<u64>,
    ) -> Make {
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .or(self.settings.timeout);
        let make = Make::new(&tree.source, &tree.build, toolchain)
            .program(self.settings.make.clone())
            .timeout(timeout);
        match self.settings.jobs {
            Some(jobs) => make.jobs(jobs),
            None => make,
        }
    }
}
