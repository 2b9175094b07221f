//! Cross-compile a Linux kernel for a named board and stage it as an
//! Arch-style package.
//!
//! - **Board registry** - [`board::Registry`] parses the sectioned boards file
//! - **Build tool** - [`toolchain::Make`] drives the kernel build behind the
//!   [`toolchain::BuildTool`] trait
//! - **Package assembly** - [`package::assemble`] runs the numbered stages and
//!   fills the staging tree
//! - **Host checks** - [`preflight`] validates tools before the first stage
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_packager::board::Registry;
//! use kernel_packager::package::{assemble, AssembleOptions};
//! use kernel_packager::settings::Settings;
//! use kernel_packager::toolchain::{Make, Toolchain};
//!
//! let settings = Settings::load(None)?;
//! let registry = Registry::load(&settings.boards_file(), &settings.variables())?;
//! let board = registry.lookup("rk3399_arm64")?;
//!
//! let options = AssembleOptions::new(&source, &build, &staging);
//! let make = Make::new(&source, &build, Toolchain::for_board(board)?);
//! let result = assemble(board, &options, &make)?;
//! println!("{} {}", result.pkgbase, result.kernel_release);
//! ```

pub mod board;
pub mod error;
pub mod logging;
pub mod package;
pub mod power;
pub mod preflight;
pub mod process;
pub mod settings;
pub mod toolchain;

pub use board::{Arch, BoardConfig, Registry, Variables};
pub use error::{BuildError, ConfigError, PackageError, ToolError};
pub use package::{assemble, configure, AssembleOptions, PackageResult, Stage};
pub use settings::Settings;
pub use toolchain::{BuildTool, Invocation, Make, Toolchain};
