use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use kernel_packager::package::{configure as configure_kernel, AssembleOptions};
use kernel_packager::{BuildTool, Invocation, Toolchain};

use super::Context;

#[derive(Args)]
pub(crate) struct TreeArgs {
    /// Kernel source tree (default: current directory)
    #[arg(long)]
    pub(crate) source: Option<PathBuf>,

    /// Build output directory (default: <build_root>/<board>/kernel)
    #[arg(long)]
    pub(crate) build: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct ConfigArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Kill the make call if it runs longer than this
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args)]
pub(crate) struct CfgArgs {
    /// Build output directory (default: <build_root>/<board>/kernel)
    #[arg(long)]
    build: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct MakeArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Targets and KEY=VALUE overrides, after `--`
    #[arg(last = true, required = true, value_name = "WORDS")]
    words: Vec<String>,
}

pub(crate) fn configure(ctx: &Context, name: &str, args: &ConfigArgs) -> Result<()> {
    let board = ctx.board(name)?;
    let tree = ctx.tree(board, &args.tree)?;
    let make = ctx.make(&tree, Toolchain::for_board(board)?, args.timeout);
    let options = AssembleOptions::new(
        &tree.source,
        &tree.build,
        &ctx.settings.board_staging_dir(&board.name),
    );

    if configure_kernel(board, &options, &make)? {
        println!(
            "[{}] configured {}",
            board.name,
            tree.build.join(".config").display()
        );
    } else {
        println!("[{}] no kernel config set; nothing to do", board.name);
    }
    Ok(())
}

pub(crate) fn print_kernel_config(ctx: &Context, name: &str, args: &CfgArgs) -> Result<()> {
    let board = ctx.board(name)?;
    let build = args
        .build
        .clone()
        .unwrap_or_else(|| ctx.settings.board_build_dir(&board.name));
    let dot_config = build.join(".config");
    if !dot_config.is_file() {
        bail!(
            "no kernel config at '{}'; run 'kernel-packager config {}' first",
            dot_config.display(),
            board.name
        );
    }
    let text = std::fs::read_to_string(&dot_config)
        .with_context(|| format!("reading '{}'", dot_config.display()))?;
    print!("{text}");
    Ok(())
}

pub(crate) fn run_make(ctx: &Context, name: &str, args: &MakeArgs) -> Result<()> {
    let board = ctx.board(name)?;
    let tree = ctx.tree(board, &args.tree)?;
    let make = ctx.make(&tree, Toolchain::for_board(board)?, None);

    let invocation = Invocation::passthrough(args.words.iter().cloned());
    make.invoke(&invocation)
        .with_context(|| format!("make {} for board '{}'", args.words.join(" "), board.name))?;
    Ok(())
}
