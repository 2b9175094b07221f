use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use kernel_packager::package::{assemble as assemble_package, AssembleOptions};
use kernel_packager::preflight::check_board_host;
use kernel_packager::Toolchain;

use super::{Context, TreeArgs};

#[derive(Args)]
pub(crate) struct AssembleArgs {
    /// Board section name, e.g. rk3399_arm64
    board: String,

    #[command(flatten)]
    tree: TreeArgs,

    /// Package staging directory (default: <build_root>/<board>/package)
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Package base name (default from settings, else linux-devel)
    #[arg(long)]
    pkgbase: Option<String>,

    /// Kill any single make call running longer than this
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Extra flag for the build step; repeatable
    #[arg(long = "make-flag", value_name = "FLAG", allow_hyphen_values = true)]
    make_flags: Vec<String>,

    /// Also write the staging tree to this .tar.zst
    #[arg(long, value_name = "PATH")]
    archive: Option<PathBuf>,

    /// Print the result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Skip host tool checks
    #[arg(long)]
    skip_preflight: bool,
}

pub(crate) fn assemble(ctx: &Context, args: &AssembleArgs) -> Result<()> {
    let board = ctx.board(&args.board)?;
    let settings = &ctx.settings;

    let tree = ctx.tree(board, &args.tree)?;
    let staging = args
        .staging
        .clone()
        .unwrap_or_else(|| settings.board_staging_dir(&board.name));

    let toolchain = Toolchain::for_board(board)?;
    if args.skip_preflight {
        log::warn!("skipping preflight checks");
    } else {
        check_board_host(&toolchain, &settings.make, &tree.source)
            .with_context(|| format!("preflight for board '{}'", board.name))?;
    }

    let make = ctx.make(&tree, toolchain, args.timeout);

    let options = AssembleOptions::new(&tree.source, &tree.build, &staging)
        .pkgbase(args.pkgbase.clone().unwrap_or_else(|| settings.pkgbase.clone()))
        .make_flags(args.make_flags.clone());

    let mut result = assemble_package(board, &options, &make)?;
    if let Some(out) = &args.archive {
        result.write_archive(out)?;
    }

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("serializing result")?;
        println!("{json}");
        return Ok(());
    }

    println!(
        "[{}] {} {} staged at {}",
        result.board,
        result.pkgbase,
        result.kernel_release,
        result.staging_dir.display()
    );
    println!(
        "  boot image: {} (sha256 {})",
        result.boot_image.display(),
        result.boot_image_sha256
    );
    if let Some(dtb_dir) = &result.dtb_dir {
        println!("  device trees: {}", dtb_dir.display());
    }
    println!("  modules: {}", result.module_count);
    if let Some(command) = &result.initramfs_command {
        println!("  initramfs: {command}");
    }
    if let Some(archive) = &result.archive {
        println!("  archive: {}", archive.display());
    }
    Ok(())
}
