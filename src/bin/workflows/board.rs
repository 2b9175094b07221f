use anyhow::Result;
use kernel_packager::board::KernelConfigSource;
use kernel_packager::power::{run_power_command, PowerAction};
use kernel_packager::Toolchain;

use super::Context;

pub(crate) fn list_boards(ctx: &Context) -> Result<()> {
    for board in ctx.registry.boards() {
        let arch = board
            .arch()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:<24} {}", board.name, arch);
    }
    Ok(())
}

pub(crate) fn print_section(ctx: &Context, name: &str) -> Result<()> {
    let board = ctx.board(name)?;
    println!("[{}]", board.name);
    for (key, value) in board.entries() {
        println!("{key} = {value}");
    }
    Ok(())
}

pub(crate) fn print_env(ctx: &Context, name: &str) -> Result<()> {
    let board = ctx.board(name)?;
    let toolchain = Toolchain::for_board(board)?;
    let settings = &ctx.settings;

    println!("board          {}", board.name);
    println!("ARCH           {}", toolchain.arch);
    println!(
        "CROSS_COMPILE  {}",
        toolchain.cross_compile.as_deref().unwrap_or("(native)")
    );
    if let Some(dir) = &toolchain.path_prefix {
        println!("PATH prefix    {}", dir.display());
    }
    println!("compiler       {}", toolchain.compiler().display());
    match board.config_source() {
        Some(KernelConfigSource::Target(target)) => println!("config         make {target}"),
        Some(KernelConfigSource::File(path)) => println!("config         {}", path.display()),
        None => println!("config         (existing .config)"),
    }
    println!(
        "build dir      {}",
        settings.board_build_dir(&board.name).display()
    );
    println!(
        "staging dir    {}",
        settings.board_staging_dir(&board.name).display()
    );
    println!("pkgbase        {}", settings.pkgbase);
    Ok(())
}

pub(crate) fn power(ctx: &Context, name: &str, action: PowerAction) -> Result<()> {
    let board = ctx.board(name)?;
    run_power_command(board, action)?;
    Ok(())
}
