use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kernel_packager::power::PowerAction;

mod workflows;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "kernel-packager")]
#[command(about = "Cross-compile a kernel for a board and stage it as a package")]
struct Cli {
    /// Settings file (default: <config_dir>/kernel-packager/config.toml)
    #[arg(long, global = true, value_name = "TOML")]
    settings: Option<PathBuf>,

    /// Boards file (default: <boards_dir>/boards_config)
    #[arg(long, global = true, value_name = "PATH")]
    boards_file: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the kernel for a board and populate the package staging tree
    Assemble(workflows::AssembleArgs),
    /// Write the board's kernel config into the build directory
    Config {
        board: String,
        #[command(flatten)]
        args: workflows::ConfigArgs,
    },
    /// Print the board's current kernel config
    Cfg {
        board: String,
        #[command(flatten)]
        args: workflows::CfgArgs,
    },
    /// Run make for a board with its toolchain, e.g. `make rk3399_arm64 -- menuconfig`
    Make {
        board: String,
        #[command(flatten)]
        args: workflows::MakeArgs,
    },
    /// List configured boards
    Boards,
    /// Print a board's raw key/value pairs
    Section { board: String },
    /// Print the resolved build environment for a board
    Env { board: String },
    /// Run a board's power command
    Power { action: PowerAction, board: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    kernel_packager::logging::init_cli_logging(cli.verbose, cli.quiet);

    let ctx = workflows::Context::load(cli.settings.as_deref(), cli.boards_file.as_deref())?;
    match cli.command {
        Command::Assemble(args) => workflows::assemble(&ctx, &args),
        Command::Config { board, args } => workflows::configure(&ctx, &board, &args),
        Command::Cfg { board, args } => workflows::print_kernel_config(&ctx, &board, &args),
        Command::Make { board, args } => workflows::run_make(&ctx, &board, &args),
        Command::Boards => workflows::list_boards(&ctx),
        Command::Section { board } => workflows::print_section(&ctx, &board),
        Command::Env { board } => workflows::print_env(&ctx, &board),
        Command::Power { action, board } => workflows::power(&ctx, &board, action),
    }
}
