mod api;
mod app;
mod cli;
mod commands;
mod config;
mod paths;
mod ui;

use anyhow::Result;
use app::App;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::snap::Action;
use config::Config;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "overlord", &mut io::stdout());
        return Ok(());
    }

    let app = App::open(Config::load()?)?;
    log::debug!("Verbosity {}", ctx.verbose);

    match cli.command {
        Command::Install(args) => commands::snap::run(
            &ctx,
            &app,
            Action::Install,
            &args.name,
            &args.channel,
            args.devmode,
            &args.common,
        ),
        Command::Update(args) => commands::snap::run(
            &ctx,
            &app,
            Action::Update,
            &args.name,
            &args.channel,
            args.devmode,
            &args.common,
        ),
        Command::Remove(args) => {
            commands::snap::run(&ctx, &app, Action::Remove, &args.name, "", false, &args.common)
        }
        Command::Changes { select } => commands::changes::list(&ctx, &app, select),
        Command::Change { id } => commands::changes::show(&ctx, &app, &id),
        Command::Abort { id } => commands::changes::abort(&ctx, &app, &id),
        Command::Login {
            username,
            macaroon,
            discharges,
        } => commands::user::login(&ctx, &app, &username, &macaroon, &discharges),
        Command::Logout { id } => commands::user::logout(&ctx, &app, id),
        Command::Run { once } => commands::run::run(&ctx, &app, once),
        Command::Completions { .. } => Ok(()),
    }
}
