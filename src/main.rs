use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    novelcrawl::logging::init().context("init logging")?;

    let cli = novelcrawl::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        novelcrawl::cli::Command::Crawl(args) => {
            novelcrawl::crawl::run(args).context("crawl")?;
        }
        novelcrawl::cli::Command::Config(args) => {
            novelcrawl::config::run(args).context("config")?;
        }
    }

    Ok(())
}
