use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl chapters in a browser and write them to an EPUB.
    Crawl(CrawlArgs),
    /// Print or write the default crawl configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// YAML crawl configuration (defaults are used for missing fields).
    #[arg(long)]
    pub config: Option<String>,

    /// Start URL of the first chapter (overrides `start_url`).
    #[arg(long)]
    pub url: Option<String>,

    /// Output EPUB path (overrides `output_path`).
    #[arg(long)]
    pub out: Option<String>,

    /// Maximum chapters to collect (overrides `max_chapters`).
    #[arg(long)]
    pub max_chapters: Option<u32>,

    /// Sign in manually on this page before crawling (overrides `login.url`).
    #[arg(long)]
    pub login_url: Option<String>,

    /// Run Chrome without a visible window.
    #[arg(long)]
    pub headless: bool,

    /// Overwrite an existing EPUB.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Write the configuration here instead of stdout.
    #[arg(long)]
    pub out: Option<String>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}
