use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ConfigArgs;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Upper bound for every configured wait, in seconds (one day).
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Everything a crawl run needs, set once before the browser starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Address of the first chapter.
    pub start_url: String,
    pub output_path: PathBuf,
    pub book: BookConfig,
    /// Hard cap on appended chapters, even if more "next" controls exist.
    pub max_chapters: u32,
    /// Pause after each appended chapter, before advancing.
    pub chapter_delay_secs: u64,
    /// Bound for the content-presence and staleness waits.
    pub element_timeout_secs: u64,
    pub image_timeout_secs: u64,
    /// Keep the browser open this long after the archive is written.
    pub close_delay_secs: u64,
    pub scroll_settle_ms: u64,
    /// Sleep used when the previous content never went stale.
    pub stale_grace_ms: u64,
    pub user_agent: String,
    pub content_selector: String,
    pub next_selector: String,
    pub headless: bool,
    /// When set, the crawl starts with a manual login on this page.
    pub login: Option<LoginConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookConfig {
    pub title: String,
    pub author: String,
    /// BCP-47 tag used for EPUB metadata and chapter documents.
    pub language: String,
    /// Defaults to a random `urn:uuid:` identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginConfig {
    pub url: String,
    /// Pause after the operator confirms, so the site can finish redirecting.
    pub settle_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            output_path: PathBuf::from("book.epub"),
            book: BookConfig::default(),
            max_chapters: 56,
            chapter_delay_secs: 30,
            element_timeout_secs: 30,
            image_timeout_secs: 20,
            close_delay_secs: 0,
            scroll_settle_ms: 300,
            stale_grace_ms: 1500,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            content_selector: "article.css-vurnku".to_string(),
            next_selector: "button.css-16mch31".to_string(),
            headless: false,
            login: None,
        }
    }
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            author: "Unknown".to_string(),
            language: "zh".to_string(),
            identifier: None,
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            settle_ms: 1000,
        }
    }
}

impl CrawlConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_yaml::from_str(&contents).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(self).context("serialize config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_http_url("start_url", &self.start_url)?;
        if let Some(login) = &self.login {
            parse_http_url("login.url", &login.url)?;
        }

        if self.output_path.as_os_str().is_empty() {
            anyhow::bail!("output_path must not be empty");
        }
        if self.max_chapters == 0 {
            anyhow::bail!("max_chapters must be at least 1");
        }
        if self.element_timeout_secs == 0 {
            anyhow::bail!("element_timeout_secs must be greater than 0");
        }
        if self.image_timeout_secs == 0 {
            anyhow::bail!("image_timeout_secs must be greater than 0");
        }
        if self.user_agent.trim().is_empty() {
            anyhow::bail!("user_agent must not be empty");
        }
        if self.book.title.trim().is_empty() {
            anyhow::bail!("book.title must not be empty");
        }
        if self.book.language.trim().is_empty() {
            anyhow::bail!("book.language must not be empty");
        }

        for (field, secs) in [
            ("chapter_delay_secs", self.chapter_delay_secs),
            ("element_timeout_secs", self.element_timeout_secs),
            ("image_timeout_secs", self.image_timeout_secs),
            ("close_delay_secs", self.close_delay_secs),
        ] {
            check_wait(field, secs)?;
        }
        let mut waits_ms = vec![
            ("scroll_settle_ms", self.scroll_settle_ms),
            ("stale_grace_ms", self.stale_grace_ms),
        ];
        if let Some(login) = &self.login {
            waits_ms.push(("login.settle_ms", login.settle_ms));
        }
        for (field, ms) in waits_ms {
            check_wait(field, ms / 1000)?;
        }

        check_selector("content_selector", &self.content_selector)?;
        check_selector("next_selector", &self.next_selector)?;
        Ok(())
    }

    pub fn chapter_delay(&self) -> Duration {
        Duration::from_secs(self.chapter_delay_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_secs(self.close_delay_secs)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }
}

/// Writes the default configuration as YAML, to stdout or `--out`.
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let yaml = CrawlConfig::default().to_yaml()?;
    let Some(out) = args.out else {
        print!("{yaml}");
        return Ok(());
    };

    let mut options = OpenOptions::new();
    options.write(true);
    if args.force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options
        .open(&out)
        .with_context(|| format!("open config output: {out}"))?;
    file.write_all(yaml.as_bytes())
        .with_context(|| format!("write config output: {out}"))?;
    tracing::info!(path = %out, "wrote default config");
    Ok(())
}

fn parse_http_url(field: &str, raw: &str) -> anyhow::Result<Url> {
    if raw.trim().is_empty() {
        anyhow::bail!("{field} must be set");
    }
    let url = Url::parse(raw).with_context(|| format!("parse {field}: {raw}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("{field} must be http/https: {url}");
    }
    Ok(url)
}

fn check_wait(field: &str, secs: u64) -> anyhow::Result<()> {
    if secs > MAX_WAIT_SECS {
        anyhow::bail!("{field} must not exceed {MAX_WAIT_SECS} seconds");
    }
    Ok(())
}

fn check_selector(field: &str, css: &str) -> anyhow::Result<()> {
    if css.trim().is_empty() {
        anyhow::bail!("{field} must not be empty");
    }
    scraper::Selector::parse(css)
        .map_err(|err| anyhow::anyhow!("{field} is not a valid CSS selector ({css}): {err:?}"))?;
    Ok(())
}
