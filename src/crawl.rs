//! Sequential chapter crawl.
//!
//! Each cycle waits for the content container, extracts and sanitizes it,
//! downloads its images, renders the chapter into the book and then clicks
//! the "next" control. The loop ends at the chapter cap, when the control is
//! missing, or when the content never shows up; whatever was collected is
//! still written out.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;

use crate::browser::{BrowserOptions, ChromePage, ElementHandle, PageDriver};
use crate::cli::CrawlArgs;
use crate::config::{CrawlConfig, LoginConfig};
use crate::epub::{BookMetadata, Chapter, EpubBook};
use crate::images::ImageFetcher;
use crate::render::{chapter_title, render_chapter};
use crate::sanitize::sanitize;
use crate::session::{Anonymous, EstablishSession, ManualLogin};

/// Why the crawl loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_chapters` chapters were appended.
    CapReached,
    /// No "next" control after the last chapter: the normal end of a book.
    EndOfBook,
    /// The content container did not appear within the element timeout.
    ContentNotFound,
    /// The container appeared but its markup could not be read.
    ExtractionFailed,
    /// Looking up "next" failed, or both the native and the scripted click
    /// on it failed.
    AdvanceFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub chapters: usize,
    pub stop: StopReason,
}

enum Advance {
    Next,
    Stop(StopReason),
}

pub fn run(args: CrawlArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args).context("resolve crawl config")?;
    config.validate().context("validate crawl config")?;
    if config.output_path.exists() && !args.force {
        anyhow::bail!(
            "epub output already exists (pass --force to overwrite): {}",
            config.output_path.display()
        );
    }

    let fetcher = ImageFetcher::new(&config.user_agent, config.image_timeout())?;
    let mut page = ChromePage::launch(&BrowserOptions {
        headless: config.headless,
        user_agent: config.user_agent.clone(),
        idle_timeout: idle_timeout(&config),
    })?;

    let mut session: Box<dyn EstablishSession> = match &config.login {
        Some(login) => Box::new(ManualLogin::new(
            login,
            std::io::stdin().lock(),
            std::io::stdout(),
        )),
        None => Box::new(Anonymous),
    };

    let mut book = EpubBook::new(BookMetadata::from_config(&config.book));
    let outcome = crawl_book(&mut page, session.as_mut(), &fetcher, &config, &mut book)?;
    tracing::info!(chapters = outcome.chapters, stop = ?outcome.stop, "crawl finished");

    book.write_to(&config.output_path, args.force)
        .with_context(|| format!("write epub: {}", config.output_path.display()))?;
    tracing::info!(
        path = %config.output_path.display(),
        chapters = book.chapters().len(),
        images = book.images().len(),
        "epub written"
    );

    page.close_after(config.close_delay());
    Ok(())
}

fn resolve_config(args: &CrawlArgs) -> anyhow::Result<CrawlConfig> {
    let mut config = match &args.config {
        Some(path) => CrawlConfig::load(&PathBuf::from(path))?,
        None => CrawlConfig::default(),
    };
    if let Some(url) = &args.url {
        config.start_url = url.clone();
    }
    if let Some(out) = &args.out {
        config.output_path = PathBuf::from(out);
    }
    if let Some(max_chapters) = args.max_chapters {
        config.max_chapters = max_chapters;
    }
    if let Some(login_url) = &args.login_url {
        let login = config.login.get_or_insert_with(LoginConfig::default);
        login.url = login_url.clone();
    }
    if args.headless {
        config.headless = true;
    }
    Ok(config)
}

fn idle_timeout(config: &CrawlConfig) -> Duration {
    // The DevTools connection is silent during the per-chapter delay.
    let floor = Duration::from_secs(10 * 60);
    config
        .chapter_delay()
        .saturating_add(config.element_timeout().saturating_mul(2))
        .saturating_add(config.close_delay())
        .max(floor)
}

/// Establishes the session, loads the start page and appends chapters to
/// `book` until one of the stop conditions is met.
pub fn crawl_book<P: PageDriver>(
    page: &mut P,
    session: &mut dyn EstablishSession,
    fetcher: &ImageFetcher,
    config: &CrawlConfig,
    book: &mut EpubBook,
) -> anyhow::Result<CrawlOutcome> {
    session.establish(&mut *page).context("establish session")?;

    tracing::info!(url = %config.start_url, "opening start page");
    page.navigate(&config.start_url)
        .context("open start page")?;

    let mut crawler = Crawler {
        page,
        fetcher,
        config,
    };
    let stop = crawler.run(book);
    Ok(CrawlOutcome {
        chapters: book.chapters().len(),
        stop,
    })
}

struct Crawler<'a, P> {
    page: &'a mut P,
    fetcher: &'a ImageFetcher,
    config: &'a CrawlConfig,
}

impl<P: PageDriver> Crawler<'_, P> {
    fn run(&mut self, book: &mut EpubBook) -> StopReason {
        for index in 1..=self.config.max_chapters {
            let content = match self
                .page
                .wait_for_element(&self.config.content_selector, self.config.element_timeout())
            {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(
                        chapter = index,
                        selector = %self.config.content_selector,
                        ?err,
                        "content not found; stopping"
                    );
                    return StopReason::ContentNotFound;
                }
            };

            if let Err(err) = self.capture_chapter(index, &content, book) {
                tracing::warn!(chapter = index, ?err, "could not extract chapter; stopping");
                return StopReason::ExtractionFailed;
            }

            if index == self.config.max_chapters {
                break;
            }
            sleep(self.config.chapter_delay());

            match self.advance(&content) {
                Advance::Next => {}
                Advance::Stop(reason) => return reason,
            }
        }

        tracing::info!(max_chapters = self.config.max_chapters, "chapter cap reached");
        StopReason::CapReached
    }

    fn capture_chapter(
        &mut self,
        index: u32,
        content: &ElementHandle,
        book: &mut EpubBook,
    ) -> anyhow::Result<()> {
        let inner_html = self
            .page
            .inner_html(content)
            .context("read content markup")?;
        let page_url = self.page.current_url().context("read current url")?;
        let page_title = self.page.title().unwrap_or_else(|err| {
            tracing::debug!(?err, "page title unavailable");
            String::new()
        });
        let title = chapter_title(&page_title, index);

        let sanitized = sanitize(&inner_html, &page_url);
        let mut document = sanitized.document;
        let images = self.fetcher.fetch_all(&sanitized.image_urls, index, book);
        let xhtml = render_chapter(&title, &book.metadata().language, &mut document, &images);

        book.add_chapter(Chapter {
            index,
            title: title.clone(),
            xhtml,
        });
        tracing::info!(
            chapter = index,
            title = %title,
            images = images.len(),
            failed_images = sanitized.image_urls.len() - images.len(),
            "saved chapter"
        );
        Ok(())
    }

    fn advance(&mut self, content: &ElementHandle) -> Advance {
        let next = match self.page.find_element(&self.config.next_selector) {
            Ok(Some(next)) => next,
            Ok(None) => {
                tracing::info!("no next-chapter control; end of book");
                return Advance::Stop(StopReason::EndOfBook);
            }
            Err(err) => {
                tracing::warn!(?err, "could not look up next-chapter control; stopping");
                return Advance::Stop(StopReason::AdvanceFailed);
            }
        };

        if let Err(err) = self.page.scroll_into_view(&next) {
            tracing::debug!(?err, "scroll into view failed");
        }
        sleep(self.config.scroll_settle());

        if let Err(err) = self.page.click(&next) {
            tracing::debug!(?err, "native click failed; clicking from script");
            if let Err(err) = self.page.click_via_script(&next) {
                tracing::warn!(?err, "could not click next-chapter control; stopping");
                return Advance::Stop(StopReason::AdvanceFailed);
            }
        }

        if let Err(err) = self
            .page
            .wait_until_stale(content, self.config.element_timeout())
        {
            tracing::warn!(?err, "previous content did not go stale; continuing after grace period");
            sleep(self.config.stale_grace());
        }
        Advance::Next
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
