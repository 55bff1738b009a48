//! The browser capabilities the crawl needs, and a Chrome implementation.

use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};

/// Opaque reference to an element found on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Page-level operations used by the crawl loop.
pub trait PageDriver {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()>;

    /// Blocks until an element matching `selector` is present, or errors
    /// once `timeout` has elapsed.
    fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> anyhow::Result<ElementHandle>;

    /// Looks up an element without waiting.
    fn find_element(&mut self, selector: &str) -> anyhow::Result<Option<ElementHandle>>;

    fn inner_html(&mut self, element: &ElementHandle) -> anyhow::Result<String>;

    fn title(&mut self) -> anyhow::Result<String>;

    fn current_url(&mut self) -> anyhow::Result<String>;

    fn scroll_into_view(&mut self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Native (input-event) click.
    fn click(&mut self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Calls `element.click()` from page script.
    fn click_via_script(&mut self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Blocks until `element` is detached from the document, or errors once
    /// `timeout` has elapsed.
    fn wait_until_stale(&mut self, element: &ElementHandle, timeout: Duration) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub user_agent: String,
    /// How long the DevTools connection may stay silent, e.g. during the
    /// per-chapter delay.
    pub idle_timeout: Duration,
}

/// Attribute used to find a previously returned element again.
const HANDLE_ATTR: &str = "data-novelcrawl-handle";
const STALE_POLL: Duration = Duration::from_millis(100);

pub struct ChromePage {
    // Dropping the browser closes the window.
    _browser: Browser,
    tab: Arc<Tab>,
    next_handle: u64,
}

impl ChromePage {
    pub fn launch(options: &BrowserOptions) -> anyhow::Result<Self> {
        let user_agent = OsString::from(format!("--user-agent={}", options.user_agent));
        let args: Vec<&OsStr> = vec![
            OsStr::new("--start-maximized"),
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            user_agent.as_os_str(),
        ];
        let launch_options = LaunchOptions {
            headless: options.headless,
            args,
            idle_browser_timeout: options.idle_timeout,
            ..LaunchOptions::default()
        };

        tracing::info!(headless = options.headless, "launching chrome");
        let browser = Browser::new(launch_options).context("launch chrome")?;
        let tab = browser.new_tab().context("open browser tab")?;
        Ok(Self {
            _browser: browser,
            tab,
            next_handle: 0,
        })
    }

    /// Sleeps before the browser is dropped so the operator can look around.
    pub fn close_after(self, delay: Duration) {
        if !delay.is_zero() {
            tracing::info!(secs = delay.as_secs(), "closing browser after delay (Ctrl+C keeps it open)");
            thread::sleep(delay);
        }
        drop(self);
    }

    fn tag(&mut self, element: &Element<'_>) -> anyhow::Result<ElementHandle> {
        self.next_handle += 1;
        let handle = ElementHandle::new(self.next_handle.to_string());
        element
            .call_js_fn(
                &format!(
                    "function() {{ this.setAttribute('{HANDLE_ATTR}', '{}'); }}",
                    handle.as_str()
                ),
                vec![],
                false,
            )
            .context("tag element")?;
        Ok(handle)
    }

    fn handle_selector(handle: &ElementHandle) -> String {
        format!("[{HANDLE_ATTR}=\"{}\"]", handle.as_str())
    }

    fn call_on(&self, handle: &ElementHandle, function: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let element = self
            .tab
            .find_element(&Self::handle_selector(handle))
            .with_context(|| format!("resolve element handle {}", handle.as_str()))?;
        let result = element
            .call_js_fn(function, vec![], false)
            .with_context(|| format!("call js on element {}", handle.as_str()))?;
        Ok(result.value)
    }
}

/// Only a missing node counts as "not found"; DevTools failures do not.
fn is_no_element_found(err: &anyhow::Error) -> bool {
    err.is::<NoElementFound>()
}

impl PageDriver for ChromePage {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
        self.tab
            .navigate_to(url)
            .with_context(|| format!("navigate to {url}"))?
            .wait_until_navigated()
            .with_context(|| format!("wait for navigation to {url}"))?;
        Ok(())
    }

    fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> anyhow::Result<ElementHandle> {
        let tab = Arc::clone(&self.tab);
        let element = tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .with_context(|| format!("wait for {selector}"))?;
        self.tag(&element)
    }

    fn find_element(&mut self, selector: &str) -> anyhow::Result<Option<ElementHandle>> {
        let tab = Arc::clone(&self.tab);
        match tab.find_element(selector) {
            Ok(element) => self.tag(&element).map(Some),
            Err(err) if is_no_element_found(&err) => {
                tracing::debug!(selector, "element not found");
                Ok(None)
            }
            Err(err) => Err(err.context(format!("find {selector}"))),
        }
    }

    fn inner_html(&mut self, element: &ElementHandle) -> anyhow::Result<String> {
        let value = self.call_on(element, "function() { return this.innerHTML; }")?;
        match value {
            Some(serde_json::Value::String(html)) => Ok(html),
            other => anyhow::bail!("innerHTML returned a non-string value: {other:?}"),
        }
    }

    fn title(&mut self) -> anyhow::Result<String> {
        self.tab.get_title().context("read page title")
    }

    fn current_url(&mut self) -> anyhow::Result<String> {
        Ok(self.tab.get_url())
    }

    fn scroll_into_view(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        self.call_on(
            element,
            "function() { this.scrollIntoView({behavior: 'instant', block: 'center'}); }",
        )?;
        Ok(())
    }

    fn click(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        let found = self
            .tab
            .find_element(&Self::handle_selector(element))
            .with_context(|| format!("resolve element handle {}", element.as_str()))?;
        found.click().context("native click")?;
        Ok(())
    }

    fn click_via_script(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        self.call_on(element, "function() { this.click(); }")?;
        Ok(())
    }

    fn wait_until_stale(&mut self, element: &ElementHandle, timeout: Duration) -> anyhow::Result<()> {
        let selector = Self::handle_selector(element);
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.tab.find_element(&selector) {
                Ok(_) => {}
                Err(err) if is_no_element_found(&err) => return Ok(()),
                Err(err) => {
                    return Err(err.context(format!("check element {} for staleness", element.as_str())));
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                anyhow::bail!(
                    "element {} still attached after {}ms",
                    element.as_str(),
                    timeout.as_millis()
                );
            }
            thread::sleep(STALE_POLL);
        }
    }
}
