use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;

use crate::browser::PageDriver;
use crate::config::LoginConfig;

/// Runs once before the start page is loaded.
pub trait EstablishSession {
    fn establish(&mut self, page: &mut dyn PageDriver) -> anyhow::Result<()>;
}

/// Crawl without logging in.
#[derive(Debug, Default)]
pub struct Anonymous;

impl EstablishSession for Anonymous {
    fn establish(&mut self, _page: &mut dyn PageDriver) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Opens the login page and blocks until the operator confirms that they
/// have signed in by hand.
pub struct ManualLogin<R, W> {
    login_url: String,
    settle: Duration,
    input: R,
    prompt: W,
}

impl<R: BufRead, W: Write> ManualLogin<R, W> {
    pub fn new(login: &LoginConfig, input: R, prompt: W) -> Self {
        Self {
            login_url: login.url.clone(),
            settle: Duration::from_millis(login.settle_ms),
            input,
            prompt,
        }
    }

    fn write_prompt(&mut self) -> std::io::Result<()> {
        writeln!(self.prompt, "\n====== Sign in manually in the browser window ======")?;
        writeln!(self.prompt, "  1) Enter your account and password (or use a social login) and submit.")?;
        writeln!(self.prompt, "  2) Come back to this terminal once the site shows you as signed in.")?;
        write!(self.prompt, "Press Enter to continue...")?;
        self.prompt.flush()
    }
}

impl<R: BufRead, W: Write> EstablishSession for ManualLogin<R, W> {
    fn establish(&mut self, page: &mut dyn PageDriver) -> anyhow::Result<()> {
        tracing::info!(url = %self.login_url, "opening login page");
        page.navigate(&self.login_url).context("open login page")?;

        self.write_prompt().context("write login prompt")?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("read login confirmation")?;
        if read == 0 {
            anyhow::bail!("login confirmation aborted: input closed before Enter was pressed");
        }

        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        tracing::info!("login confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::browser::ElementHandle;

    #[derive(Default)]
    struct RecordingPage {
        visited: Vec<String>,
    }

    impl PageDriver for RecordingPage {
        fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
            self.visited.push(url.to_string());
            Ok(())
        }
        fn wait_for_element(&mut self, _: &str, _: Duration) -> anyhow::Result<ElementHandle> {
            anyhow::bail!("unused")
        }
        fn find_element(&mut self, _: &str) -> anyhow::Result<Option<ElementHandle>> {
            Ok(None)
        }
        fn inner_html(&mut self, _: &ElementHandle) -> anyhow::Result<String> {
            anyhow::bail!("unused")
        }
        fn title(&mut self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        fn current_url(&mut self) -> anyhow::Result<String> {
            Ok(self.visited.last().cloned().unwrap_or_default())
        }
        fn scroll_into_view(&mut self, _: &ElementHandle) -> anyhow::Result<()> {
            Ok(())
        }
        fn click(&mut self, _: &ElementHandle) -> anyhow::Result<()> {
            Ok(())
        }
        fn click_via_script(&mut self, _: &ElementHandle) -> anyhow::Result<()> {
            Ok(())
        }
        fn wait_until_stale(&mut self, _: &ElementHandle, _: Duration) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn login() -> LoginConfig {
        LoginConfig {
            url: "https://account.example/signin".to_string(),
            settle_ms: 0,
        }
    }

    #[test]
    fn manual_login_opens_login_page_and_waits_for_enter() {
        let mut page = RecordingPage::default();
        let mut prompt = Vec::new();
        ManualLogin::new(&login(), Cursor::new("\n"), &mut prompt)
            .establish(&mut page)
            .expect("login confirmed");

        assert_eq!(page.visited, vec!["https://account.example/signin"]);
        let prompt = String::from_utf8(prompt).expect("utf8 prompt");
        assert!(prompt.contains("Press Enter"));
    }

    #[test]
    fn closed_input_aborts_login() {
        let mut page = RecordingPage::default();
        let err = ManualLogin::new(&login(), Cursor::new(""), Vec::new())
            .establish(&mut page)
            .unwrap_err();
        assert!(err.to_string().contains("aborted"), "{err:#}");
    }

    #[test]
    fn anonymous_session_touches_nothing() {
        let mut page = RecordingPage::default();
        Anonymous.establish(&mut page).expect("no-op");
        assert!(page.visited.is_empty());
    }
}
