//! fantoccini-backed portal session. Requires a WebDriver endpoint
//! (chromedriver or geckodriver) reachable at the configured URL.

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{error::CmdError, key::Key, Client, ClientBuilder, Locator};
use log::warn;
use serde_json::json;
use tokio::time::{sleep, timeout};

use super::{locators, PortalConnector, PortalError, PortalSession};
use crate::config::Config;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(90);
const NAVIGATION_RETRY_BACKOFF: Duration = Duration::from_secs(5);
const ELEMENT_WAIT: Duration = Duration::from_secs(15);
const LOGIN_WAIT: Duration = Duration::from_secs(30);
const RELOAD_TIMEOUT: Duration = Duration::from_secs(15);
const POST_SUBMIT_SETTLE: Duration = Duration::from_secs(2);

pub struct WebPortal {
    config: Config,
}

impl WebPortal {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PortalConnector for WebPortal {
    async fn open(&self) -> Result<Box<dyn PortalSession>, PortalError> {
        let mut caps = serde_json::map::Map::new();
        if self.config.headless {
            caps.insert(
                "goog:chromeOptions".to_string(),
                json!({ "args": ["--headless=new", "--disable-gpu"] }),
            );
        }

        let mut builder = ClientBuilder::native();
        builder.capabilities(caps);
        let client = builder
            .connect(&self.config.webdriver_url)
            .await
            .map_err(|err| PortalError::Connect(err.to_string()))?;

        Ok(Box::new(WebSession {
            client,
            login_url: self.config.login_url.clone(),
        }))
    }
}

struct WebSession {
    client: Client,
    login_url: String,
}

fn cmd(err: CmdError) -> PortalError {
    PortalError::Command(err.to_string())
}

fn expired(step: &'static str, limit: Duration) -> PortalError {
    PortalError::Timeout {
        step,
        timeout: limit,
    }
}

impl WebSession {
    async fn wait_for(
        &mut self,
        step: &'static str,
        locator: Locator<'_>,
        limit: Duration,
    ) -> Result<fantoccini::elements::Element, PortalError> {
        self.client
            .wait()
            .at_most(limit)
            .for_element(locator)
            .await
            .map_err(|_| expired(step, limit))
    }

    async fn first_text(&mut self, xpath: &str) -> Result<Option<String>, PortalError> {
        let elements = self
            .client
            .find_all(Locator::XPath(xpath))
            .await
            .map_err(cmd)?;
        match elements.first() {
            Some(element) => {
                let text = element.text().await.map_err(cmd)?;
                Ok(Some(text.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    async fn all_texts(&mut self, xpath: &str) -> Result<Vec<String>, PortalError> {
        let elements = self
            .client
            .find_all(Locator::XPath(xpath))
            .await
            .map_err(cmd)?;
        let mut texts = Vec::with_capacity(elements.len());
        for element in &elements {
            texts.push(element.text().await.map_err(cmd)?);
        }
        Ok(texts)
    }
}

#[async_trait]
impl PortalSession for WebSession {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), PortalError> {
        // The initial page load is the one step retried automatically; the
        // portal's front proxy drops the first request surprisingly often.
        let first_attempt = timeout(NAVIGATION_TIMEOUT, self.client.goto(&self.login_url)).await;
        if !matches!(first_attempt, Ok(Ok(()))) {
            warn!("login page navigation failed, retrying once");
            sleep(NAVIGATION_RETRY_BACKOFF).await;
            timeout(NAVIGATION_TIMEOUT, self.client.goto(&self.login_url))
                .await
                .map_err(|_| expired("goto login page", NAVIGATION_TIMEOUT))?
                .map_err(cmd)?;
        }

        let username_input = self
            .wait_for(
                "login username field",
                Locator::Css(locators::LOGIN_USERNAME),
                ELEMENT_WAIT,
            )
            .await?;
        username_input.send_keys(username).await.map_err(cmd)?;

        let password_input = self
            .client
            .find(Locator::Css(locators::LOGIN_PASSWORD))
            .await
            .map_err(cmd)?;
        password_input.send_keys(password).await.map_err(cmd)?;
        let enter = String::from(char::from(Key::Enter));
        password_input.send_keys(&enter).await.map_err(cmd)?;

        let header_row = locators::results_table_header_row();
        self.wait_for(
            "results table",
            Locator::XPath(&header_row),
            LOGIN_WAIT,
        )
        .await?;

        Ok(())
    }

    async fn header_texts(&mut self) -> Result<Vec<String>, PortalError> {
        self.all_texts(&locators::header_cells()).await
    }

    async fn row_cell_text(
        &mut self,
        row_label: &str,
        column: usize,
    ) -> Result<Option<String>, PortalError> {
        self.first_text(&locators::labeled_row_cell(row_label, column))
            .await
    }

    async fn tank_cell_text(
        &mut self,
        phase_label: &str,
        tank_label: &str,
        column: usize,
    ) -> Result<Option<String>, PortalError> {
        let exact = locators::tank_row_cell(phase_label, tank_label, column, true);
        if let Some(text) = self.first_text(&exact).await? {
            return Ok(Some(text));
        }
        let loose = locators::tank_row_cell(phase_label, tank_label, column, false);
        self.first_text(&loose).await
    }

    async fn dam_summary_text(&mut self) -> Result<Option<String>, PortalError> {
        self.first_text(locators::DAM_SUMMARY_ROW).await
    }

    async fn readiness_cell_texts(&mut self) -> Result<Vec<String>, PortalError> {
        self.all_texts(&locators::readiness_cells()).await
    }

    async fn reload(&mut self) -> Result<(), PortalError> {
        timeout(RELOAD_TIMEOUT, self.client.refresh())
            .await
            .map_err(|_| expired("page reload", RELOAD_TIMEOUT))?
            .map_err(cmd)
    }

    async fn submit_value(&mut self, value: f64) -> Result<(), PortalError> {
        let entry_link = self
            .wait_for(
                "turbidity entry link",
                Locator::LinkText(locators::ENTRY_FORM_LINK_TEXT),
                ELEMENT_WAIT,
            )
            .await?;
        entry_link.click().await.map_err(cmd)?;

        let value_input = self
            .wait_for(
                "entry value field",
                Locator::Css(locators::ENTRY_VALUE_INPUT),
                ELEMENT_WAIT,
            )
            .await?;
        value_input.click().await.map_err(cmd)?;
        value_input.clear().await.map_err(cmd)?;
        value_input.send_keys(&format!("{value}")).await.map_err(cmd)?;
        let enter = String::from(char::from(Key::Enter));
        value_input.send_keys(&enter).await.map_err(cmd)?;

        let checkbox = self
            .wait_for(
                "entry confirmation checkbox",
                Locator::Css(locators::ENTRY_CONFIRM_CHECKBOX),
                ELEMENT_WAIT,
            )
            .await?;
        checkbox.click().await.map_err(cmd)?;

        let submit = self
            .wait_for(
                "entry submit button",
                Locator::Css(locators::ENTRY_SUBMIT_BUTTON),
                ELEMENT_WAIT,
            )
            .await?;
        submit.click().await.map_err(cmd)?;

        sleep(POST_SUBMIT_SETTLE).await;
        Ok(())
    }

    async fn submission_pending(&mut self) -> Result<bool, PortalError> {
        let markers = self
            .client
            .find_all(Locator::XPath(locators::PENDING_MARKER))
            .await
            .map_err(cmd)?;
        match markers.first() {
            Some(marker) => marker.is_displayed().await.map_err(cmd),
            None => Ok(false),
        }
    }

    async fn close(&mut self) -> Result<(), PortalError> {
        self.client.clone().close().await.map_err(cmd)
    }
}
