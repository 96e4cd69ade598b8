//! Seam between the scrape/submit pipelines and the third-party monitoring
//! portal. Everything network-facing hides behind [`PortalSession`] so the
//! pipelines can be exercised against a fake portal in tests.

pub mod locators;
mod web;

pub use web::WebPortal;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("could not open a browser session: {0}")]
    Connect(String),
    #[error("portal step '{step}' timed out after {timeout:?}")]
    Timeout {
        step: &'static str,
        timeout: Duration,
    },
    #[error("portal command failed: {0}")]
    Command(String),
}

/// One live browser session against the portal. Methods are sequential
/// suspend points; every implementation must bound each call with a timeout.
#[async_trait]
pub trait PortalSession: Send {
    /// Navigates to the login page, submits credentials and waits for the
    /// results table to render.
    async fn login(&mut self, username: &str, password: &str) -> Result<(), PortalError>;

    /// Raw texts of the header row's hour-label cells, in column order
    /// starting at the first data column.
    async fn header_texts(&mut self) -> Result<Vec<String>, PortalError>;

    /// Text of the cell at `column` in the row whose first cell contains
    /// `row_label`. `None` when no such row or cell exists.
    async fn row_cell_text(
        &mut self,
        row_label: &str,
        column: usize,
    ) -> Result<Option<String>, PortalError>;

    /// Text of the cell at `column` in the tank row identified by phase and
    /// tank labels (exact tank match first, then a contains match).
    async fn tank_cell_text(
        &mut self,
        phase_label: &str,
        tank_label: &str,
        column: usize,
    ) -> Result<Option<String>, PortalError>;

    /// Text of the dam-level summary row shown above the results table.
    async fn dam_summary_text(&mut self) -> Result<Option<String>, PortalError>;

    /// Texts of the cells the portal blanks to "0.00" when a fresh entry
    /// slot is awaiting input.
    async fn readiness_cell_texts(&mut self) -> Result<Vec<String>, PortalError>;

    async fn reload(&mut self) -> Result<(), PortalError>;

    /// Walks the turbidity entry form: value field, confirmation checkbox,
    /// submit control.
    async fn submit_value(&mut self, value: f64) -> Result<(), PortalError>;

    /// Whether the portal still shows the pending-submission marker.
    async fn submission_pending(&mut self) -> Result<bool, PortalError>;

    async fn close(&mut self) -> Result<(), PortalError>;
}

/// Opens portal sessions. The scraper and each scheduled submission open
/// their own independent sessions.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PortalSession>, PortalError>;
}
