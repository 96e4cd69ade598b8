mod live;
mod reading;

pub use live::LiveScraper;
pub use reading::{fallback_reading, Reading};

use thiserror::Error;

use crate::portal::PortalError;

/// Turbidity above this level means the plant was actively dosing that hour.
pub(crate) const TREATMENT_THRESHOLD_NTU: f64 = 5.0;

/// A scrape attempt fails as a whole with one typed reason; the serving layer
/// substitutes a degraded payload (see [`fallback_reading`]) instead of
/// propagating the failure to its own clients.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("monitoring credentials are missing; set DAMWATCH_USERNAME and DAMWATCH_PASSWORD")]
    MissingCredentials,
    #[error("target hour {0} is not available in shift headers")]
    TargetHourUnavailable(String),
    #[error(transparent)]
    Portal(#[from] PortalError),
}
