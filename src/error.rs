use crate::entry::EntryId;
use climate_protocol::{ControllerError, ZoneId};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("corrupt schedule row {id}: {detail}")]
    Corrupt { id: i64, detail: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClimateError {
    /// Rejected at write time; never reaches the scheduler loop.
    #[error("invalid schedule entry: {0}")]
    InvalidScheduleEntry(String),

    #[error("schedule data integrity violation in zone {zone}: {detail}")]
    DataIntegrityViolation { zone: ZoneId, detail: String },

    #[error("controller unavailable for zone {zone}: {source}")]
    ControllerUnavailable {
        zone: ZoneId,
        #[source]
        source: ControllerError,
    },

    #[error("controller for zone {zone} timed out after {after:?}")]
    ControllerTimeout { zone: ZoneId, after: Duration },

    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),

    #[error("schedule entry {0} not found")]
    NotFound(EntryId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<rusqlite::Error> for ClimateError {
    fn from(e: rusqlite::Error) -> Self {
        ClimateError::Store(StoreError::Sqlite(e))
    }
}

pub type Result<T, E = ClimateError> = std::result::Result<T, E>;
