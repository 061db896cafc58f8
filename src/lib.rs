//! Schedule-driven control of independent climate zones.
//!
//! A periodic [`scheduler::SchedulerLoop`] matches each zone's schedule
//! against the local time and drives zones in AUTO mode toward the selected
//! temperature. Device reports flow through the [`reconciler::ChangeReconciler`],
//! which demotes a zone out of AUTO whenever a change cannot be attributed to
//! the scheduler's own writes.

pub mod config;
pub mod controller;
pub mod entry;
pub mod error;
pub mod matcher;
pub mod mode;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod slot;
pub mod store;
pub mod time_source;

#[cfg(test)]
pub(crate) mod testing;

pub use climate_protocol::{
    ClimateController, ControllerError, DeviceMode, DeviceReport, Observation, ZoneId,
};
pub use error::{ClimateError, Result};
