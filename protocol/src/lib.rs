pub mod command;
pub mod controller;
pub mod device;
pub mod report_listener;

pub use controller::{ClimateController, ControllerError};
pub use device::{DeviceCommand, DeviceMode, DeviceReport, Observation, ZoneId};
