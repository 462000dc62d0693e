// src/lib.rs - CloudWatcher weather station host
pub mod calibration;
pub mod config;
pub mod hardware;
pub mod heater;
pub mod protocol;
pub mod reading;
pub mod safety;
pub mod station;
pub mod storage;
pub mod web;

pub use config::{Config, ConfigError};
pub use reading::Reading;
pub use safety::{Factor, SafetyEvaluator, SafetyStatus, Verdict};
pub use station::{CaptureError, DeviceInfo, WeatherStation};
