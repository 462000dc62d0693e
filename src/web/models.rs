// src/web/models.rs - Wire shapes served by the HTTP API
use crate::heater::HeaterState;
use crate::reading::Reading;
use crate::safety::SafetyStatus;
use serde::{Deserialize, Serialize};

/// Everything the host knows after one capture cycle. This is also the
/// record shape written to the on-disk archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub reading: Reading,
    pub safety: SafetyStatus,
    pub heater: HeaterState,
}
