// src/reading.rs - Immutable weather reading value
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated reading of every CloudWatcher channel.
///
/// Produced only by the station aggregator; consumed read-only by the safety
/// evaluator, the heater controller, and the serving/storage glue. Never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// IR sky temperature, Celsius.
    pub sky_temp_c: f64,
    /// Ambient sensor temperature, Celsius.
    pub ambient_temp_c: f64,
    /// Anemometer speed in km/h; `None` when the device has no anemometer.
    pub wind_speed_kph: Option<f64>,
    /// Raw rain sensor oscillator counter.
    pub rain_frequency: f64,
    /// Rain sensor equivalent resistance, ohms. Lower means wetter.
    pub rain_resistance_ohm: f64,
    /// Wetness channel resistance, ohms. Lower means wetter.
    pub wetness_ohm: f64,
    /// Heater PWM duty cycle, percent.
    pub pwm_heater_value: f64,
    /// Supply rail derived from the zener reference channel, volts.
    pub supply_voltage: f64,
    /// Ambient thermistor bridge voltage, volts. Diagnostic only.
    pub internal_voltage: f64,
}

impl Reading {
    /// Sky minus ambient temperature. Negative under a clear sky; approaches
    /// zero as cloud cover increases.
    pub fn sky_delta_c(&self) -> f64 {
        self.sky_temp_c - self.ambient_temp_c
    }
}
