// src/config.rs - Host configuration
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub heater: HeaterConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Serial link configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Per-exchange response deadline, milliseconds.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
}

/// Reading aggregation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Raw samples averaged into one reported reading.
    #[serde(default = "default_num_repeats")]
    pub num_repeats: u32,

    /// Minimum surviving samples required to report a reading.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,

    /// Pause between sample iterations, seconds.
    #[serde(default = "default_inter_repeat_delay_s")]
    pub inter_repeat_delay_s: f64,

    /// Attempts per field before the iteration is discarded.
    #[serde(default = "default_max_field_retries")]
    pub max_field_retries: u32,

    /// Pause before a field retry, milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Pause between capture cycles, seconds.
    #[serde(default = "default_capture_delay_s")]
    pub capture_delay_s: f64,

    /// Consecutive failed cycles before the serial port is reopened.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Safety thresholds. Cloud deltas are negative (sky colder than ambient);
/// wind thresholds are km/h; wet/rain thresholds are ohms on the rain and
/// wetness channels.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Thresholds {
    #[serde(default = "default_cloudy")]
    pub cloudy_delta_c: f64,

    #[serde(default = "default_very_cloudy")]
    pub very_cloudy_delta_c: f64,

    #[serde(default = "default_windy")]
    pub windy_kph: f64,

    #[serde(default = "default_very_windy")]
    pub very_windy_kph: f64,

    #[serde(default = "default_gusty")]
    pub gusty_kph: f64,

    #[serde(default = "default_very_gusty")]
    pub very_gusty_kph: f64,

    #[serde(default = "default_wet")]
    pub wet_ohm: f64,

    #[serde(default = "default_rainy")]
    pub rainy_ohm: f64,
}

/// Safety evaluation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SafetyConfig {
    /// Minutes the overall verdict stays unsafe after the last unsafe reading.
    #[serde(default = "default_safety_delay_minutes")]
    pub safety_delay_minutes: f64,

    /// Factor names excluded from the overall verdict ("cloud", "wind",
    /// "gust", "rain"). Excluded factors are still reported.
    #[serde(default)]
    pub ignore_factors: Vec<String>,
}

/// Rain sensor heater configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaterConfig {
    /// Duty floor, percent.
    #[serde(default = "default_min_power")]
    pub min_power: u8,

    #[serde(default = "default_low_temp")]
    pub low_temp_c: f64,

    /// Target lift above ambient when colder than low_temp_c, Celsius.
    #[serde(default = "default_low_delta")]
    pub low_delta_c: f64,

    #[serde(default = "default_high_temp")]
    pub high_temp_c: f64,

    /// Target lift above ambient when warmer than high_temp_c, Celsius.
    #[serde(default = "default_high_delta")]
    pub high_delta_c: f64,

    /// Sky-ambient delta at or below the negated value indicates icing risk.
    #[serde(default = "default_impulse_temp")]
    pub impulse_temp_c: f64,

    /// Full-power burst length, seconds.
    #[serde(default = "default_impulse_duration_s")]
    pub impulse_duration_s: f64,

    /// Minimum spacing between burst starts, seconds.
    #[serde(default = "default_impulse_cycle_s")]
    pub impulse_cycle_s: f64,
}

/// Web interface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Snapshots retained for the history endpoint.
    #[serde(default = "default_history")]
    pub history: usize,
}

/// Reading log configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    /// JSON-lines output path; logging is disabled when unset.
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 9600 }
fn default_exchange_timeout_ms() -> u64 { 2000 }
fn default_num_repeats() -> u32 { 5 }
fn default_min_samples() -> u32 { 3 }
fn default_inter_repeat_delay_s() -> f64 { 0.2 }
fn default_max_field_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_capture_delay_s() -> f64 { 30.0 }
fn default_max_consecutive_failures() -> u32 { 5 }
fn default_cloudy() -> f64 { -25.0 }
fn default_very_cloudy() -> f64 { -15.0 }
fn default_windy() -> f64 { 50.0 }
fn default_very_windy() -> f64 { 75.0 }
fn default_gusty() -> f64 { 100.0 }
fn default_very_gusty() -> f64 { 125.0 }
fn default_wet() -> f64 { 2200.0 }
fn default_rainy() -> f64 { 1800.0 }
fn default_safety_delay_minutes() -> f64 { 15.0 }
fn default_min_power() -> u8 { 10 }
fn default_low_temp() -> f64 { 0.0 }
fn default_low_delta() -> f64 { 6.0 }
fn default_high_temp() -> f64 { 20.0 }
fn default_high_delta() -> f64 { 4.0 }
fn default_impulse_temp() -> f64 { 10.0 }
fn default_impulse_duration_s() -> f64 { 60.0 }
fn default_impulse_cycle_s() -> f64 { 600.0 }
fn default_web_port() -> u16 { 8080 }
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_history() -> usize { 120 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            num_repeats: default_num_repeats(),
            min_samples: default_min_samples(),
            inter_repeat_delay_s: default_inter_repeat_delay_s(),
            max_field_retries: default_max_field_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            capture_delay_s: default_capture_delay_s(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cloudy_delta_c: default_cloudy(),
            very_cloudy_delta_c: default_very_cloudy(),
            windy_kph: default_windy(),
            very_windy_kph: default_very_windy(),
            gusty_kph: default_gusty(),
            very_gusty_kph: default_very_gusty(),
            wet_ohm: default_wet(),
            rainy_ohm: default_rainy(),
        }
    }
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            min_power: default_min_power(),
            low_temp_c: default_low_temp(),
            low_delta_c: default_low_delta(),
            high_temp_c: default_high_temp(),
            high_delta_c: default_high_delta(),
            impulse_temp_c: default_impulse_temp(),
            impulse_duration_s: default_impulse_duration_s(),
            impulse_cycle_s: default_impulse_cycle_s(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            bind_address: default_bind_address(),
            history: default_history(),
        }
    }
}

impl Thresholds {
    /// Each "very" threshold must be strictly more extreme than its partner.
    /// Cloud deltas worsen toward zero, wind worsens upward, and the rain
    /// resistances worsen downward.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.very_cloudy_delta_c <= self.cloudy_delta_c {
            return Err(ConfigError::Invalid(format!(
                "very_cloudy_delta_c ({}) must be greater than cloudy_delta_c ({})",
                self.very_cloudy_delta_c, self.cloudy_delta_c
            )));
        }
        if self.very_windy_kph <= self.windy_kph {
            return Err(ConfigError::Invalid(format!(
                "very_windy_kph ({}) must be greater than windy_kph ({})",
                self.very_windy_kph, self.windy_kph
            )));
        }
        if self.very_gusty_kph <= self.gusty_kph {
            return Err(ConfigError::Invalid(format!(
                "very_gusty_kph ({}) must be greater than gusty_kph ({})",
                self.very_gusty_kph, self.gusty_kph
            )));
        }
        if self.rainy_ohm >= self.wet_ohm {
            return Err(ConfigError::Invalid(format!(
                "rainy_ohm ({}) must be less than wet_ohm ({})",
                self.rainy_ohm, self.wet_ohm
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Validate configuration. Violations are fatal at startup and never
    /// surface at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.is_empty() {
            return Err(ConfigError::Invalid("serial port must be specified".into()));
        }
        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid("baud rate must be positive".into()));
        }
        if self.capture.num_repeats == 0 {
            return Err(ConfigError::Invalid("num_repeats must be positive".into()));
        }
        if self.capture.min_samples == 0 || self.capture.min_samples > self.capture.num_repeats {
            return Err(ConfigError::Invalid(format!(
                "min_samples ({}) must be in 1..=num_repeats ({})",
                self.capture.min_samples, self.capture.num_repeats
            )));
        }
        self.thresholds.validate()?;
        if self.safety.safety_delay_minutes < 0.0 {
            return Err(ConfigError::Invalid("safety_delay_minutes must not be negative".into()));
        }
        for name in &self.safety.ignore_factors {
            if !matches!(name.as_str(), "cloud" | "wind" | "gust" | "rain") {
                return Err(ConfigError::Invalid(format!("unknown safety factor '{name}'")));
            }
        }
        if self.heater.min_power > 100 {
            return Err(ConfigError::Invalid("heater min_power must be at most 100".into()));
        }
        if self.heater.high_temp_c <= self.heater.low_temp_c {
            return Err(ConfigError::Invalid(format!(
                "heater high_temp_c ({}) must be greater than low_temp_c ({})",
                self.heater.high_temp_c, self.heater.low_temp_c
            )));
        }
        if self.heater.impulse_duration_s <= 0.0 || self.heater.impulse_cycle_s <= 0.0 {
            return Err(ConfigError::Invalid(
                "heater impulse durations must be positive".into(),
            ));
        }
        if self.heater.impulse_duration_s >= self.heater.impulse_cycle_s {
            return Err(ConfigError::Invalid(format!(
                "heater impulse_cycle_s ({}) must exceed impulse_duration_s ({})",
                self.heater.impulse_cycle_s, self.heater.impulse_duration_s
            )));
        }
        Ok(())
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(config_path: &str) -> Result<Config, ConfigError> {
    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    tracing::info!("Loaded configuration from {}", config_path);
    Ok(config)
}
