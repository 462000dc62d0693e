// src/station/mod.rs - CloudWatcher station: handshake and reading aggregation
//
// One station owns the transport for its lifetime; all exchanges are strictly
// sequential. The capture path follows the manufacturer's advice: query every
// channel several times, combine statistically, and never mix channels from
// different iterations into one reading.
use crate::calibration;
use crate::config::CaptureConfig;
use crate::hardware::Transport;
use crate::protocol::{Codec, Command, ProtocolError, RawFrame};
use crate::reading::Reading;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device unresponsive: no complete sample in {attempts} iterations")]
    DeviceUnresponsive { attempts: u32 },
    #[error("Insufficient samples: {got} of {need} required")]
    InsufficientSamples { got: usize, need: usize },
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Static device identity gathered during the connect handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub firmware: String,
    pub serial_number: String,
    pub has_anemometer: bool,
}

/// Rain sensor switch relay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Open,
    Closed,
}

/// One un-averaged pass over every channel. Internal to the aggregator.
#[derive(Debug, Clone)]
struct RawSample {
    sky_temp_c: f64,
    ambient_temp_c: f64,
    wind_speed_kph: Option<f64>,
    rain_frequency: f64,
    wetness_ohm: f64,
    pwm_percent: f64,
    supply_voltage: f64,
    internal_voltage: f64,
}

pub struct WeatherStation<T: Transport> {
    transport: T,
    codec: Codec,
    capture: CaptureConfig,
    min_heater_power: u8,
    info: DeviceInfo,
    connected: bool,
}

impl<T: Transport> WeatherStation<T> {
    pub fn new(transport: T, codec: Codec, capture: CaptureConfig, min_heater_power: u8) -> Self {
        Self {
            transport,
            codec,
            capture,
            min_heater_power,
            info: DeviceInfo::default(),
            connected: false,
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open the transport and perform the startup handshake: reset the device
    /// buffers, read the static identity, probe for an anemometer, and force
    /// the heater to its duty floor.
    pub async fn connect(&mut self) -> Result<&DeviceInfo, CaptureError> {
        self.transport
            .open()
            .await
            .map_err(ProtocolError::Transport)?;

        // Stale half-frames from a previous session would desynchronize the
        // first real exchange.
        if let Err(e) = self.codec.exchange(&mut self.transport, Command::ResetBuffers).await {
            tracing::debug!("Buffer reset handshake not acknowledged: {}", e);
        }

        let name = self
            .query(Command::GetInternalName)
            .await?
            .single("N ")?
            .text()
            .to_string();
        let firmware = self
            .query(Command::GetFirmware)
            .await?
            .single("V ")?
            .text()
            .to_string();
        let serial_number = self
            .query(Command::GetSerialNumber)
            .await?
            .serial_number()?
            .chars()
            .take(4)
            .collect();
        let has_anemometer = self
            .query(Command::CanGetWindSpeed)
            .await?
            .single_i32("v ")?
            != 0;

        self.info = DeviceInfo {
            name,
            firmware,
            serial_number,
            has_anemometer,
        };
        self.connected = true;
        tracing::info!(
            "Connected to {} (firmware {}, serial {}, anemometer: {})",
            self.info.name,
            self.info.firmware,
            self.info.serial_number,
            self.info.has_anemometer
        );

        self.set_heater_power(f64::from(self.min_heater_power)).await?;
        Ok(&self.info)
    }

    /// Close and reopen the transport, then redo the handshake. Used by the
    /// control loop after repeated capture failures.
    pub async fn reconnect(&mut self) -> Result<(), CaptureError> {
        tracing::warn!("Reopening connection to weather station");
        self.connected = false;
        self.transport.close();
        self.connect().await?;
        Ok(())
    }

    /// Capture one aggregated reading.
    ///
    /// Runs `num_repeats` sample iterations, each querying every channel with
    /// bounded per-field retries. A field that fails all retries discards its
    /// whole iteration, so a reading never mixes channels observed at
    /// different times. Surviving samples are combined with the arithmetic
    /// mean, rounded per field to the sensor's useful precision.
    pub async fn capture(&mut self) -> Result<Reading, CaptureError> {
        let repeats = self.capture.num_repeats;
        let mut samples: Vec<RawSample> = Vec::with_capacity(repeats as usize);

        for iteration in 0..repeats {
            if iteration > 0 {
                tokio::time::sleep(Duration::from_secs_f64(self.capture.inter_repeat_delay_s))
                    .await;
            }
            match self.sample_once().await {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::warn!("Sample iteration {} discarded: {}", iteration + 1, e);
                }
            }
        }

        if samples.is_empty() {
            return Err(CaptureError::DeviceUnresponsive { attempts: repeats });
        }
        let need = self.capture.min_samples as usize;
        if samples.len() < need {
            return Err(CaptureError::InsufficientSamples {
                got: samples.len(),
                need,
            });
        }

        Ok(Self::combine(&samples))
    }

    /// Set the heater duty cycle in percent; returns the duty the device
    /// acknowledged.
    pub async fn set_heater_power(&mut self, percent: f64) -> Result<f64, CaptureError> {
        let code = calibration::pwm_code(percent);
        let frame = self.query(Command::SetPwm(code)).await?;
        let achieved = calibration::pwm_percent(frame.single_i32("Q ")?);
        if (achieved - percent.clamp(0.0, 100.0)).abs() > 5.0 {
            tracing::warn!(
                "Heater PWM set to {:.1}% but device reports {:.1}%",
                percent,
                achieved
            );
        }
        Ok(achieved)
    }

    /// Current position of the device's switch relay.
    pub async fn switch_status(&mut self) -> Result<SwitchState, CaptureError> {
        let frame = self.query(Command::GetSwitchStatus).await?;
        Self::switch_state(&frame)
    }

    pub async fn open_switch(&mut self) -> Result<SwitchState, CaptureError> {
        let frame = self.query(Command::SetSwitchOpen).await?;
        Self::switch_state(&frame)
    }

    pub async fn close_switch(&mut self) -> Result<SwitchState, CaptureError> {
        let frame = self.query(Command::SetSwitchClosed).await?;
        Self::switch_state(&frame)
    }

    /// IR sensor communication error counters. The device resets them on
    /// read, so they are only useful as a periodic health log.
    pub async fn internal_errors(&mut self) -> Result<[i32; 4], CaptureError> {
        let frame = self.query(Command::GetInternalErrors).await?;
        Ok([
            frame.code_i32("E1")?,
            frame.code_i32("E2")?,
            frame.code_i32("E3")?,
            frame.code_i32("E4")?,
        ])
    }

    fn switch_state(frame: &RawFrame) -> Result<SwitchState, CaptureError> {
        match frame.first_block()?.code.as_str() {
            "X " => Ok(SwitchState::Closed),
            "Y " => Ok(SwitchState::Open),
            other => Err(ProtocolError::Framing(format!(
                "unexpected switch response code {other:?}"
            ))
            .into()),
        }
    }

    /// One exchange with bounded retries. Timeouts and framing errors are
    /// recoverable here; only exhaustion propagates.
    async fn query(&mut self, cmd: Command) -> Result<crate::protocol::RawFrame, ProtocolError> {
        let attempts = self.capture.max_field_retries.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(self.capture.retry_delay_ms)).await;
            }
            match self.codec.exchange(&mut self.transport, cmd).await {
                Ok(frame) => return Ok(frame),
                Err(e @ (ProtocolError::Timeout(_) | ProtocolError::Framing(_))) => {
                    tracing::debug!("Query {:?} attempt {} failed: {}", cmd, attempt + 1, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(ProtocolError::Timeout(Duration::ZERO)))
    }

    /// Query every channel once, in the manufacturer's recommended order.
    async fn sample_once(&mut self) -> Result<RawSample, ProtocolError> {
        let sky_raw = self.query(Command::GetSkyTemp).await?.single_i32("1 ")?;
        let ambient_raw = self
            .query(Command::GetAmbientTemp)
            .await?
            .single_i32("2 ")?;

        let values = self.query(Command::GetValues).await?;
        let zener_raw = values.code_i32("6 ")?;
        let ambient_ntc_raw = values.code_i32("3 ")?;
        let wetness_raw = values.code_i32("4 ")?;
        // The rain NTC block ("5 ") is present in the frame but unused: the
        // heater loop works from ambient and sky temperatures.

        let rain_raw = self
            .query(Command::GetRainFrequency)
            .await?
            .single_i32("R ")?;
        let pwm_raw = self.query(Command::GetPwm).await?.single_i32("Q ")?;

        let wind_speed_kph = if self.info.has_anemometer {
            let wind_raw = self.query(Command::GetWindSpeed).await?.single_i32("w ")?;
            Some(calibration::wind_speed_kph(wind_raw))
        } else {
            None
        };

        let supply = calibration::supply_voltage(zener_raw);
        Ok(RawSample {
            sky_temp_c: calibration::sky_temp_c(sky_raw),
            ambient_temp_c: calibration::ambient_temp_c(ambient_raw),
            wind_speed_kph,
            rain_frequency: f64::from(rain_raw),
            wetness_ohm: calibration::wetness_ohm(wetness_raw),
            pwm_percent: calibration::pwm_percent(pwm_raw),
            supply_voltage: supply,
            internal_voltage: calibration::channel_voltage(ambient_ntc_raw, supply),
        })
    }

    /// Field-wise arithmetic mean with per-field rounding, so the reported
    /// reading never carries resolution beyond the sensors' precision.
    fn combine(samples: &[RawSample]) -> Reading {
        let n = samples.len() as f64;
        let mean = |f: fn(&RawSample) -> f64| samples.iter().map(f).sum::<f64>() / n;

        let winds: Vec<f64> = samples.iter().filter_map(|s| s.wind_speed_kph).collect();
        let wind_speed_kph = if winds.is_empty() {
            None
        } else {
            Some(round_to(
                winds.iter().sum::<f64>() / winds.len() as f64,
                1,
            ))
        };

        let rain_frequency = round_to(mean(|s| s.rain_frequency), 0);
        Reading {
            timestamp: Utc::now(),
            sky_temp_c: round_to(mean(|s| s.sky_temp_c), 2),
            ambient_temp_c: round_to(mean(|s| s.ambient_temp_c), 2),
            wind_speed_kph,
            rain_frequency,
            rain_resistance_ohm: calibration::rain_resistance_ohm(rain_frequency),
            wetness_ohm: round_to(mean(|s| s.wetness_ohm), 0),
            pwm_heater_value: round_to(mean(|s| s.pwm_percent), 1),
            supply_voltage: round_to(mean(|s| s.supply_voltage), 2),
            internal_voltage: round_to(mean(|s| s.internal_voltage), 2),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
