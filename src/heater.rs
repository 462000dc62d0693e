// src/heater.rs - Rain sensor heater state machine
//
// Keeps the rain sensor above the dew point with a modest ambient-tracking
// duty cycle, and breaks ice buildup with timed full-power bursts. The step
// function is pure given (previous state, reading, now); the clock is always
// injected so the machine can be driven with a synthetic timeline.
use crate::config::HeaterConfig;
use crate::reading::Reading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum heater duty, percent.
pub const MAX_POWER: u8 = 100;

/// Idle-mode duty added per degree of target lift above ambient.
const POWER_PER_DELTA_C: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaterPhase {
    Idle,
    Impulse,
    Cooldown,
}

/// The controller's memory between cycles. Mutated only by returning a new
/// state from `HeaterController::step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaterState {
    /// Current duty cycle, percent.
    pub power: u8,
    pub phase: HeaterPhase,
    pub phase_started_at: DateTime<Utc>,
    /// Start of the most recent impulse, used to space bursts apart.
    pub last_impulse_at: Option<DateTime<Utc>>,
}

impl HeaterState {
    pub fn idle(power: u8, now: DateTime<Utc>) -> Self {
        Self {
            power,
            phase: HeaterPhase::Idle,
            phase_started_at: now,
            last_impulse_at: None,
        }
    }
}

pub struct HeaterController {
    cfg: HeaterConfig,
}

impl HeaterController {
    pub fn new(cfg: HeaterConfig) -> Self {
        Self { cfg }
    }

    /// Advance the state machine by one control cycle.
    pub fn step(&self, prev: &HeaterState, reading: &Reading, now: DateTime<Utc>) -> HeaterState {
        let cfg = &self.cfg;
        match prev.phase {
            HeaterPhase::Impulse => {
                let elapsed = seconds_since(prev.phase_started_at, now);
                if elapsed >= cfg.impulse_duration_s {
                    tracing::debug!("Impulse complete after {:.0} s, cooling down", elapsed);
                    HeaterState {
                        power: cfg.min_power,
                        phase: HeaterPhase::Cooldown,
                        phase_started_at: now,
                        last_impulse_at: prev.last_impulse_at,
                    }
                } else {
                    HeaterState {
                        power: MAX_POWER,
                        ..prev.clone()
                    }
                }
            }
            HeaterPhase::Cooldown => {
                if self.cycle_elapsed(prev.last_impulse_at, now) {
                    HeaterState {
                        power: self.idle_power(reading.ambient_temp_c),
                        phase: HeaterPhase::Idle,
                        phase_started_at: now,
                        last_impulse_at: prev.last_impulse_at,
                    }
                } else {
                    HeaterState {
                        power: cfg.min_power,
                        ..prev.clone()
                    }
                }
            }
            HeaterPhase::Idle => {
                if self.icing_risk(reading) && self.cycle_elapsed(prev.last_impulse_at, now) {
                    tracing::info!(
                        "Icing risk (sky delta {:.1} C), starting heater impulse",
                        reading.sky_delta_c()
                    );
                    HeaterState {
                        power: MAX_POWER,
                        phase: HeaterPhase::Impulse,
                        phase_started_at: now,
                        last_impulse_at: Some(now),
                    }
                } else {
                    HeaterState {
                        power: self.idle_power(reading.ambient_temp_c),
                        ..prev.clone()
                    }
                }
            }
        }
    }

    /// A clear, cold sky radiates the sensor below the dew point; frost forms
    /// when the sky-ambient delta drops past the impulse threshold.
    fn icing_risk(&self, reading: &Reading) -> bool {
        reading.sky_delta_c() <= -self.cfg.impulse_temp_c
    }

    fn cycle_elapsed(&self, last_impulse_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_impulse_at {
            Some(at) => seconds_since(at, now) >= self.cfg.impulse_cycle_s,
            None => true,
        }
    }

    /// Idle duty from the ambient-tracking ramp: a fixed lift target below
    /// low_temp_c, a smaller one above high_temp_c, linear in between, mapped
    /// to duty at POWER_PER_DELTA_C and floored at min_power.
    fn idle_power(&self, ambient_c: f64) -> u8 {
        let cfg = &self.cfg;
        let delta = if ambient_c < cfg.low_temp_c {
            cfg.low_delta_c
        } else if ambient_c > cfg.high_temp_c {
            cfg.high_delta_c
        } else {
            let frac = (ambient_c - cfg.low_temp_c) / (cfg.high_temp_c - cfg.low_temp_c);
            cfg.low_delta_c + frac * (cfg.high_delta_c - cfg.low_delta_c)
        };
        let power = f64::from(cfg.min_power) + delta * POWER_PER_DELTA_C;
        power.clamp(f64::from(cfg.min_power), f64::from(MAX_POWER)).round() as u8
    }
}

fn seconds_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    now.signed_duration_since(earlier)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0
}
