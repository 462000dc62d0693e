// src/safety.rs - Multi-factor safety evaluation with hysteresis
use crate::config::Thresholds;
use crate::reading::Reading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A weather condition contributing to the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Cloud,
    Wind,
    /// The device exposes no gust channel separate from wind speed; the gust
    /// factor evaluates the same instantaneous value against the gust
    /// thresholds. Kept as a distinct factor so it can be tuned and ignored
    /// independently.
    Gust,
    Rain,
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Factor::Cloud => "cloud",
            Factor::Wind => "wind",
            Factor::Gust => "gust",
            Factor::Rain => "rain",
        };
        f.write_str(name)
    }
}

impl FromStr for Factor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloud" => Ok(Factor::Cloud),
            "wind" => Ok(Factor::Wind),
            "gust" => Ok(Factor::Gust),
            "rain" => Ok(Factor::Rain),
            other => Err(format!("unknown safety factor '{other}'")),
        }
    }
}

/// Per-factor verdict. Warning is informational and never flips the overall
/// verdict on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Warning,
    Unsafe,
}

/// Result of evaluating one reading, including the hysteresis bookkeeping
/// carried between cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub is_safe: bool,
    pub factors: BTreeMap<Factor, Verdict>,
    pub evaluated_at: DateTime<Utc>,
    /// First unsafe verdict of the current unsafe episode.
    pub unsafe_since: Option<DateTime<Utc>>,
    /// Most recent unsafe verdict; the hysteresis clock measures from here.
    pub last_unsafe_at: Option<DateTime<Utc>>,
}

pub struct SafetyEvaluator {
    thresholds: Thresholds,
    ignore: Vec<Factor>,
    safety_delay: Duration,
}

impl SafetyEvaluator {
    pub fn new(thresholds: Thresholds, ignore: Vec<Factor>, safety_delay: std::time::Duration) -> Self {
        let safety_delay =
            Duration::from_std(safety_delay).unwrap_or_else(|_| Duration::MAX);
        Self {
            thresholds,
            ignore,
            safety_delay,
        }
    }

    /// Evaluate one reading against the thresholds.
    ///
    /// Total over the reading domain: never fails on a well-formed reading.
    /// The overall verdict is unsafe while any non-ignored factor is unsafe,
    /// and stays unsafe until `safety_delay` has elapsed after the most
    /// recent unsafe verdict with no further unsafe verdicts in between.
    pub fn evaluate(
        &self,
        reading: &Reading,
        previous: Option<&SafetyStatus>,
        now: DateTime<Utc>,
    ) -> SafetyStatus {
        let t = &self.thresholds;
        let mut factors = BTreeMap::new();

        // Cloud cover shows as the sky warming toward ambient: a delta near
        // zero is overcast, a strongly negative delta is clear.
        let delta = reading.sky_delta_c();
        let cloud = if delta >= t.very_cloudy_delta_c {
            Verdict::Unsafe
        } else if delta >= t.cloudy_delta_c {
            Verdict::Warning
        } else {
            Verdict::Safe
        };
        factors.insert(Factor::Cloud, cloud);

        // A device without an anemometer reports no wind; the wind and gust
        // factors then stay Safe and carry no weight in the overall verdict.
        let (wind, gust) = match reading.wind_speed_kph {
            Some(ws) => (
                tiered(ws, t.windy_kph, t.very_windy_kph),
                tiered(ws, t.gusty_kph, t.very_gusty_kph),
            ),
            None => (Verdict::Safe, Verdict::Safe),
        };
        factors.insert(Factor::Wind, wind);
        factors.insert(Factor::Gust, gust);

        // Binary per device semantics: the rain channels have no warning tier.
        let rain = if reading.rain_resistance_ohm <= t.rainy_ohm
            || reading.wetness_ohm <= t.wet_ohm
        {
            Verdict::Unsafe
        } else {
            Verdict::Safe
        };
        factors.insert(Factor::Rain, rain);

        let unsafe_now = factors
            .iter()
            .any(|(factor, verdict)| *verdict == Verdict::Unsafe && !self.ignore.contains(factor));

        let (is_safe, unsafe_since, last_unsafe_at) = if unsafe_now {
            let since = previous.and_then(|p| p.unsafe_since).unwrap_or(now);
            (false, Some(since), Some(now))
        } else {
            match previous.and_then(|p| p.last_unsafe_at.map(|at| (p, at))) {
                Some((prev, last)) if now.signed_duration_since(last) < self.safety_delay => {
                    // Still inside the holdoff window; keep reporting unsafe
                    // without restarting the clock.
                    (false, prev.unsafe_since, Some(last))
                }
                _ => (true, None, None),
            }
        };

        SafetyStatus {
            is_safe,
            factors,
            evaluated_at: now,
            unsafe_since,
            last_unsafe_at,
        }
    }
}

fn tiered(value: f64, warning_at: f64, unsafe_at: f64) -> Verdict {
    if value >= unsafe_at {
        Verdict::Unsafe
    } else if value >= warning_at {
        Verdict::Warning
    } else {
        Verdict::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(sky: f64, ambient: f64, wind: Option<f64>, rain_ohm: f64, wet_ohm: f64) -> Reading {
        Reading {
            timestamp: Utc::now(),
            sky_temp_c: sky,
            ambient_temp_c: ambient,
            wind_speed_kph: wind,
            rain_frequency: rain_ohm,
            rain_resistance_ohm: rain_ohm,
            wetness_ohm: wet_ohm,
            pwm_heater_value: 10.0,
            supply_voltage: 4.95,
            internal_voltage: 1.9,
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            cloudy_delta_c: -25.0,
            very_cloudy_delta_c: -15.0,
            windy_kph: 50.0,
            very_windy_kph: 75.0,
            gusty_kph: 100.0,
            very_gusty_kph: 125.0,
            wet_ohm: 2200.0,
            rainy_ohm: 1800.0,
        }
    }

    fn evaluator(delay_secs: u64) -> SafetyEvaluator {
        SafetyEvaluator::new(
            thresholds(),
            Vec::new(),
            std::time::Duration::from_secs(delay_secs),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn borderline_reading_warns_but_stays_safe() {
        // Sky -5, ambient 15 (delta -20), wind 60: both factors warn, none
        // unsafe, so the overall verdict stays safe.
        let eval = evaluator(900);
        let r = reading(-5.0, 15.0, Some(60.0), 2875.0, 30000.0);
        let status = eval.evaluate(&r, None, at(0));
        assert_eq!(status.factors[&Factor::Cloud], Verdict::Warning);
        assert_eq!(status.factors[&Factor::Wind], Verdict::Warning);
        assert_eq!(status.factors[&Factor::Gust], Verdict::Safe);
        assert_eq!(status.factors[&Factor::Rain], Verdict::Safe);
        assert!(status.is_safe);
        assert!(status.unsafe_since.is_none());
    }

    #[test]
    fn overcast_sky_is_unsafe() {
        let eval = evaluator(900);
        let r = reading(5.0, 15.0, Some(10.0), 2875.0, 30000.0);
        let status = eval.evaluate(&r, None, at(0));
        assert_eq!(status.factors[&Factor::Cloud], Verdict::Unsafe);
        assert!(!status.is_safe);
        assert_eq!(status.unsafe_since, Some(at(0)));
    }

    #[test]
    fn clear_cold_sky_is_safe() {
        let eval = evaluator(900);
        let r = reading(-25.0, 10.0, Some(10.0), 2875.0, 30000.0);
        let status = eval.evaluate(&r, None, at(0));
        assert_eq!(status.factors[&Factor::Cloud], Verdict::Safe);
        assert!(status.is_safe);
    }

    #[test]
    fn rain_factor_is_binary_on_either_channel() {
        let eval = evaluator(900);
        let dry = eval.evaluate(&reading(-30.0, 10.0, None, 2875.0, 30000.0), None, at(0));
        assert_eq!(dry.factors[&Factor::Rain], Verdict::Safe);

        let raining = eval.evaluate(&reading(-30.0, 10.0, None, 1700.0, 30000.0), None, at(0));
        assert_eq!(raining.factors[&Factor::Rain], Verdict::Unsafe);
        assert!(!raining.is_safe);

        let wet = eval.evaluate(&reading(-30.0, 10.0, None, 2875.0, 2100.0), None, at(0));
        assert_eq!(wet.factors[&Factor::Rain], Verdict::Unsafe);
    }

    #[test]
    fn very_windy_is_unsafe_and_gust_tracks_same_value() {
        let eval = evaluator(900);
        let status = eval.evaluate(&reading(-30.0, 10.0, Some(130.0), 2875.0, 30000.0), None, at(0));
        assert_eq!(status.factors[&Factor::Wind], Verdict::Unsafe);
        assert_eq!(status.factors[&Factor::Gust], Verdict::Unsafe);
        assert!(!status.is_safe);
    }

    #[test]
    fn missing_anemometer_leaves_wind_factors_safe() {
        let eval = evaluator(900);
        let status = eval.evaluate(&reading(-30.0, 10.0, None, 2875.0, 30000.0), None, at(0));
        assert_eq!(status.factors[&Factor::Wind], Verdict::Safe);
        assert_eq!(status.factors[&Factor::Gust], Verdict::Safe);
        assert!(status.is_safe);
    }

    #[test]
    fn ignored_factor_is_reported_but_not_counted() {
        let eval = SafetyEvaluator::new(
            thresholds(),
            vec![Factor::Rain],
            std::time::Duration::from_secs(900),
        );
        let status = eval.evaluate(&reading(-30.0, 10.0, None, 1500.0, 30000.0), None, at(0));
        assert_eq!(status.factors[&Factor::Rain], Verdict::Unsafe);
        assert!(status.is_safe);
    }

    #[test]
    fn unsafe_holds_through_safety_delay() {
        let eval = evaluator(900);
        let bad = reading(5.0, 15.0, None, 2875.0, 30000.0);
        let good = reading(-30.0, 15.0, None, 2875.0, 30000.0);

        let s0 = eval.evaluate(&bad, None, at(0));
        assert!(!s0.is_safe);

        // A safe reading right after does not clear the verdict.
        let s1 = eval.evaluate(&good, Some(&s0), at(60));
        assert!(!s1.is_safe);
        assert_eq!(s1.unsafe_since, Some(at(0)));

        // Still inside the window.
        let s2 = eval.evaluate(&good, Some(&s1), at(899));
        assert!(!s2.is_safe);

        // Window elapsed with no further unsafe verdicts: clear.
        let s3 = eval.evaluate(&good, Some(&s2), at(901));
        assert!(s3.is_safe);
        assert!(s3.unsafe_since.is_none());
        assert!(s3.last_unsafe_at.is_none());
    }

    #[test]
    fn unsafe_verdict_inside_window_resets_the_clock() {
        let eval = evaluator(900);
        let bad = reading(5.0, 15.0, None, 2875.0, 30000.0);
        let good = reading(-30.0, 15.0, None, 2875.0, 30000.0);

        let s0 = eval.evaluate(&bad, None, at(0));
        let s1 = eval.evaluate(&good, Some(&s0), at(500));
        assert!(!s1.is_safe);

        // Another unsafe verdict restarts the delay and keeps the original
        // episode start.
        let s2 = eval.evaluate(&bad, Some(&s1), at(600));
        assert!(!s2.is_safe);
        assert_eq!(s2.unsafe_since, Some(at(0)));
        assert_eq!(s2.last_unsafe_at, Some(at(600)));

        // 901 seconds after the first unsafe but only 301 after the last:
        // still unsafe.
        let s3 = eval.evaluate(&good, Some(&s2), at(901));
        assert!(!s3.is_safe);

        let s4 = eval.evaluate(&good, Some(&s3), at(1501));
        assert!(s4.is_safe);
    }
}
