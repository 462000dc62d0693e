// src/calibration.rs - Raw device codes to physical units
//
// Formulas and constants follow the CloudWatcher RS232 documents, section
// "Converting values sent by the device to meaningful units". The published
// constants are used exactly; conversions must stay bit-for-bit stable.

/// Full-scale value of the device's 10-bit ADC channels.
pub const ADC_FULL_SCALE: f64 = 1023.0;

/// Zener reference constant used to derive the supply rail.
pub const ZENER_CONSTANT: f64 = 3.0;

/// Pull-up resistor on the wetness channel, ohms.
pub const WETNESS_PULLUP_OHM: f64 = 1000.0;

/// Rain sensor NTC beta coefficient.
pub const RAIN_BETA: f64 = 3450.0;

/// Rain sensor NTC resistance ratio at 25 C.
pub const RAIN_RES_AT_25: f64 = 1.0;

/// Pull-up on the rain sensor NTC divider, kilo-ohms.
pub const RAIN_PULLUP_KOHM: f64 = 1.0;

/// Absolute zero offset, Celsius.
pub const ABS_ZERO_C: f64 = 273.15;

/// Anemometer raw counts to km/h. The manual also suggests adding 3 km/h,
/// which in practice reads high and is deliberately not applied.
pub const WIND_FACTOR: f64 = 0.84;

/// Maximum heater PWM code.
pub const PWM_MAX_CODE: u16 = 1023;

/// Sky IR temperature is reported in hundredths of a degree.
pub fn sky_temp_c(raw: i32) -> f64 {
    f64::from(raw) / 100.0
}

/// Ambient sensor temperature is reported in hundredths of a degree.
pub fn ambient_temp_c(raw: i32) -> f64 {
    f64::from(raw) / 100.0
}

/// Anemometer counts to km/h. Negative counts clamp to zero.
pub fn wind_speed_kph(raw: i32) -> f64 {
    f64::from(raw.max(0)) * WIND_FACTOR
}

/// PWM duty code (0..=1023) to percent.
pub fn pwm_percent(raw: i32) -> f64 {
    f64::from(raw.clamp(0, 1023)) * 100.0 / ADC_FULL_SCALE
}

/// Percent to PWM duty code, clamped to the valid range.
pub fn pwm_code(percent: f64) -> u16 {
    let percent = percent.clamp(0.0, 100.0);
    (percent * ADC_FULL_SCALE / 100.0).round() as u16
}

/// Supply rail voltage from the zener reference channel. The divisor is
/// capped to [1, 1023] so a pathological zero code yields the sentinel
/// extreme instead of infinity.
pub fn supply_voltage(raw: i32) -> f64 {
    ADC_FULL_SCALE * ZENER_CONSTANT / f64::from(raw.clamp(1, 1023))
}

/// Voltage seen on an ADC channel given the supply rail.
pub fn channel_voltage(raw: i32, vcc: f64) -> f64 {
    f64::from(raw.clamp(0, 1023)) / ADC_FULL_SCALE * vcc
}

/// Wetness channel code to resistance in ohms. Codes are capped to
/// [1, 1022] so the divider never degenerates; the caps act as the dry/wet
/// sentinel extremes.
pub fn wetness_ohm(raw: i32) -> f64 {
    let code = f64::from(raw.clamp(1, 1022));
    WETNESS_PULLUP_OHM / (ADC_FULL_SCALE / code - 1.0)
}

/// Rain sensor NTC code to temperature in Celsius via the beta formula.
/// Codes cap to [1, 1022]; the caps map to the hot/cold sentinel extremes.
pub fn rain_sensor_temp_c(raw: i32) -> f64 {
    let code = f64::from(raw.clamp(1, 1022));
    let r = (RAIN_PULLUP_KOHM / (ADC_FULL_SCALE / code - 1.0)) / RAIN_RES_AT_25;
    1.0 / (r.ln() / RAIN_BETA + 1.0 / (ABS_ZERO_C + 25.0)) - ABS_ZERO_C
}

/// The rain frequency counter maps one-to-one onto the sensor's equivalent
/// resistance scale (one count per ohm across the fixed pull-up).
pub fn rain_resistance_ohm(frequency: f64) -> f64 {
    frequency.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperatures_are_hundredths() {
        assert_eq!(sky_temp_c(-512), -5.12);
        assert_eq!(ambient_temp_c(1550), 15.5);
    }

    #[test]
    fn wind_scales_and_clamps() {
        assert_eq!(wind_speed_kph(100), 84.0);
        assert_eq!(wind_speed_kph(-5), 0.0);
    }

    #[test]
    fn pwm_round_trips_within_resolution() {
        assert_eq!(pwm_code(0.0), 0);
        assert_eq!(pwm_code(100.0), 1023);
        assert_eq!(pwm_code(150.0), 1023);
        let pct = pwm_percent(512);
        assert!((pct - 50.048).abs() < 0.01);
        assert_eq!(pwm_code(pct), 512);
    }

    #[test]
    fn supply_voltage_caps_divisor() {
        // Nominal zener code around 620 gives a ~4.95 V rail.
        let v = supply_voltage(620);
        assert!((v - 4.95).abs() < 0.01);
        // A zero code clamps instead of producing infinity.
        assert!(supply_voltage(0).is_finite());
        assert_eq!(supply_voltage(0), supply_voltage(1));
    }

    #[test]
    fn wetness_resistance_is_monotonic_and_finite() {
        let dry = wetness_ohm(1000);
        let damp = wetness_ohm(700);
        let wet = wetness_ohm(400);
        assert!(dry > damp && damp > wet);
        assert!(wetness_ohm(0).is_finite());
        assert!(wetness_ohm(1023).is_finite());
    }

    #[test]
    fn rain_sensor_temp_is_monotonic_decreasing_in_code() {
        // Higher code = larger NTC resistance = colder sensor.
        let warm = rain_sensor_temp_c(200);
        let mid = rain_sensor_temp_c(512);
        let cold = rain_sensor_temp_c(800);
        assert!(warm > mid && mid > cold);
        // Midpoint of the divider is the 25 C reference point.
        // code 511.5 would be exact; 512 lands within a tenth of a degree.
        assert!((mid - 25.0).abs() < 0.1);
        assert!(rain_sensor_temp_c(0).is_finite());
        assert!(rain_sensor_temp_c(1023).is_finite());
    }

    #[test]
    fn conversions_are_deterministic() {
        for raw in [1, 100, 512, 900, 1022] {
            assert_eq!(rain_sensor_temp_c(raw), rain_sensor_temp_c(raw));
            assert_eq!(wetness_ohm(raw), wetness_ohm(raw));
            assert_eq!(supply_voltage(raw), supply_voltage(raw));
        }
    }
}
