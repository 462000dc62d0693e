// tests/storage.rs - JSON-lines archive round trip
use chrono::{TimeZone, Utc};
use skywatch_rs::reading::Reading;
use skywatch_rs::storage::ReadingStore;

fn reading(sky_temp_c: f64) -> Reading {
    Reading {
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        sky_temp_c,
        ambient_temp_c: 12.3,
        wind_speed_kph: None,
        rain_frequency: 2875.0,
        rain_resistance_ohm: 2875.0,
        wetness_ohm: 7317.0,
        pwm_heater_value: 10.0,
        supply_voltage: 4.95,
        internal_voltage: 1.94,
    }
}

#[tokio::test]
async fn appends_one_json_line_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readings.jsonl");
    let store = ReadingStore::new(&path);

    store.append(&reading(-30.0)).await.unwrap();
    store.append(&reading(-28.5)).await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: Reading = serde_json::from_str(lines[0]).unwrap();
    let second: Reading = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(first, reading(-30.0));
    assert_eq!(second.sky_temp_c, -28.5);
}

#[tokio::test]
async fn creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive").join("2026").join("readings.jsonl");
    let store = ReadingStore::new(&path);

    store.append(&reading(-30.0)).await.unwrap();
    assert!(path.exists());
}
