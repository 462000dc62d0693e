// src/main.rs - Weather station host entry point
use clap::Parser;
use skywatch_rs::config;
use skywatch_rs::hardware::SerialTransport;
use skywatch_rs::heater::{HeaterController, HeaterState};
use skywatch_rs::protocol::Codec;
use skywatch_rs::safety::{Factor, SafetyEvaluator, SafetyStatus};
use skywatch_rs::station::WeatherStation;
use skywatch_rs::storage::ReadingStore;
use skywatch_rs::web::api;
use skywatch_rs::web::models::WeatherSnapshot;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "weather-host", about = "CloudWatcher weather station host")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "weather.toml")]
    config: String,

    /// Capture a single reading, print it as JSON, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting weather station host");

    let config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let transport = SerialTransport::new(&config.serial.port, config.serial.baud);
    let codec = Codec::new(Duration::from_millis(config.serial.exchange_timeout_ms));
    let mut station = WeatherStation::new(
        transport,
        codec,
        config.capture.clone(),
        config.heater.min_power,
    );
    station.connect().await?;

    // Validation already rejected unknown factor names.
    let ignore: Vec<Factor> = config
        .safety
        .ignore_factors
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    let evaluator = SafetyEvaluator::new(
        config.thresholds.clone(),
        ignore,
        Duration::from_secs_f64(config.safety.safety_delay_minutes * 60.0),
    );
    let heater = HeaterController::new(config.heater.clone());
    let mut heater_state = HeaterState::idle(config.heater.min_power, chrono::Utc::now());
    let mut safety_status: Option<SafetyStatus> = None;

    let store = config.storage.path.as_deref().map(ReadingStore::new);
    if let Some(store) = &store {
        tracing::info!("Logging readings to {}", store.path().display());
    }

    if cli.once {
        let reading = station.capture().await?;
        let now = chrono::Utc::now();
        let safety = evaluator.evaluate(&reading, None, now);
        let snapshot = WeatherSnapshot {
            reading,
            safety,
            heater: heater_state,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let state = api::shared_state(config.web.history);
    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.web.bind_address, config.web.port
    ))
    .await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Web server stopped: {}", e);
        }
    });

    let mut consecutive_failures: u32 = 0;
    loop {
        match station.capture().await {
            Ok(reading) => {
                consecutive_failures = 0;
                let now = chrono::Utc::now();

                let safety = evaluator.evaluate(&reading, safety_status.as_ref(), now);
                if !safety.is_safe {
                    tracing::warn!(
                        "Conditions unsafe since {:?}: {:?}",
                        safety.unsafe_since,
                        safety.factors
                    );
                }

                heater_state = heater.step(&heater_state, &reading, now);
                if let Err(e) = station.set_heater_power(f64::from(heater_state.power)).await {
                    tracing::warn!("Failed to set heater power: {}", e);
                }

                let snapshot = WeatherSnapshot {
                    reading,
                    safety: safety.clone(),
                    heater: heater_state.clone(),
                };
                if let Some(store) = &store {
                    if let Err(e) = store.append(&snapshot).await {
                        tracing::warn!("Failed to log reading: {}", e);
                    }
                }
                api::publish(&state, snapshot).await;
                safety_status = Some(safety);
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    "Capture failed ({} consecutive): {}",
                    consecutive_failures,
                    e
                );
                if let Ok(errors) = station.internal_errors().await {
                    tracing::info!("Device error counters: {:?}", errors);
                }
                if consecutive_failures >= config.capture.max_consecutive_failures {
                    match station.reconnect().await {
                        Ok(()) => consecutive_failures = 0,
                        Err(e) => tracing::error!("Reconnect failed: {}", e),
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_secs_f64(config.capture.capture_delay_s)).await;
    }
}
