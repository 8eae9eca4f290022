use anyhow::{anyhow, Context, Result};
use athan_rs::client::AthanClient;
use athan_rs::config::ClientConfig;
use athan_rs::location::CitySelection;
use athan_rs::models::{ItemOverrides, ItemSetting, LocationConfig, SCHEDULE_ITEMS};
use athan_rs::settings::normalize;
use athan_rs::sync::SyncEngine;
use clap::Parser;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: status, config, countries, audio_files, item, save_location, save_schedule, test_play, test_reminder, stop_audio
    #[arg(short, long)]
    command: String,

    /// Service URL (or set ATHAN_BASE_URL env var)
    #[arg(long, name = "base_url")]
    base_url: Option<String>,

    /// Schedule item name (for item, save_schedule, test_play and test_reminder)
    #[arg(long, name = "item")]
    item: Option<String>,

    /// Partial item settings as JSON, merged over the stored settings (for save_schedule)
    #[arg(long, name = "item_json")]
    item_json: Option<String>,

    /// Country from the catalog (for save_location)
    #[arg(long, name = "country")]
    country: Option<String>,

    /// City from the catalog; omit to keep typed coordinates (for save_location)
    #[arg(long, name = "city")]
    city: Option<String>,

    /// Latitude for a custom location (for save_location)
    #[arg(long, name = "latitude", allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Longitude for a custom location (for save_location)
    #[arg(long, name = "longitude", allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// Volume override for test_play and test_reminder
    #[arg(long, name = "volume")]
    volume: Option<f64>,

    /// Comma separated device uuids (for stop_audio; empty means all devices)
    #[arg(long, name = "devices", value_delimiter = ',')]
    devices: Vec<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

// example usage:
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command status
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command item --item Fajr
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command save_location --country "United Kingdom" --city London
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command save_location --country Egypt --latitude 30.1 --longitude 31.2
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command save_schedule --item Isha --item_json '{"reminder_enabled": true, "reminder_offset": 10}'
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command test_play --item Maghrib --volume 0.4
// ATHAN_BASE_URL=http://localhost:8000 ./target/release/athan_cli --command stop_audio --devices uuid-1,uuid-2

fn require_item(item: Option<String>) -> Result<String> {
    let item = item.ok_or_else(|| anyhow!("--item is required for this command"))?;
    if !SCHEDULE_ITEMS.contains(&item.as_str()) {
        return Err(anyhow!("Unknown item '{}', expected one of {:?}", item, SCHEDULE_ITEMS));
    }
    Ok(item)
}

/// Recursively overlays `patch` onto `base`, key by key.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(format!("athan_rs={}", args.log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env_with_base_url(args.base_url.clone())?;
    let client = AthanClient::new(&config)?;
    let mut engine = SyncEngine::new(client, &config);

    match args.command.as_str() {
        "status" => {
            let read = engine.status(true).await;
            match read.snapshot() {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?),
                None => {
                    eprintln!("Failed to get status: {}", read.error().map(|e| e.to_string()).unwrap_or_default());
                    std::process::exit(1);
                }
            }
        }
        "config" => {
            let document = engine.refresh_config().await?;
            println!("{}", serde_json::to_string_pretty(document.as_ref())?);
        }
        "countries" => {
            engine.ensure_catalog().await?;
            println!("{}", serde_json::to_string_pretty(engine.resolver().catalog())?);
        }
        "audio_files" => {
            engine.refresh_config().await?;
            println!("{}", serde_json::to_string_pretty(engine.audio_assets().as_ref())?);
        }
        "item" => {
            let item = require_item(args.item)?;
            engine.refresh_config().await?;
            println!("{}", serde_json::to_string_pretty(&engine.item_config(&item))?);
        }
        "save_location" => {
            engine.ensure_catalog().await?;
            engine.refresh_config().await?;

            let mut location = engine.location().cloned().unwrap_or_else(|| LocationConfig::new(0.0, 0.0));
            if let Some(latitude) = args.latitude {
                location.latitude = latitude;
            }
            if let Some(longitude) = args.longitude {
                location.longitude = longitude;
            }
            let country = args
                .country
                .or_else(|| location.country.clone())
                .unwrap_or_else(|| engine.location_selection().country);
            let city = match args.city {
                Some(name) => CitySelection::Named(name),
                None => CitySelection::Custom,
            };
            let applied = engine.resolver().apply_selection(&mut location, &country, &city);
            if applied != city {
                eprintln!("City not listed for {}, saving as a custom location", country);
            }

            match engine.save_location(location).await {
                Ok(report) => {
                    println!("{}", report.message);
                    if let Some(e) = report.config_error {
                        eprintln!("Saved, but failed to reload config: {}", e);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to save location: {}", e);
                    std::process::exit(1);
                }
            }
        }
        "save_schedule" => {
            let item = require_item(args.item)?;
            let patch: Value = serde_json::from_str(
                args.item_json.as_deref().ok_or_else(|| anyhow!("--item_json is required for save_schedule"))?,
            )
            .context("item_json must be a JSON object")?;

            engine.refresh_config().await?;
            let current = ItemOverrides::from(engine.item_config(&item));
            let mut merged = serde_json::to_value(current)?;
            merge_json(&mut merged, patch);
            let overrides: ItemOverrides = serde_json::from_value(merged).context("invalid item settings")?;
            let updated = normalize(Some(&ItemSetting::Detailed(overrides)));

            match engine.save_items([(item.clone(), updated)]).await {
                Ok(report) => {
                    println!("{}", report.message);
                    println!("{}", serde_json::to_string_pretty(&engine.item_config(&item))?);
                }
                Err(e) => {
                    eprintln!("Failed to save {}: {}", item, e);
                    std::process::exit(1);
                }
            }
        }
        "test_play" | "test_reminder" => {
            let item = require_item(args.item)?;
            engine.refresh_config().await?;
            let mut settings = engine.item_config(&item);

            let response = if args.command == "test_play" {
                if let Some(volume) = args.volume {
                    settings.primary_volume = volume;
                }
                engine.trigger_primary(&item, &settings).await
            } else {
                if let Some(volume) = args.volume {
                    settings.secondary_volume = volume;
                }
                engine.trigger_secondary(&item, &settings).await
            };

            if response.is_success() {
                println!("{}", response.message);
            } else {
                eprintln!("Error: {}", response.message);
                std::process::exit(1);
            }
        }
        "stop_audio" => {
            let devices: Vec<String> = args.devices.into_iter().filter(|d| !d.trim().is_empty()).collect();
            let response = engine.stop_audio(devices).await;
            if response.is_success() {
                println!("Audio stopped");
            } else {
                eprintln!("Error stopping audio: {}", response.message);
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("Unknown command: {}", args.command);
            eprintln!(
                "Available commands: status, config, countries, audio_files, item, save_location, save_schedule, test_play, test_reminder, stop_audio"
            );
            std::process::exit(1);
        }
    }

    Ok(())
}
