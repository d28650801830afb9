/// Voltage THZ Monitor
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Connects to a heat pump, detects its firmware and prints every register of
/// the matching register map, block by block.
///
/// Usage:
///   thz_monitor <config.json | host[:port] | /dev/ttyUSB0> [register-map.json] [interval-secs]

use std::time::Duration;
use log::{error, info, warn};

use voltage_thz::utils::format::{format_duration, format_metrics};
use voltage_thz::{connect, RegisterCatalog, SessionConfig, ThzResult, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT};

fn parse_target(target: &str) -> ThzResult<SessionConfig> {
    if target.ends_with(".json") {
        return SessionConfig::from_json_file(target);
    }
    if target.starts_with("/dev/") || target.to_ascii_uppercase().starts_with("COM") {
        return Ok(SessionConfig::serial(target, DEFAULT_BAUD_RATE));
    }
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|e| voltage_thz::ThzError::configuration(format!("Invalid port '{}': {}", port, e)))?;
            Ok(SessionConfig::tcp(host, port))
        }
        None => Ok(SessionConfig::tcp(target, DEFAULT_TCP_PORT)),
    }
}

/// Split `<target> [map.json] [interval-secs]`
fn parse_args<I: Iterator<Item = String>>(
    args: I,
) -> ThzResult<(String, Option<String>, Option<Duration>)> {
    let mut args = args.peekable();
    let target = args
        .next()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_TCP_PORT));
    let map_file = args.next_if(|arg| arg.ends_with(".json"));
    let interval = match args.next() {
        Some(arg) => {
            let secs = arg.parse::<u64>().map_err(|e| {
                voltage_thz::ThzError::configuration(format!("Invalid interval '{}': {}", arg, e))
            })?;
            Some(Duration::from_secs(secs))
        }
        None => None,
    };
    Ok((target, map_file, interval))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🌡️  Voltage THZ Monitor");
    println!("======================");

    let (target, map_file, interval) = parse_args(std::env::args().skip(1))?;

    let config = parse_target(&target)?;
    let mut catalog = RegisterCatalog::builtin()?;
    if let Some(path) = &map_file {
        let json = std::fs::read_to_string(path)?;
        let map = catalog.load_json(&json)?;
        info!("📄 Loaded register map for firmware {} from {}", map.firmware(), path);
    }

    println!("Connecting to {}...", target);
    let session = match connect(&config).await {
        Ok(session) => {
            println!("✅ Connected successfully!");
            session
        }
        Err(e) => {
            eprintln!("❌ Failed to connect: {}", e);
            return Ok(());
        }
    };

    let map = match session.initialize(&catalog).await {
        Ok(map) => map,
        Err(e) => {
            eprintln!("❌ Cannot select a register map: {}", e);
            eprintln!("   Known firmware versions: {}", catalog.firmwares().join(", "));
            session.close().await?;
            return Ok(());
        }
    };
    println!("🔧 Firmware {} ({} registers)", map.firmware(), map.len());

    loop {
        for block in map.blocks() {
            println!("\n📖 Block 0x{:04X}", block);
            match session.read_block_values(block).await {
                Ok(values) => {
                    for (name, value) in values {
                        let unit = map
                            .get(&name)
                            .and_then(|register| register.unit.clone())
                            .unwrap_or_default();
                        println!("  {:<28} {} {}", name, value, unit);
                    }
                }
                Err(e) if e.is_transport_error() || matches!(e, voltage_thz::ThzError::Communication { .. }) => {
                    error!("❌ Device unavailable: {}", e);
                }
                Err(e) => warn!("⚠️  Block 0x{:04X} could not be decoded: {}", block, e),
            }
        }

        let stats = session.stats().await;
        println!("\n{}", format_metrics(&stats.metrics));
        println!(
            "Cache: {} hit(s), {} miss(es); {} reconnect(s), {} retry(ies)",
            stats.cache_hits, stats.cache_misses, stats.reconnects, stats.retries
        );

        match interval {
            Some(interval) => {
                println!("\n⏳ Next poll in {}", format_duration(interval));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("🛑 Received interrupt signal, stopping monitor...");
                        break;
                    }
                }
            }
            None => break,
        }
    }

    session.close().await?;
    println!("\n👋 Monitor finished");
    Ok(())
}
