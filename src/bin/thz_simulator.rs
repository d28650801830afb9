/// Voltage THZ Simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Serves a simulated heat pump over TCP, seeded from a built-in register map,
/// with slowly changing temperatures.
///
/// Usage:
///   thz_simulator [bind-address] [firmware]

use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use log::{error, info};

use voltage_thz::{BlockBank, RegisterCatalog, ThzTcpSimulator, Value, DEFAULT_TCP_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🚀 Voltage THZ Simulator");
    println!("========================");

    let mut args = std::env::args().skip(1);
    let bind_address = args
        .next()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_TCP_PORT));
    let firmware = args.next().unwrap_or_else(|| "539".to_string());

    let map = RegisterCatalog::builtin()?.select(&firmware)?;
    let version: u16 = firmware
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(0);
    let bank = BlockBank::for_register_map(&map, version)?;

    info!("🔧 Initializing values for firmware {}...", map.firmware());
    let seed = [
        ("outsideTemp", 4.5),
        ("flowTemp", 32.1),
        ("returnTemp", 28.4),
        ("dhwTemp", 47.0),
        ("p01RoomTempDay", 21.0),
        ("p04DHWsetTempDay", 50.0),
    ];
    for (name, value) in seed {
        if let Some(register) = map.get(name) {
            bank.set_value(register, &Value::Number(value))?;
        }
    }

    let mut simulator = ThzTcpSimulator::new(&bind_address, bank.clone())?;
    let addr = simulator.start().await?;
    info!("✅ Simulator listening on {}", addr);

    // Outside temperature drifts between -5 and +10 °C.
    let outside = map.get("outsideTemp").cloned();
    tokio::spawn(async move {
        let Some(register) = outside else { return };
        let mut ticker = interval(Duration::from_secs(10));
        let mut step = 0i32;
        loop {
            ticker.tick().await;
            let value = -5.0 + f64::from(step % 31) * 0.5;
            if let Err(e) = bank.set_value(&register, &Value::Number(value)) {
                error!("❌ Failed to update outside temperature: {}", e);
            }
            step = step.wrapping_add(1);
        }
    });

    println!("\n📋 Simulator running...");
    println!("💡 Connect with: thz_monitor {}", addr);
    println!("   Press Ctrl+C to stop the simulator");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received interrupt signal, stopping simulator..."),
        Err(err) => error!("❌ Failed to listen for interrupt signal: {}", err),
    }

    simulator.stop();

    let stats = simulator.get_stats();
    info!("📊 Final simulator statistics:");
    info!("   Total connections: {}", stats.connections_count);
    info!("   Total requests: {}", stats.total_requests);
    info!("   Successful requests: {}", stats.successful_requests);
    info!("   Failed requests: {}", stats.failed_requests);
    info!("   Bytes received: {} bytes", stats.bytes_received);
    info!("   Bytes sent: {} bytes", stats.bytes_sent);
    info!("   Uptime: {} seconds", stats.uptime_seconds);

    println!("\n✅ Simulator stopped safely");
    Ok(())
}
