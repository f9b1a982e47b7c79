//! # gattlinkd
//!
//! Composition root that wires the btleplug transport into the GATT engine
//! and runs one scan/connect/operate session described by configuration.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise logging
//! - Open the host BLE adapter and start the engine
//! - Print every engine event as a JSON line on stdout
//! - Scan, optionally connect and run the configured reads, writes and
//!   subscriptions, then shut down cleanly (also on Ctrl-C)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no GATT logic belongs here.

mod config;
mod output;
mod session;

use tracing_subscriber::EnvFilter;

use gattlink_adapter_btleplug::BtleplugTransport;
use gattlink_app::engine::BleEngine;
use gattlink_app::event_bus::InProcessEventBus;

use crate::config::Config;
use crate::output::Printer;
use crate::session::run_session;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .with_writer(std::io::stderr)
        .init();

    let transport = BtleplugTransport::open(config.btleplug.clone()).await?;

    let bus = InProcessEventBus::new(config.engine.event_buffer);
    let printer = tokio::spawn(output::print_events(Printer::new(&config), bus.subscribe()));
    let mut events = bus.subscribe();
    tracing::debug!(listeners = bus.listeners(), "event bus ready");
    let engine = BleEngine::start(transport, bus, &config.engine);

    engine.start_scan();
    tracing::info!(duration_secs = config.scan.duration_secs, "scanning");
    let interrupted = tokio::select! {
        () = tokio::time::sleep(config.scan_duration()) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    engine.stop_scan();
    tracing::info!(devices = %engine.device_list(), "scan finished");

    if !interrupted && let Some(target) = config.target() {
        tokio::select! {
            result = run_session(&engine, &mut events, &config, target) => {
                if let Err(err) = result {
                    tracing::error!(%err, "session ended early");
                }
            }
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        }
    }

    engine.shutdown().await;
    if let Err(err) = printer.await {
        tracing::warn!(%err, "event printer failed");
    }
    Ok(())
}
