//! Intercom Application
//!
//! Captures audio, streams it to the peer as bit-planes and plays back the
//! peer's stream. Run the same binary on both hosts, each pointing at the
//! other.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitplane_intercom::{
    audio::{device::list_devices, AudioDuplex},
    cli,
    config::AppConfig,
    constants::STATS_INTERVAL_SECS,
    network::{bind_receiver, PacketReceiver, UdpSink},
    StreamEngine,
};

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::parse_args()?;
    if args.help {
        cli::print_help();
        return Ok(());
    }
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    let params = config.stream_params()?;
    let destination = config.destination_addr()?;

    tracing::info!(
        "Starting intercom at {} Hz, peer {}, listening on port {}",
        config.audio.sample_rate,
        destination,
        config.network.listen_port
    );

    let socket = bind_receiver(config.network.listen_port, config.network.recv_buffer_size)?;
    let sink = UdpSink::new(destination)?;
    let engine = StreamEngine::new(params, sink)?;
    let (sender, player, state) = engine.into_parts();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let receiver = PacketReceiver::new(socket, state.clone()).spawn(shutdown_rx);

    let mut audio = AudioDuplex::new(
        &params,
        config.audio.sample_rate,
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    );
    audio.start(sender, player)?;
    tracing::info!("Audio started - press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats_timer = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
    stats_timer.tick().await;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
            _ = stats_timer.tick() => {
                while let Some(e) = audio.check_errors() {
                    tracing::warn!("Audio error: {}", e);
                }
                if !audio.is_running() {
                    tracing::error!("Audio streams stopped");
                    break;
                }

                let stats = state.stats();
                let buffer = state.buffer_stats();
                tracing::info!(
                    "Stats: {} chunks sent ({} planes, {:.1} KB, {} skipped, {} dropped), \
                     budget {}, {} datagrams received ({} malformed), {} chunks played, {:.1}% silent",
                    stats.chunks_sent,
                    stats.planes_sent,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.planes_skipped,
                    stats.send_errors,
                    stats.nobpts,
                    stats.datagrams_received,
                    stats.malformed_datagrams,
                    stats.chunks_played,
                    buffer.silence_rate() * 100.0
                );
            }
        }
    }

    audio.stop();
    let _ = shutdown_tx.send(true);
    match receiver.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Receiver stopped with error: {}", e),
        Err(e) => tracing::warn!("Receiver task failed: {}", e),
    }

    Ok(())
}
