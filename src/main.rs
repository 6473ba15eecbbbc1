//! Railscope console monitor
//!
//! A minimal host for the telemetry core: opens the controller's serial
//! port, runs the backend, and logs every telemetry event. It also
//! demonstrates the host side of the contract by keeping the shared
//! context in step with device-confirmed MUX channels.

use anyhow::{bail, Context};
use railscope::backend::{BackendMessage, SerialTransport, TelemetryBackend};
use railscope::config::AppConfig;
use railscope::types::{SharedContext, REFERENCE_RESISTORS_KOHM};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// MUX mute window armed by this host on channel confirmation
const MUX_MUTE_WINDOW: Duration = Duration::from_millis(80);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,railscope=trace")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::default();

    let Some(port_name) = std::env::args().nth(1) else {
        let ports = SerialTransport::list_ports().context("failed to list serial ports")?;
        if ports.is_empty() {
            bail!("no serial ports found; usage: railscope <port>");
        }
        eprintln!("usage: railscope <port>\navailable ports:");
        for port in ports {
            eprintln!("  {port}");
        }
        return Ok(());
    };

    let transport = SerialTransport::open(&port_name, &config.serial)
        .with_context(|| format!("failed to open {port_name}"))?;

    let context = SharedContext::default();
    let (handle, messages) =
        TelemetryBackend::spawn(Box::new(transport), context.clone(), &config);

    tracing::info!("Monitoring {port_name}; Ctrl-C to quit");
    for msg in &messages {
        match msg {
            BackendMessage::Event(event) => {
                if let Some(point) = event.live_point {
                    tracing::info!(
                        "V = {:.4} V, Rt = {:.3} kΩ",
                        point.voltage_v,
                        point.resistance_kohm
                    );
                }
                if let Some(pos) = event.position {
                    tracing::debug!("position: {pos} microsteps");
                }
                if let Some(steps) = event.total_steps {
                    tracing::info!("calibrated travel: {steps} full steps");
                }
                if let Some(channel) = event.mux_channel_confirmed {
                    sync_mux_channel(&context, channel);
                }
                if let Some(text) = &event.log_message {
                    tracing::info!("device: {text}");
                }
            }
            BackendMessage::TransportError(e) => tracing::error!("transport failed: {e}"),
            BackendMessage::Stopped => break,
        }
    }

    handle.stop();
    handle.join();
    Ok(())
}

/// Keep the measurement context in step with the device-confirmed MUX
/// channel, holding the previous reference for the settle window
fn sync_mux_channel(context: &SharedContext, channel: u8) {
    let Some(&resistance) = REFERENCE_RESISTORS_KOHM.get(channel as usize) else {
        tracing::warn!("confirmed MUX channel {channel} out of range");
        return;
    };
    context.update(|ctx| {
        ctx.previous_reference_kohm = ctx.current_reference_kohm;
        ctx.current_reference_kohm = resistance;
        ctx.mux_mute_until = Some(Instant::now() + MUX_MUTE_WINDOW);
    });
    tracing::info!("MUX channel {channel} confirmed (Rm = {resistance} kΩ)");
}
