//! Intercom process
//!
//! Glue around the library: picks which of the two fixed roles this
//! process plays, brings the transport up (interruptibly), then runs the
//! role loop forever: button held streams out, released streams in.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_intercom::{
    config::AppConfig,
    hal::{Hal, NullHal, PinLevel},
    pacing::SpinPacer,
    stream::StreamEngine,
    transport::{CancelToken, DnsResolver, RetryPolicy, Transport},
};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Intercom");

    // Role is "one" or "two"; mapping the machine name to a role is the
    // launcher's job, not ours.
    let role = env::args().nth(1).unwrap_or_else(|| "one".to_string());
    let config = match env::args().nth(2).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };

    let (local, remote) = match role.as_str() {
        "one" => (
            config.network.communicator_one.clone(),
            config.network.communicator_two.clone(),
        ),
        "two" => (
            config.network.communicator_two.clone(),
            config.network.communicator_one.clone(),
        ),
        other => anyhow::bail!("unknown role '{}', expected 'one' or 'two'", other),
    };

    tracing::info!(local = %local, remote = %remote, port = config.network.port, "configured endpoints");

    // Ctrl-C ends the peer wait and, later, the streaming loops at the
    // next window boundary.
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        handler_token.cancel();
    })
    .context("failed to install interrupt handler")?;

    let mut transport = Transport::configure_with(
        &local,
        &remote,
        config.network.port,
        RetryPolicy::default(),
        &DnsResolver,
        &cancel,
    )?;

    // Board-specific HALs plug in here; the null HAL lets the process run
    // on a development host with no pins attached.
    let mut hal = NullHal;
    hal.set_output(config.pins.ready_led, PinLevel::Low);

    if let Some(ready) = config.audio.ready_prompt.clone() {
        let mut engine = StreamEngine::new(
            &transport,
            &mut hal,
            SpinPacer,
            config.pins,
            config.audio.clone(),
        );
        if let Err(e) = engine.play_file(&ready) {
            tracing::warn!(error = %e, "ready prompt failed");
        }
    }
    hal.set_output(config.pins.ready_led, PinLevel::High);
    tracing::info!("link up, ready");

    while !cancel.is_cancelled() {
        let pressed = hal.read_input(config.pins.control_button).is_high();

        let mut engine = StreamEngine::new(
            &transport,
            &mut hal,
            SpinPacer,
            config.pins,
            config.audio.clone(),
        )
        .with_shutdown(cancel.clone());

        let result = if pressed {
            engine.stream_out()
        } else {
            engine.stream_in()
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "streaming cycle failed");
        }
    }

    hal.set_output(config.pins.ready_led, PinLevel::Low);
    transport.teardown();
    tracing::info!("stopped");
    Ok(())
}
