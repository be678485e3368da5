//! Voice Client Application
//!
//! Connects to the voice server, tunes one transmitter and runs the session
//! until Ctrl+C.
//!
//! ```text
//! voice-client [TOKEN] [FREQUENCY_KHZ] [CID]
//! ```
//!
//! `VOICE_TOKEN` and `VOICE_CID` stand in for missing arguments.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atc_voice::{
    audio::{list_devices, DeviceDirection},
    broadcast::{BroadcastNotifier, PresenceSink},
    config::AppConfig,
    constants::{APP_NAME, APP_VERSION, FRAME_DURATION},
    session::{ClientIdentity, SessionEvent, VoiceSession},
    transmitters::Transmitter,
};

fn load_config() -> AppConfig {
    let loaded = AppConfig::default_path().and_then(|path| AppConfig::load_or_create(&path));
    match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Using default configuration: {}", e);
            AppConfig::default()
        }
    }
}

fn arg_or_env(index: usize, var: &str) -> Option<String> {
    std::env::args().nth(index).or_else(|| std::env::var(var).ok())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => tracing::info!("State: {:?}", state),
        SessionEvent::Error(reason) => tracing::error!("Session error: {}", reason),
        SessionEvent::CurrentFrequencyChanged {
            transmitter_id,
            frequency,
        } => tracing::info!("Transmitting on {} (transmitter {})", frequency, transmitter_id),
        SessionEvent::ReceptionBegin { callsign, frequency } => {
            tracing::info!("RX begin: {} on {}", callsign, frequency)
        }
        SessionEvent::ReceptionEnd { callsign, frequency } => {
            tracing::info!("RX end: {} on {}", callsign, frequency)
        }
        SessionEvent::MessageReceived { callsign, text } => {
            tracing::info!("Message from {}: {}", callsign, text)
        }
        SessionEvent::SimulatorLinkLost => tracing::warn!("Simulator link lost"),
        SessionEvent::SimulatorFrequencies(radios) => tracing::debug!("Simulator radios: {:?}", radios),
        SessionEvent::VoiceSent { .. } => tracing::trace!("{:?}", event),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting {} {}", APP_NAME, APP_VERSION);

    for direction in [DeviceDirection::Input, DeviceDirection::Output] {
        for device in list_devices(direction) {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            tracing::info!(
                "{:?} device: {}{} ({} ch, {} Hz)",
                direction,
                device.name,
                default_marker,
                device.max_channels,
                device.default_sample_rate
            );
        }
    }

    let token = arg_or_env(1, "VOICE_TOKEN").context("No token: pass it as the first argument or set VOICE_TOKEN")?;
    let frequency: u32 = match std::env::args().nth(2) {
        Some(arg) => arg.parse().context("Invalid frequency")?,
        None => 0,
    };
    let cid: i32 = arg_or_env(3, "VOICE_CID")
        .context("No cid: pass it as the third argument or set VOICE_CID")?
        .parse()
        .context("Invalid cid")?;

    let notifier = if config.broadcast.enabled {
        match BroadcastNotifier::start(&config.broadcast).await {
            Ok(notifier) => Some(Arc::new(notifier)),
            Err(e) => {
                tracing::warn!("Broadcast notifier disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut session = VoiceSession::new(&config, ClientIdentity::new(cid, token))?;
    if let Some(notifier) = &notifier {
        let sink: Arc<dyn PresenceSink> = notifier.clone();
        session.set_presence_sink(Some(sink));
    }
    let events = session.events();

    session.connect().await?;

    if frequency != 0 {
        let main = Transmitter::new(0, frequency).with_receive(true).with_send(true);
        session.add_transmitter(main);
    }

    tracing::info!("Running - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(FRAME_DURATION) => {
                session.poll();
                for event in events.try_iter() {
                    log_event(&event);
                }
            }
        }
    }

    session.disconnect();
    session.shutdown();
    if let Some(notifier) = &notifier {
        notifier.stop().await;
    }

    // Let the control writer flush the disconnect line
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Stopped");
    Ok(())
}
