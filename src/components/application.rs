//! Application
//!
//! Wires transport, notification bridge, session and watchdog together and
//! runs them until a shutdown signal. Everything published on the event bus is
//! written to a log sink, one line per event.

use crate::{
    api::{controller::SessionApi, transport::Transport},
    components::{
        bridge::NotificationBridge,
        session::HeartRateSession,
        watchdog::{Watchdog, WatchdogConfig},
    },
    core::{
        config::Config,
        events::AppEvent,
        logging::{format_reading, LogSink},
    },
};

use anyhow::Result;
use log::{error, info, trace, warn};
use std::{future::Future, sync::Arc};
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError, Receiver, Sender};

/// Main application.
///
/// Owns the event bus and the components publishing on it.
pub struct Application<T: Transport> {
    config: Config,
    event_bus: Sender<AppEvent>,
    bridge: Arc<NotificationBridge>,
    session: Arc<HeartRateSession<T>>,
}

impl<T: Transport> Application<T> {
    /// Creates a new `Application`.
    ///
    /// # Arguments
    /// - `transport`: The BLE stack to read heart rate from.
    /// - `config`: Runtime configuration.
    pub fn new(transport: Arc<T>, config: Config) -> Self {
        trace!("Initializing Application.");
        let (event_bus, _) = broadcast::channel(config.event_bus_capacity);
        let bridge = Arc::new(NotificationBridge::new());
        bridge.forward_to(event_bus.clone());
        let session = Arc::new(
            HeartRateSession::new(transport, bridge.clone())
                .with_selector(config.device_selector())
                .with_event_bus(event_bus.clone()),
        );
        Self {
            config,
            event_bus,
            bridge,
            session,
        }
    }

    /// Returns a new receiver on the application bus.
    pub fn subscribe(&self) -> Receiver<AppEvent> {
        self.event_bus.subscribe()
    }

    pub fn session(&self) -> &Arc<HeartRateSession<T>> {
        &self.session
    }

    /// Connects, supervises the connection and logs every event until
    /// `shutdown` completes. Then disposes watchdog and session.
    ///
    /// A failed initial connection is not fatal: the watchdog retries it once
    /// per timeout.
    pub async fn run<F>(self, sink: Arc<dyn LogSink>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let logger = tokio::spawn(log_events(self.event_bus.subscribe(), sink));

        if let Err(e) = self.session.reinitiate().await {
            error!(
                "Initial connection failed: {}. Retrying in {} seconds.",
                e, self.config.watchdog_timeout_secs
            );
        }

        let watchdog = Watchdog::start(
            self.session.clone(),
            WatchdogConfig {
                timeout: self.config.watchdog_timeout(),
                poll_interval: self.config.watchdog_poll_interval(),
            },
            Some(self.event_bus.clone()),
        );
        watchdog.watch(&self.bridge);

        shutdown.await;
        info!("Shutting down.");
        watchdog.dispose();
        self.session.dispose().await;

        logger.await?;
        let stats = self.bridge.stats();
        info!(
            "{} notifications received, {} readings published, {} discarded.",
            stats.delivered, stats.published, stats.discarded
        );
        Ok(())
    }
}

/// Writes one line per application event to `sink` until the session is
/// disposed or the bus closes.
pub async fn log_events(mut rx: Receiver<AppEvent>, sink: Arc<dyn LogSink>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, {} events skipped.", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            AppEvent::ReadingUpdated(reading) => {
                sink.write_line(&format_reading(OffsetDateTime::now_utc(), &reading))
            }
            AppEvent::Connected(device) => sink.write_line(&format!("connected to {}", device)),
            AppEvent::WatchdogTriggered => sink.write_line("no readings received, reconnecting"),
            AppEvent::ReconnectFailed(reason) => {
                sink.write_line(&format!("reconnect failed: {}", reason))
            }
            AppEvent::Disposed => {
                sink.write_line("session closed");
                break;
            }
        }
    }
}
