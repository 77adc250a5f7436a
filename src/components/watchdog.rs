//! Watchdog
//!
//! Supervises the reading stream of a session. Every published reading feeds
//! the watchdog; when no reading arrives within the timeout, the session is
//! reinitiated. A failed reinitiate is logged and retried after another full
//! timeout, never propagated.
use crate::api::controller::SessionApi;
use crate::components::bridge::NotificationBridge;
use crate::core::events::AppEvent;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::Sender;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    /// Monitoring; the initial state.
    Active,
    /// Terminal.
    Disposed,
}

#[derive(Debug)]
struct WatchdogState {
    last_update: Instant,
    status: WatchdogStatus,
}

/// Configuration for the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Maximum time without a reading before the session is reinitiated
    pub timeout: Duration,
    /// How often the elapsed time is checked
    pub poll_interval: Duration,
}

/// Background liveness monitor of a heart rate session.
#[derive(Debug)]
pub struct Watchdog {
    config: WatchdogConfig,
    state: Arc<Mutex<WatchdogState>>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

fn lock(state: &Mutex<WatchdogState>) -> MutexGuard<'_, WatchdogState> {
    match state.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Watchdog {
    /// Creates the watchdog and starts its monitoring loop on the current
    /// tokio runtime. The staleness timer starts at zero.
    pub fn start<S: SessionApi + 'static>(
        session: Arc<S>,
        config: WatchdogConfig,
        event_bus: Option<Sender<AppEvent>>,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(WatchdogState {
            last_update: Instant::now(),
            status: WatchdogStatus::Active,
        }));
        let handle = tokio::spawn(Self::monitor(session, config, state.clone(), event_bus));
        info!(
            "Watchdog started: timeout {:?}, poll interval {:?}.",
            config.timeout, config.poll_interval
        );
        Arc::new(Self {
            config,
            state,
            monitor_handle: Mutex::new(Some(handle)),
        })
    }

    /// Feeds the watchdog from every reading the bridge publishes.
    pub fn watch(self: &Arc<Self>, bridge: &NotificationBridge) {
        let watchdog: Weak<Self> = Arc::downgrade(self);
        bridge.subscribe(move |_| {
            if let Some(watchdog) = watchdog.upgrade() {
                watchdog.feed();
            }
        });
    }

    /// Resets the staleness timer.
    pub fn feed(&self) {
        let mut state = lock(&self.state);
        if state.status == WatchdogStatus::Active {
            state.last_update = Instant::now();
        }
    }

    /// Stops monitoring. The loop exits at its next poll.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if state.status != WatchdogStatus::Disposed {
            state.status = WatchdogStatus::Disposed;
            debug!("Watchdog disposed.");
        }
    }

    pub fn status(&self) -> WatchdogStatus {
        lock(&self.state).status
    }

    pub fn config(&self) -> WatchdogConfig {
        self.config
    }

    /// Time since the last reading or the last reinitiate.
    pub fn last_update_elapsed(&self) -> Duration {
        lock(&self.state).last_update.elapsed()
    }

    /// Checks if the monitoring loop has exited.
    pub fn is_stopped(&self) -> bool {
        match self.monitor_handle.lock() {
            Ok(handle) => handle.as_ref().map_or(true, |h| h.is_finished()),
            Err(_) => true,
        }
    }

    async fn monitor<S: SessionApi>(
        session: Arc<S>,
        config: WatchdogConfig,
        state: Arc<Mutex<WatchdogState>>,
        event_bus: Option<Sender<AppEvent>>,
    ) {
        loop {
            tokio::time::sleep(config.poll_interval).await;

            let elapsed = {
                let state = lock(&state);
                if state.status == WatchdogStatus::Disposed {
                    break;
                }
                state.last_update.elapsed()
            };
            if elapsed < config.timeout {
                continue;
            }

            warn!(
                "No heart rate reading for {} seconds, reconnecting.",
                elapsed.as_secs()
            );
            if let Some(tx) = &event_bus {
                let _ = tx.send(AppEvent::WatchdogTriggered);
            }
            match session.reinitiate().await {
                Ok(device) => info!("Watchdog reconnected to {}.", device),
                Err(e) => {
                    error!("Watchdog reconnect failed: {}", e);
                    if let Some(tx) = &event_bus {
                        let _ = tx.send(AppEvent::ReconnectFailed(e.to_string()));
                    }
                }
            }
            // reset even on failure so a dead sensor is retried once per timeout
            lock(&state).last_update = Instant::now();
        }
        debug!("Watchdog monitoring loop exited.");
    }
}

impl Drop for Watchdog {
    /// Aborts the monitoring loop without waiting for its next poll.
    fn drop(&mut self) {
        self.dispose();
        let handle = match self.monitor_handle.get_mut() {
            Ok(handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
