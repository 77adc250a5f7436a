//! Core Events
//!
//! This module defines the events published on the application bus. A GUI,
//! recorder or logger subscribes to the bus and reacts to them.
use crate::model::{device::DeviceDescriptor, reading::Reading};

/// Enumeration of all application-level events.
#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    /// A notification was decoded into a reading.
    ReadingUpdated(Reading),

    /// A new connection has been installed.
    Connected(DeviceDescriptor),

    /// The watchdog saw no reading within its timeout and is reconnecting.
    WatchdogTriggered,

    /// A reinitiate attempt failed; the message is the error text.
    ReconnectFailed(String),

    /// The session has been permanently shut down.
    Disposed,
}
