//! Heart Rate Watch
//!
//! Streams heart rate readings from a Bluetooth Low Energy sensor exposing the
//! standard Heart Rate service. Notifications are decoded into readings and
//! published to listeners; a watchdog reconnects when the stream stalls.

/// Core utilities used throughout the crate.
pub mod core {
    /// Runtime configuration.
    pub mod config;
    /// Application-wide constants.
    pub mod constants;
    /// Events published on the application bus.
    pub mod events;
    /// Line-oriented log sinks.
    pub mod logging;
}

/// Trait seams between the components.
pub mod api {
    /// Session lifecycle operations.
    pub mod controller;
    /// Capabilities required from a BLE stack.
    pub mod transport;
}

/// Data models of the domain.
pub mod model {
    /// Enumerated devices and selection policy.
    pub mod device;
    /// Heart Rate Measurement decoding.
    pub mod reading;
}

/// Components implementing the APIs.
pub mod components {
    /// Wiring and event logging.
    pub mod application;
    /// `btleplug` transport.
    pub mod bluetooth;
    /// Raw notification to reading adapter.
    pub mod bridge;
    /// Connection lifecycle.
    pub mod session;
    /// Stalled stream detection.
    pub mod watchdog;
}
