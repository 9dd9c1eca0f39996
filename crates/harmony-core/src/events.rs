//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a flashing session
//! without tight coupling to the core logic.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Flashing session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// Opening the serial link.
    Connecting,
    /// Querying device information.
    DeviceQuery,
    /// Downloading the vendor release bundle.
    Download,
    /// Removing the stale update file.
    Cleanup,
    /// Streaming the update archive.
    Upload,
    /// Device validating the image before reboot.
    Validation,
    /// Update committed, device rebooting.
    Complete,
    /// Error state.
    Error,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Connecting => write!(f, "Connecting"),
            FlashPhase::DeviceQuery => write!(f, "Device Query"),
            FlashPhase::Download => write!(f, "Download"),
            FlashPhase::Cleanup => write!(f, "Cleanup"),
            FlashPhase::Upload => write!(f, "Upload"),
            FlashPhase::Validation => write!(f, "Validation"),
            FlashPhase::Complete => write!(f, "Complete"),
            FlashPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted during a flashing session.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Serial link opened.
    DeviceConnected { port: String },
    /// Device information received.
    DeviceIdentified { serial: String, version: String },
    /// Phase changed.
    PhaseChanged { from: FlashPhase, to: FlashPhase },
    /// Byte progress for the current phase.
    Progress {
        phase: FlashPhase,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Frame sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
    },
    /// Error occurred.
    Error { message: String },
    /// Update committed; the device reboots on its own.
    Complete,
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceConnected { port } => {
                tracing::info!(port = %port, "Device connected");
            }
            FlashEvent::DeviceIdentified { serial, version } => {
                tracing::info!(serial = %serial, version = %version, "Device identified");
            }
            FlashEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            FlashEvent::Progress {
                phase,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, progress = %format!("{}%", pct), "Progress");
            }
            FlashEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            FlashEvent::Packet { direction, length } => {
                tracing::trace!(dir = %direction, len = length, "Frame");
            }
            FlashEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            FlashEvent::Complete => {
                tracing::info!("Update committed");
            }
        }
    }
}
