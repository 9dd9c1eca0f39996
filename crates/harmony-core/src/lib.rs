//! Harmony-Core: firmware flashing for Mudita Harmony (BellHybrid) clocks.
//!
//! The device speaks length-prefixed JSON over a USB CDC serial link. This
//! crate patches a vendor update bundle with a replacement OS image and
//! uploads it through the device's file-transfer endpoints.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, frame header, request/response messages
//! - **Transport**: Serial link abstraction (serialport, mock) and framed exchange
//! - **Payload**: Update archive buffer and upload chunking
//! - **Archive**: Tar bundle patching
//! - **Release**: Vendor release lookup and bundle cache
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use harmony_core::archive::replace_firmware;
//! use harmony_core::session::{FlashSession, SessionConfig};
//! use harmony_core::transport::SerialPortTransport;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SessionConfig::default();
//! let bundle = std::fs::read("BellHybrid-2.4.0.tar")?;
//! let firmware = std::fs::read("os.bin")?;
//! let image = replace_firmware(&bundle, &firmware)?.into_image();
//!
//! let port = SerialPortTransport::open(config.baud_rate)?;
//! let mut session = FlashSession::new(port, &config);
//! session.run(&image)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod device;
pub mod error;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod release;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use archive::{ArchiveError, PatchReport, PatchedArchive, replace_firmware};
pub use device::{DeviceInfoError, DeviceInformation};
pub use error::{ErrorKind, classify};
pub use events::{FlashEvent, FlashObserver, FlashPhase, LogLevel, NullObserver, TracingObserver};
pub use payload::UpdateImage;
pub use release::{Release, ReleaseClient, ReleaseError};
pub use session::{FlashError, FlashReport, FlashSession, SessionConfig};
pub use transport::{
    FramedTransport, LinkError, MockTransport, SerialPortTransport, SerialTransport,
    TransportError,
};
