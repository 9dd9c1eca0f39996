//! Transport layer module.

pub mod framed;
pub mod mock;
pub mod serial;
pub mod traits;

pub use framed::{FramedTransport, LinkError};
pub use mock::MockTransport;
pub use serial::SerialPortTransport;
pub use traits::{SerialTransport, TransportError};
