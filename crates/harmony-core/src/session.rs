//! Flash session - high-level orchestrator for the update upload.
//!
//! The session owns the serial link for its whole lifetime and drives the
//! device through a fixed sequence: query, delete the stale update file,
//! check free space, open an upload transaction, stream the archive chunk by
//! chunk, then commit the update and reboot. Every step is a single attempt;
//! the first failure ends the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::device::{DeviceInfoError, DeviceInformation};
use crate::events::{
    FlashEvent, FlashObserver, FlashPhase, LogLevel, PacketDirection, TracingObserver,
};
use crate::payload::UpdateImage;
use crate::protocol::constants::{
    COMMAND_TIMEOUT, HARMONY_BAUD_RATE, RELEASE_URL, VALIDATION_TIMEOUT,
};
use crate::protocol::{Request, UploadTransaction};
use crate::transport::{FramedTransport, LinkError, SerialTransport, TransportError};

/// Configuration for a flash session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port path. Discovered by USB VID/PID when unset.
    pub port: Option<String>,
    /// Link baud rate.
    pub baud_rate: u32,
    /// Read timeout for ordinary commands, in seconds.
    pub command_timeout_secs: u64,
    /// Read timeout for the update-and-reboot command, in seconds.
    pub validation_timeout_secs: u64,
    /// Directory holding the cached vendor release bundle.
    pub cache_dir: PathBuf,
    /// Vendor release metadata endpoint.
    pub release_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: HARMONY_BAUD_RATE,
            command_timeout_secs: COMMAND_TIMEOUT.as_secs(),
            validation_timeout_secs: VALIDATION_TIMEOUT.as_secs(),
            cache_dir: PathBuf::from("."),
            release_url: RELEASE_URL.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Could not query device information: {0}")]
    DeviceQuery(#[source] LinkError),

    #[error("Device returned no information")]
    NoDeviceInformation,

    #[error("Device has not completed onboarding (state {state:?})")]
    NotOnboarded { state: String },

    #[error("Custom OS file does not exist: {}", path.display())]
    MissingFirmware { path: PathBuf },

    #[error("Error deleting update file {path}: {source}")]
    RemoveFile {
        path: String,
        #[source]
        source: LinkError,
    },

    #[error(transparent)]
    DeviceInfo(#[from] DeviceInfoError),

    #[error("Not enough free space for update: {required} > {available}")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Could not make upload request: {0}")]
    OpenUpload(#[source] LinkError),

    #[error("Device did not return an upload transaction")]
    NoTransaction,

    #[error("Device negotiated a zero chunk size (txID {tx_id})")]
    ZeroChunkSize { tx_id: i64 },

    #[error("Error uploading chunk {chunk}/{total}: {source}")]
    Chunk {
        chunk: usize,
        total: usize,
        #[source]
        source: LinkError,
    },

    #[error("Error updating and rebooting: {0}")]
    Finalize(#[source] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    pub bytes: usize,
    pub crc32: u32,
    pub tx_id: i64,
    pub chunk_size: usize,
    pub chunks: usize,
}

/// Read the replacement firmware, failing early when the file is absent.
pub fn load_firmware(path: &Path) -> Result<Vec<u8>, FlashError> {
    if !path.exists() {
        return Err(FlashError::MissingFirmware {
            path: path.to_path_buf(),
        });
    }
    info!(path = %path.display(), "Loading custom OS");
    Ok(std::fs::read(path)?)
}

/// Refuse to flash a device that has not been provisioned.
pub fn check_onboarding(info: &DeviceInformation) -> Result<(), FlashError> {
    if info.is_onboarded() {
        Ok(())
    } else {
        Err(FlashError::NotOnboarded {
            state: info.onboarding_state.clone(),
        })
    }
}

/// Require three times the archive size in free space; returns the free space.
pub fn check_free_space(info: &DeviceInformation, archive_len: usize) -> Result<u64, FlashError> {
    let available = info.free_space_bytes()?;
    let required = DeviceInformation::required_space_bytes(archive_len);
    if required > available {
        return Err(FlashError::InsufficientSpace {
            required,
            available,
        });
    }
    debug!(required, available, "Free space check passed");
    Ok(available)
}

/// Flash session - owns the link and drives the upload.
pub struct FlashSession<T: SerialTransport, O: FlashObserver> {
    link: FramedTransport<ObservableTransport<T, O>>,
    observer: Arc<O>,
    phase: FlashPhase,
    command_timeout: Duration,
    validation_timeout: Duration,
}

impl<T: SerialTransport> FlashSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T, config: &SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: SerialTransport, O: FlashObserver> FlashSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, config: &SessionConfig, observer: Arc<O>) -> Self {
        observer.on_event(&FlashEvent::DeviceConnected {
            port: transport.port_name().to_string(),
        });
        let transport = ObservableTransport {
            inner: transport,
            observer: Arc::clone(&observer),
        };
        Self {
            link: FramedTransport::new(transport),
            observer,
            phase: FlashPhase::Connecting,
            command_timeout: config.command_timeout(),
            validation_timeout: config.validation_timeout(),
        }
    }

    fn set_phase(&mut self, to: FlashPhase) {
        if self.phase != to {
            self.observer.on_event(&FlashEvent::PhaseChanged {
                from: self.phase,
                to,
            });
            self.phase = to;
        }
    }

    fn fail(&mut self, err: FlashError) -> FlashError {
        self.observer.on_event(&FlashEvent::Error {
            message: err.to_string(),
        });
        self.set_phase(FlashPhase::Error);
        err
    }

    /// Query the device state snapshot.
    #[instrument(skip(self))]
    pub fn device_information(&mut self) -> Result<DeviceInformation, FlashError> {
        self.set_phase(FlashPhase::DeviceQuery);
        let info = match self
            .link
            .call_for::<DeviceInformation>(&Request::device_info(), self.command_timeout)
        {
            Ok(Some(info)) => info,
            Ok(None) => return Err(self.fail(FlashError::NoDeviceInformation)),
            Err(e) => return Err(self.fail(FlashError::DeviceQuery(e))),
        };
        self.observer.on_event(&FlashEvent::DeviceIdentified {
            serial: info.serial_number.clone(),
            version: info.version.clone(),
        });
        Ok(info)
    }

    /// Delete a file on the device.
    #[instrument(skip(self))]
    pub fn remove_file(&mut self, path: &str) -> Result<(), FlashError> {
        self.set_phase(FlashPhase::Cleanup);
        match self
            .link
            .call(&Request::remove_file(path), self.command_timeout)
        {
            Ok(()) => {
                info!(path, "Removed stale update file");
                Ok(())
            }
            Err(source) => Err(self.fail(FlashError::RemoveFile {
                path: path.to_string(),
                source,
            })),
        }
    }

    /// Declare the archive's size and CRC32 and open an upload transaction.
    #[instrument(skip(self, image), fields(len = image.len()))]
    pub fn open_upload(
        &mut self,
        image: &UpdateImage,
        path: &str,
    ) -> Result<UploadTransaction, FlashError> {
        self.set_phase(FlashPhase::Upload);
        let request = Request::start_upload(image.len(), image.crc32_hex(), path);
        let tx = match self
            .link
            .call_for::<UploadTransaction>(&request, self.command_timeout)
        {
            Ok(Some(tx)) => tx,
            Ok(None) => return Err(self.fail(FlashError::NoTransaction)),
            Err(e) => return Err(self.fail(FlashError::OpenUpload(e))),
        };
        if tx.chunk_size == 0 {
            return Err(self.fail(FlashError::ZeroChunkSize { tx_id: tx.tx_id }));
        }
        info!(
            tx_id = tx.tx_id,
            chunk_size = tx.chunk_size,
            crc32 = %image.crc32_hex(),
            "Upload transaction opened"
        );
        Ok(tx)
    }

    /// Send every chunk in order, each acknowledged before the next.
    ///
    /// Progress counts bytes as they are dispatched. Returns the number of
    /// chunks sent.
    #[instrument(skip(self, image), fields(tx_id = tx.tx_id, chunk_size = tx.chunk_size))]
    pub fn upload(&mut self, tx: &UploadTransaction, image: &UpdateImage) -> Result<usize, FlashError> {
        self.set_phase(FlashPhase::Upload);
        let chunks = image.chunks(tx.chunk_size);
        let total = chunks.total();
        let total_bytes = image.len() as u64;
        let mut sent_bytes = 0u64;

        for chunk in chunks {
            sent_bytes += chunk.data.len() as u64;
            self.observer.on_event(&FlashEvent::Progress {
                phase: FlashPhase::Upload,
                current: sent_bytes,
                total: total_bytes,
            });

            let request = Request::upload_chunk(tx.tx_id, chunk.sequence, chunk.data);
            if let Err(source) = self.link.call(&request, self.command_timeout) {
                return Err(self.fail(FlashError::Chunk {
                    chunk: chunk.sequence,
                    total,
                    source,
                }));
            }
            debug!(chunk = chunk.sequence, total, len = chunk.data.len(), "Chunk sent");
        }

        info!(chunks = total, bytes = sent_bytes, "Upload complete");
        Ok(total)
    }

    /// Commit the uploaded image; the device validates it and reboots.
    #[instrument(skip(self))]
    pub fn update_and_reboot(&mut self) -> Result<(), FlashError> {
        self.set_phase(FlashPhase::Validation);
        info!(
            timeout_secs = self.validation_timeout.as_secs(),
            "Validating image, please wait 1-2 minutes..."
        );
        if let Err(e) = self
            .link
            .call(&Request::update_and_reboot(), self.validation_timeout)
        {
            return Err(self.fail(FlashError::Finalize(e)));
        }
        self.set_phase(FlashPhase::Complete);
        self.observer.on_event(&FlashEvent::Complete);
        Ok(())
    }

    /// Run the upload sequence against an already-queried device.
    #[instrument(skip_all, fields(len = image.len()))]
    pub fn flash(
        &mut self,
        info: &DeviceInformation,
        image: &UpdateImage,
    ) -> Result<FlashReport, FlashError> {
        check_onboarding(info).map_err(|e| self.fail(e))?;

        self.remove_file(&info.update_file_path)?;

        let available = check_free_space(info, image.len()).map_err(|e| self.fail(e))?;
        self.observer.on_event(&FlashEvent::Log {
            level: LogLevel::Info,
            message: format!(
                "Enough free space for update: {} <= {}",
                DeviceInformation::required_space_bytes(image.len()),
                available
            ),
        });

        let tx = self.open_upload(image, &info.update_file_path)?;
        let chunks = self.upload(&tx, image)?;
        self.update_and_reboot()?;

        Ok(FlashReport {
            bytes: image.len(),
            crc32: image.crc32(),
            tx_id: tx.tx_id,
            chunk_size: tx.chunk_size,
            chunks,
        })
    }

    /// Query the device, then run the full upload sequence.
    pub fn run(&mut self, image: &UpdateImage) -> Result<FlashReport, FlashError> {
        let info = self.device_information()?;
        self.flash(&info, image)
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<T: SerialTransport, O: FlashObserver> {
    inner: T,
    observer: Arc<O>,
}

impl<T: SerialTransport, O: FlashObserver> SerialTransport for ObservableTransport<T, O> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let res = self.inner.write_all(data);
        if res.is_ok() {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
            });
        }
        res
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let res = self.inner.read_exact(buf, timeout);
        if res.is_ok() && !buf.is_empty() {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Rx,
                length: buf.len(),
            });
        }
        res
    }

    fn port_name(&self) -> &str {
        self.inner.port_name()
    }
}
