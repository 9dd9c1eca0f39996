use std::time::Duration;

// USB identity of the device's CDC serial interface
pub const HARMONY_VENDOR_ID: u16 = 0x3310;
pub const HARMONY_PRODUCT_ID: u16 = 0x0300;
pub const HARMONY_BAUD_RATE: u32 = 1200;

// Frame layout: '#' + 9 zero-padded decimal digits + JSON payload
pub const FRAME_MARKER: u8 = b'#';
pub const FRAME_LENGTH_DIGITS: usize = 9;
pub const FRAME_HEADER_SIZE: usize = 1 + FRAME_LENGTH_DIGITS;
pub const MAX_FRAME_PAYLOAD: usize = 999_999_999;

// Endpoints
pub const ENDPOINT_DEVICE_INFO: u8 = 1;
pub const ENDPOINT_UPDATE: u8 = 2;
pub const ENDPOINT_FILESYSTEM: u8 = 3;

// Methods
pub const METHOD_GET: u8 = 1;
pub const METHOD_POST: u8 = 2;
pub const METHOD_PUT: u8 = 3;
pub const METHOD_DEL: u8 = 4;

// Response status codes
pub const STATUS_OK_MIN: i64 = 200;
pub const STATUS_OK_MAX: i64 = 299;
pub const STATUS_NO_CONTENT: i64 = 204;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// The device validates the written image before rebooting (1-2 minutes).
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const ONBOARDING_COMPLETE: &str = "1";
/// Required free space as a multiple of the update archive size.
pub const FREE_SPACE_FACTOR: u64 = 3;
pub const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

// Update bundle layout
pub const FIRMWARE_ENTRY: &str = "bin/os.bin";
pub const MANIFEST_ENTRY: &str = "version.json";
pub const MANIFEST_OS_KEY: &str = "os";
pub const MANIFEST_CHECKSUM_KEY: &str = "md5sum";

pub const RELEASE_URL: &str = "https://api.center.mudita.com/.netlify/functions/v2-get-release?product=BellHybrid&environment=production&version=latest";
