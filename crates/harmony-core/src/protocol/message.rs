//! Request and response messages exchanged over the framed link.
//!
//! Requests carry a typed body per endpoint/method pair; responses keep
//! their body as a raw JSON value until the caller decodes it into the
//! shape it expects.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::constants::*;

/// A single request to the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub endpoint: u8,
    pub method: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
}

/// Request bodies understood by the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    RemoveFile {
        #[serde(rename = "removeFile")]
        remove_file: String,
    },
    StartUpload {
        #[serde(rename = "fileSize")]
        file_size: usize,
        #[serde(rename = "fileCrc32")]
        file_crc32: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },
    UploadChunk {
        #[serde(rename = "txID")]
        tx_id: i64,
        #[serde(rename = "chunkNo")]
        chunk_no: usize,
        #[serde(serialize_with = "serialize_base64")]
        data: Vec<u8>,
    },
    Update { update: bool, reboot: bool },
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

impl Request {
    pub fn device_info() -> Self {
        Self {
            endpoint: ENDPOINT_DEVICE_INFO,
            method: METHOD_GET,
            body: None,
        }
    }

    pub fn remove_file(path: impl Into<String>) -> Self {
        Self {
            endpoint: ENDPOINT_FILESYSTEM,
            method: METHOD_DEL,
            body: Some(RequestBody::RemoveFile {
                remove_file: path.into(),
            }),
        }
    }

    /// Open an upload transaction. `crc32_hex` must be 8 lower-case hex digits.
    pub fn start_upload(file_size: usize, crc32_hex: String, file_name: impl Into<String>) -> Self {
        Self {
            endpoint: ENDPOINT_FILESYSTEM,
            method: METHOD_PUT,
            body: Some(RequestBody::StartUpload {
                file_size,
                file_crc32: crc32_hex,
                file_name: file_name.into(),
            }),
        }
    }

    pub fn upload_chunk(tx_id: i64, chunk_no: usize, data: &[u8]) -> Self {
        Self {
            endpoint: ENDPOINT_FILESYSTEM,
            method: METHOD_PUT,
            body: Some(RequestBody::UploadChunk {
                tx_id,
                chunk_no,
                data: data.to_vec(),
            }),
        }
    }

    pub fn update_and_reboot() -> Self {
        Self {
            endpoint: ENDPOINT_UPDATE,
            method: METHOD_POST,
            body: Some(RequestBody::Update {
                update: true,
                reboot: true,
            }),
        }
    }

    /// Short name used in logs and packet events.
    pub fn name(&self) -> &'static str {
        match &self.body {
            None if self.endpoint == ENDPOINT_DEVICE_INFO => "DeviceInfo",
            None => "Query",
            Some(RequestBody::RemoveFile { .. }) => "RemoveFile",
            Some(RequestBody::StartUpload { .. }) => "StartUpload",
            Some(RequestBody::UploadChunk { .. }) => "UploadChunk",
            Some(RequestBody::Update { .. }) => "UpdateReboot",
        }
    }
}

/// Response envelope returned by the device for every request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub body: Value,
    pub endpoint: i64,
    pub status: i64,
    #[serde(default)]
    pub uuid: i64,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (STATUS_OK_MIN..=STATUS_OK_MAX).contains(&self.status)
    }

    pub fn is_no_content(&self) -> bool {
        self.status == STATUS_NO_CONTENT
    }
}

/// Reply to [`Request::start_upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTransaction {
    #[serde(rename = "chunkSize")]
    pub chunk_size: usize,
    #[serde(rename = "txID")]
    pub tx_id: i64,
}
