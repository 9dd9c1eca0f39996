//! Device state snapshot and the preconditions derived from it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{BYTES_PER_MEGABYTE, FREE_SPACE_FACTOR, ONBOARDING_COMPLETE};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceInfoError {
    #[error("Could not parse {field} {value:?} as megabytes")]
    InvalidSpace { field: &'static str, value: String },
}

/// Device information returned by the status query.
///
/// Storage sizes are decimal strings in megabytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInformation {
    pub device_space_total: String,
    pub used_user_space: String,
    pub system_reserved_space: String,
    pub onboarding_state: String,
    pub update_file_path: String,

    #[serde(default)]
    pub backup_file_path: String,
    #[serde(default)]
    pub battery_level: String,
    #[serde(default)]
    pub battery_state: String,
    #[serde(default)]
    pub case_colour: String,
    #[serde(default, rename = "currentRTCTime")]
    pub current_rtc_time: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_revision: String,
    #[serde(default)]
    pub mtp_path: String,
    #[serde(default, rename = "recoveryStatusFilePath")]
    pub recovery_status_path: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub sync_file_path: String,
    #[serde(default)]
    pub version: String,
}

impl DeviceInformation {
    pub fn is_onboarded(&self) -> bool {
        self.onboarding_state == ONBOARDING_COMPLETE
    }

    /// Free user space in bytes: total minus used minus reserved.
    ///
    /// A negative balance is reported as zero.
    pub fn free_space_bytes(&self) -> Result<u64, DeviceInfoError> {
        let total = parse_megabytes("deviceSpaceTotal", &self.device_space_total)?;
        let used = parse_megabytes("usedUserSpace", &self.used_user_space)?;
        let reserved = parse_megabytes("systemReservedSpace", &self.system_reserved_space)?;

        // Float-to-int casts saturate, so negatives clamp to 0
        Ok(((total - used - reserved) * BYTES_PER_MEGABYTE) as u64)
    }

    /// Space needed on the device to accept an archive of `archive_len` bytes.
    pub fn required_space_bytes(archive_len: usize) -> u64 {
        (archive_len as u64).saturating_mul(FREE_SPACE_FACTOR)
    }
}

fn parse_megabytes(field: &'static str, value: &str) -> Result<f64, DeviceInfoError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DeviceInfoError::InvalidSpace {
            field,
            value: value.to_string(),
        })
}
