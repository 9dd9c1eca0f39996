//! Update bundle patching.
//!
//! The vendor update bundle is a tar archive containing the OS binary and a
//! `version.json` manifest that records the binary's MD5. Patching swaps in
//! a replacement binary and rewrites that checksum; every other member is
//! copied through with its original header bytes.

use std::io::Read;

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::payload::UpdateImage;
use crate::protocol::constants::{
    FIRMWARE_ENTRY, MANIFEST_CHECKSUM_KEY, MANIFEST_ENTRY, MANIFEST_OS_KEY,
};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid manifest JSON: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("No \"os\" section in version.json")]
    MissingOsSection,
    #[error("\"os\" is not an object in version.json")]
    OsSectionNotObject,
    #[error("Bundle has no {0} member")]
    MissingMember(&'static str),
}

/// What the patcher found and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Number of members copied or rewritten.
    pub entries: usize,
    pub firmware_replaced: bool,
    pub manifest_patched: bool,
    /// Lower-case hex MD5 of the replacement binary.
    pub firmware_md5: String,
}

impl PatchReport {
    /// Fail unless both the OS binary and the manifest were rewritten.
    pub fn ensure_complete(&self) -> Result<(), ArchiveError> {
        if !self.firmware_replaced {
            return Err(ArchiveError::MissingMember(FIRMWARE_ENTRY));
        }
        if !self.manifest_patched {
            return Err(ArchiveError::MissingMember(MANIFEST_ENTRY));
        }
        Ok(())
    }
}

/// Patched bundle bytes plus the patch report.
#[derive(Debug, Clone)]
pub struct PatchedArchive {
    pub data: Vec<u8>,
    pub report: PatchReport,
}

impl PatchedArchive {
    pub fn into_image(self) -> UpdateImage {
        UpdateImage::from_bytes(self.data)
    }
}

/// Lower-case hex MD5 digest.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Rewrite `original` with `firmware` substituted for the OS binary.
///
/// Members are emitted in source order and the output is finalised once,
/// after the last source member.
#[instrument(skip_all, fields(original_len = original.len(), firmware_len = firmware.len()))]
pub fn replace_firmware(original: &[u8], firmware: &[u8]) -> Result<PatchedArchive, ArchiveError> {
    let firmware_md5 = md5_hex(firmware);
    let mut report = PatchReport {
        firmware_md5: firmware_md5.clone(),
        ..Default::default()
    };

    let mut source = tar::Archive::new(original);
    let mut builder = tar::Builder::new(Vec::with_capacity(original.len() + firmware.len()));

    // Raw mode keeps GNU long-name and PAX members as separate entries so
    // they are copied verbatim instead of being folded into the next header.
    for entry in source.entries()?.raw(true) {
        let mut entry = entry?;
        let mut header = entry.header().clone();
        let is_file = header.entry_type().is_file();
        let path = entry.path_bytes().into_owned();

        let mut content = Vec::with_capacity(header.size().unwrap_or(0) as usize);
        entry.read_to_end(&mut content)?;

        if is_file && path == FIRMWARE_ENTRY.as_bytes() {
            info!(md5 = %firmware_md5, "Replacing {}", FIRMWARE_ENTRY);
            header.set_size(firmware.len() as u64);
            header.set_cksum();
            builder.append(&header, firmware)?;
            report.firmware_replaced = true;
        } else if is_file && path == MANIFEST_ENTRY.as_bytes() {
            let manifest = patch_manifest(&content, &firmware_md5)?;
            debug!(old_len = content.len(), new_len = manifest.len(), "Rewrote manifest");
            header.set_size(manifest.len() as u64);
            header.set_cksum();
            builder.append(&header, manifest.as_slice())?;
            report.manifest_patched = true;
        } else {
            builder.append(&header, content.as_slice())?;
        }
        report.entries += 1;
    }

    let data = builder.into_inner()?;

    if !report.firmware_replaced {
        warn!("Bundle has no {} member", FIRMWARE_ENTRY);
    }
    if !report.manifest_patched {
        warn!("Bundle has no {} member", MANIFEST_ENTRY);
    }
    info!(entries = report.entries, len = data.len(), "Bundle patched");

    Ok(PatchedArchive { data, report })
}

/// Set `os.md5sum` in the manifest and re-serialise it with 4-space indent.
fn patch_manifest(manifest: &[u8], firmware_md5: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut version: Map<String, Value> = serde_json::from_slice(manifest)?;

    let os = version
        .get_mut(MANIFEST_OS_KEY)
        .ok_or(ArchiveError::MissingOsSection)?
        .as_object_mut()
        .ok_or(ArchiveError::OsSectionNotObject)?;
    os.insert(
        MANIFEST_CHECKSUM_KEY.to_string(),
        Value::String(firmware_md5.to_string()),
    );

    let mut out = Vec::with_capacity(manifest.len());
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    version.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{EntryType, Header};

    const MANIFEST: &str = r#"{
  "bootloader": {"filename": "ecoboot.bin", "md5sum": "aaaa", "version": "1.0"},
  "os": {"filename": "os.bin", "md5sum": "0123456789abcdef0123456789abcdef", "version": "2.4.0"},
  "version": "2.4.0"
}"#;

    fn build_tar(members: &[(&str, EntryType, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, kind, data) in members {
            let mut header = Header::new_ustar();
            header.set_path(path).unwrap();
            header.set_entry_type(*kind);
            header.set_mode(if kind.is_dir() { 0o755 } else { 0o644 });
            header.set_mtime(1_700_000_000);
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// (path, raw header bytes, content) for every member.
    fn members(data: &[u8]) -> Vec<(String, Vec<u8>, Vec<u8>)> {
        let mut archive = tar::Archive::new(data);
        archive
            .entries()
            .unwrap()
            .raw(true)
            .map(|e| {
                let mut e = e.unwrap();
                let path = String::from_utf8(e.path_bytes().into_owned()).unwrap();
                let header = e.header().as_bytes().to_vec();
                let mut content = Vec::new();
                e.read_to_end(&mut content).unwrap();
                (path, header, content)
            })
            .collect()
    }

    fn sample_bundle() -> Vec<u8> {
        build_tar(&[
            ("bin/", EntryType::Directory, &b""[..]),
            ("bin/ecoboot.bin", EntryType::Regular, &b"bootloader bytes"[..]),
            ("bin/os.bin", EntryType::Regular, &b"vendor os image"[..]),
            ("version.json", EntryType::Regular, MANIFEST.as_bytes()),
            ("assets/lang/en.json", EntryType::Regular, &br#"{"hello":"world"}"#[..]),
        ])
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_replace_firmware() {
        let original = sample_bundle();
        let firmware = b"custom firmware image, longer than the vendor one".to_vec();

        let patched = replace_firmware(&original, &firmware).unwrap();
        assert!(patched.report.firmware_replaced);
        assert!(patched.report.manifest_patched);
        assert_eq!(patched.report.entries, 5);
        assert_eq!(patched.report.firmware_md5, md5_hex(&firmware));

        let before = members(&original);
        let after = members(&patched.data);
        assert_eq!(
            before.iter().map(|m| &m.0).collect::<Vec<_>>(),
            after.iter().map(|m| &m.0).collect::<Vec<_>>()
        );

        for (old, new) in before.iter().zip(&after) {
            match old.0.as_str() {
                "bin/os.bin" => {
                    assert_eq!(new.2, firmware);
                    let mut archive = tar::Archive::new(patched.data.as_slice());
                    let size = archive
                        .entries()
                        .unwrap()
                        .map(|e| e.unwrap())
                        .find(|e| e.path_bytes().as_ref() == b"bin/os.bin")
                        .unwrap()
                        .header()
                        .size()
                        .unwrap();
                    assert_eq!(size, firmware.len() as u64);
                }
                "version.json" => {
                    let manifest: Value = serde_json::from_slice(&new.2).unwrap();
                    assert_eq!(manifest["os"]["md5sum"], md5_hex(&firmware));
                    assert_eq!(manifest["os"]["version"], "2.4.0");
                    assert_eq!(manifest["bootloader"]["md5sum"], "aaaa");
                }
                _ => assert_eq!(old, new, "member {} changed", old.0),
            }
        }
    }

    #[test]
    fn test_output_is_finalised_once() {
        let patched = replace_firmware(&sample_bundle(), b"fw").unwrap();
        assert_eq!(patched.data.len() % 512, 0);
        assert!(patched.data.ends_with(&[0u8; 1024]));
        // The 1024 zero bytes appear only at the end
        let body = &patched.data[..patched.data.len() - 1024];
        assert!(!body.ends_with(&[0u8; 512]));
    }

    #[test]
    fn test_manifest_indentation() {
        let out = patch_manifest(br#"{"os":{"md5sum":"x"},"a":1}"#, "ff").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "{\n    \"a\": 1,\n    \"os\": {\n        \"md5sum\": \"ff\"\n    }\n}"
        );
    }

    #[test]
    fn test_manifest_without_os_section() {
        let original = build_tar(&[("version.json", EntryType::Regular, &br#"{"boot":{}}"#[..])]);
        let err = replace_firmware(&original, b"fw").unwrap_err();
        assert!(matches!(err, ArchiveError::MissingOsSection));
    }

    #[test]
    fn test_manifest_os_not_object() {
        let original = build_tar(&[("version.json", EntryType::Regular, &br#"{"os":"2.4"}"#[..])]);
        let err = replace_firmware(&original, b"fw").unwrap_err();
        assert!(matches!(err, ArchiveError::OsSectionNotObject));
    }

    #[test]
    fn test_manifest_not_json() {
        let original = build_tar(&[("version.json", EntryType::Regular, &b"not json"[..])]);
        let err = replace_firmware(&original, b"fw").unwrap_err();
        assert!(matches!(err, ArchiveError::Manifest(_)));
    }

    #[test]
    fn test_directory_named_like_firmware_is_untouched() {
        let original = build_tar(&[("bin/os.bin", EntryType::Directory, &b""[..])]);
        let patched = replace_firmware(&original, b"fw").unwrap();
        assert!(!patched.report.firmware_replaced);
        assert_eq!(members(&original), members(&patched.data));
    }

    #[test]
    fn test_complete_patch_passes_check() {
        let patched = replace_firmware(&sample_bundle(), b"fw").unwrap();
        assert!(patched.report.ensure_complete().is_ok());
    }

    #[test]
    fn test_zeroed_bundle_is_incomplete() {
        // All-zero input reads as an empty archive
        let patched = replace_firmware(&[0u8; 4096], b"fw").unwrap();
        assert_eq!(patched.report.entries, 0);
        assert!(matches!(
            patched.report.ensure_complete(),
            Err(ArchiveError::MissingMember("bin/os.bin"))
        ));
    }

    #[test]
    fn test_missing_manifest_is_incomplete() {
        let original = build_tar(&[("bin/os.bin", EntryType::Regular, &b"vendor"[..])]);
        let patched = replace_firmware(&original, b"fw").unwrap();
        assert!(patched.report.firmware_replaced);
        assert!(matches!(
            patched.report.ensure_complete(),
            Err(ArchiveError::MissingMember("version.json"))
        ));
    }
}
