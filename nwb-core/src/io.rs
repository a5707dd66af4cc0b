//! Document persistence
//!
//! On-disk container: 8-byte magic, u32 little-endian format version, then the
//! document as named MessagePack. Writes go to a sibling `.partial` file that
//! is synced and renamed over the target, so a failed write never leaves a
//! truncated document at the requested path. An existing document at the
//! target is overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::document::NwbDocument;
use crate::error::{NwbError, Result};

pub const MAGIC: &[u8; 8] = b"LIMSNWB\0";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write over whatever is at the target.
    Overwrite,
    /// Delete the target first; the target must exist.
    RemoveFirst,
}

pub fn encode_document(document: &NwbDocument) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(document)?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub fn decode_document(bytes: &[u8]) -> Result<NwbDocument> {
    let header_len = MAGIC.len() + 4;
    if bytes.len() < header_len || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NwbError::Format("not a LIMS NWB document".to_string()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[MAGIC.len()..header_len]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(NwbError::Format(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    Ok(rmp_serde::from_slice(&bytes[header_len..])?)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Remove the file at `path`. A missing file is an `Io` (`NotFound`) error.
pub fn remove_existing(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| {
        tracing::error!("Failed to remove {}: {}", path.display(), e);
        NwbError::Io(e)
    })?;
    tracing::info!("Removed existing file {}", path.display());
    Ok(())
}

pub fn write_document(document: &NwbDocument, path: impl AsRef<Path>, mode: WriteMode) -> Result<()> {
    let path = path.as_ref();
    if mode == WriteMode::RemoveFirst {
        remove_existing(path)?;
    }

    let bytes = encode_document(document)?;
    let partial = partial_path(path);
    let written = write_synced(&partial, &bytes).and_then(|_| fs::rename(&partial, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e.into());
    }

    tracing::info!(
        "Wrote document '{}' ({} bytes) to {}",
        document.identifier,
        bytes.len(),
        path.display()
    );
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

pub fn read_document(path: impl AsRef<Path>) -> Result<NwbDocument> {
    let mut bytes = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut bytes)?;
    decode_document(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn document() -> NwbDocument {
        let t = Utc.with_ymd_and_hms(2018, 9, 26, 14, 30, 0).unwrap();
        NwbDocument::new("754312389", "EcephysSession", t, t, "test")
    }

    // ========================================================================
    // TEST 1: write then read returns the same document
    // ========================================================================
    #[test]
    fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("754312389.nwb");
        let doc = document();

        write_document(&doc, &path, WriteMode::Overwrite).unwrap();
        assert_eq!(read_document(&path).unwrap(), doc);
        assert!(!partial_path(&path).exists());
    }

    // ========================================================================
    // TEST 2: both modes replace an existing file
    // ========================================================================
    #[test]
    fn test_existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nwb");

        fs::write(&path, b"stale").unwrap();
        write_document(&document(), &path, WriteMode::Overwrite).unwrap();
        assert_eq!(read_document(&path).unwrap(), document());
        assert!(!partial_path(&path).exists());

        fs::write(&path, b"stale").unwrap();
        write_document(&document(), &path, WriteMode::RemoveFirst).unwrap();
        assert_eq!(read_document(&path).unwrap(), document());
    }

    // ========================================================================
    // TEST 3: RemoveFirst on a missing file fails before writing
    // ========================================================================
    #[test]
    fn test_remove_first_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.nwb");

        let err = write_document(&document(), &path, WriteMode::RemoveFirst).unwrap_err();
        assert!(matches!(err, NwbError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    // ========================================================================
    // TEST 4: unwritable target surfaces an IO error and leaves nothing behind
    // ========================================================================
    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("out.nwb");

        let err = write_document(&document(), &path, WriteMode::Overwrite).unwrap_err();
        assert!(matches!(err, NwbError::Io(_)));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    // ========================================================================
    // TEST 5: foreign bytes and version bumps are format errors
    // ========================================================================
    #[test]
    fn test_decode_rejects_foreign_bytes() {
        assert!(matches!(decode_document(b"\x89HDF\r\n\x1a\n"), Err(NwbError::Format(_))));

        let mut bytes = encode_document(&document()).unwrap();
        bytes[MAGIC.len()] = 9;
        assert!(matches!(decode_document(&bytes), Err(NwbError::Format(_))));
    }
}
