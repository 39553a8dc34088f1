//! Checkpoint files for the mutable index.
//!
//! A checkpoint is a bincode payload followed by an 8-byte footer:
//! `[payload][magic "NGX1"][u32 CRC32 BE]`. Writes go to a temp file that is
//! renamed over the target, so a crash never leaves a torn checkpoint.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Magic bytes written before the CRC32 footer of index checkpoints.
const CHECKPOINT_CRC_MAGIC: &[u8; 4] = b"NGX1";

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = temp_path(path);
    fs::write(&tmp_path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` and write it as a checksummed checkpoint. Returns the CRC32.
pub fn save_checkpoint<T: Serialize>(value: &T, path: &Path) -> Result<u32> {
    let bytes =
        bincode::serialize(value).map_err(|e| Error::Corrupt(format!("encode failed: {e}")))?;
    let crc = crc32fast::hash(&bytes);

    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(CHECKPOINT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    write_atomic(path, &output)?;
    tracing::info!(
        "Saved checkpoint {:?} ({} bytes, CRC32={:#010x})",
        path,
        bytes.len(),
        crc
    );
    Ok(crc)
}

/// Read and verify a checkpoint written by [`save_checkpoint`].
pub fn load_checkpoint<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    let payload = verify_footer(&raw)?;
    bincode::deserialize(payload).map_err(|e| Error::Corrupt(format!("decode failed: {e}")))
}

fn verify_footer(raw: &[u8]) -> Result<&[u8]> {
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != CHECKPOINT_CRC_MAGIC {
        return Err(Error::Corrupt(
            "missing checkpoint footer (not a navgraph checkpoint?)".to_string(),
        ));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::Corrupt(format!(
            "checkpoint CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }
    tracing::debug!("Checkpoint CRC32 verified: {:#010x}", stored_crc);
    Ok(payload)
}
