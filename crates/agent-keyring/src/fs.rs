use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::backend::{KeyBackend, KeyResult};
use crate::error::KeyStoreError;
use crate::record::KeyRecord;

/// Filesystem-backed key store, one JSON document per key.
///
/// Layout: `<root>/keys/key-<generation, zero padded>.json`
///
/// Records are written to a temp file in the same directory and published
/// with a no-clobber rename, so readers see either nothing or the whole
/// record, and two writers racing on one generation cannot both win. On unix
/// the directory is `0700` and records are `0600`.
pub struct FsKeyBackend {
    keys_dir: PathBuf,
}

impl FsKeyBackend {
    /// Open (creating if needed) the key directory under `root`.
    pub fn new(root: impl AsRef<Path>) -> KeyResult<Self> {
        let keys_dir = root.as_ref().join("keys");
        fs::create_dir_all(&keys_dir)?;
        restrict_permissions(&keys_dir, 0o700)?;
        Ok(Self { keys_dir })
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    fn record_path(&self, generation: u64) -> PathBuf {
        self.keys_dir.join(format!("key-{generation:08}.json"))
    }
}

impl KeyBackend for FsKeyBackend {
    fn put(&self, record: &KeyRecord) -> KeyResult<()> {
        let path = self.record_path(record.generation);
        if path.exists() {
            return Err(KeyStoreError::GenerationTaken(record.generation));
        }

        let json = serde_json::to_vec_pretty(record).map_err(|e| {
            KeyStoreError::KeyGenerationFailed(format!("failed to encode key record: {e}"))
        })?;

        let mut tmp = NamedTempFile::new_in(&self.keys_dir)?;
        restrict_permissions(tmp.path(), 0o600)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                KeyStoreError::GenerationTaken(record.generation)
            } else {
                KeyStoreError::KeyStoreUnavailable(e.error.to_string())
            }
        })?;

        Ok(())
    }

    fn list(&self) -> KeyResult<Vec<KeyRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.keys_dir)? {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("key-") && n.ends_with(".json"));
            if !is_record {
                continue;
            }

            let raw = fs::read_to_string(&path)?;
            let record: KeyRecord =
                serde_json::from_str(&raw).map_err(|e| KeyStoreError::CorruptRecord {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> KeyResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> KeyResult<()> {
    Ok(())
}
