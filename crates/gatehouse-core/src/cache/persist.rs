//! Atomic snapshot persistence shared by the response and prompt caches.
//!
//! Both caches serialize `{entries, order, stats}` with `bincode` and write
//! it out as write-temp + fsync + rename, so a reader never observes a
//! partially-written file. Disk errors are swallowed by callers per the
//! spec's failure semantics (in-memory state stays authoritative); this
//! module only returns errors, the decision to log-and-ignore lives in the
//! cache's own `persist_tick`.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use super::types::{CacheError, CacheResult};

/// Writes `value` to `path` via a sibling temp file, fsync, then rename.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> CacheResult<()> {
    let bytes = bincode::serialize(value).map_err(CacheError::Encode)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| CacheError::Write {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| CacheError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tmp.write_all(&bytes).map_err(|source| CacheError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tmp.as_file().sync_all().map_err(|source| CacheError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tmp.persist(path).map_err(|e| CacheError::Write {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

/// Loads a snapshot from `path`. A missing file is treated as "no snapshot"
/// (`Ok(None)`), matching the spec's "file missing is an empty cache" rule;
/// any other I/O or decode error is returned.
pub fn load_atomic<T: DeserializeOwned>(path: &Path) -> CacheResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let value = bincode::deserialize(&bytes).map_err(|source| CacheError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        a: u32,
        b: String,
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.bin");
        let doc = Doc {
            a: 7,
            b: "hi".into(),
        };
        save_atomic(&path, &doc).unwrap();
        let loaded: Option<Doc> = load_atomic(&path).unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.bin");
        let loaded: Option<Doc> = load_atomic(&path).unwrap();
        assert_eq!(loaded, None);
    }
}
