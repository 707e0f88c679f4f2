//! On-disk credential directory: one JSON file per credential.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::{Credential, CredentialError, CredentialResult};

fn credential_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Loads every credential file in `dir`. Unknown/unparseable files are
/// logged and skipped rather than aborting the whole load, so one corrupt
/// file can't take down the pool for every other provider.
pub fn load_all(dir: &Path) -> CredentialResult<Vec<Credential>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read_dir = fs::read_dir(dir).map_err(|source| CredentialError::DirRead {
        path: dir.display().to_string(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable credential directory entry");
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Credential>(&bytes) {
                Ok(cred) => out.push(cred),
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unparseable credential file"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable credential file"),
        }
    }
    Ok(out)
}

/// Atomically writes one credential's file (write-temp + rename).
pub fn save_one(dir: &Path, cred: &Credential) -> CredentialResult<()> {
    fs::create_dir_all(dir).map_err(|source| CredentialError::Write {
        path: dir.display().to_string(),
        source,
    })?;
    let path = credential_path(dir, &cred.id);
    let bytes = serde_json::to_vec_pretty(cred).map_err(|source| CredentialError::Decode {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| CredentialError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tmp.write_all(&bytes).map_err(|source| CredentialError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tmp.persist(&path).map_err(|e| CredentialError::Write {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

/// Removes a credential's file from disk. Missing files are not an error.
pub fn delete_one(dir: &Path, id: &str) -> CredentialResult<()> {
    let path = credential_path(dir, id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CredentialError::Write {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::types::AuthMaterial;
    use tempfile::TempDir;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let cred = Credential::new(
            "cred-1",
            "openai-compat",
            "primary",
            AuthMaterial::ApiKey { key: "sk-abcdef".into() },
        );
        save_one(dir.path(), &cred).unwrap();
        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "cred-1");
    }

    #[test]
    fn unparseable_file_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        let cred = Credential::new("cred-1", "claude", "primary", AuthMaterial::ApiKey { key: "k".into() });
        save_one(dir.path(), &cred).unwrap();
        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(delete_one(dir.path(), "nope").is_ok());
    }
}
