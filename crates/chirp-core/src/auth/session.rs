use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use super::store::{decode_pair, SessionStore, StoreError, STORAGE_KEY};
use crate::models::CredentialPair;

/// Distinguishes temp files written concurrently within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Credential pair persisted as `token.json` in a directory.
///
/// Saves go to a sibling temp file that is renamed over the real one, so a
/// concurrent `load` sees the old document or the new one.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", STORAGE_KEY))
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{}.json.{}.{}.tmp", STORAGE_KEY, std::process::id(), n))
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(decode_pair(&contents, "file"))
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(&self.dir)?;

        let contents = serde_json::to_string_pretty(pair)?;
        let temp = self.temp_path();
        if let Err(e) = write_private(&temp, contents.as_bytes()) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, self.path()) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(path = %self.path().display(), "Saved credentials");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write a file readable only by the current user.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("chirp"));
        (dir, store)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());

        let pair = CredentialPair::new("AT1", "RT1");
        store.save(&pair).unwrap();
        assert_eq!(store.load().unwrap(), Some(pair));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_clear_without_file() {
        let (_dir, store) = store();
        store.clear().unwrap();
    }

    #[test]
    fn test_malformed_file_loads_as_none() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        fs::write(store.path(), "[]").unwrap();
        assert!(store.load().unwrap().is_none());

        fs::write(store.path(), r#"{"access_token": "AT1"}"#).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, store) = store();
        store.save(&CredentialPair::new("AT1", "RT1")).unwrap();
        store.save(&CredentialPair::new("AT2", "RT2")).unwrap();

        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            store.load().unwrap(),
            Some(CredentialPair::new("AT2", "RT2"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store.save(&CredentialPair::new("AT1", "RT1")).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_concurrent_loads_never_see_partial_pair() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        store.save(&CredentialPair::new("AT0", "RT0")).unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..50 {
                    let pair = CredentialPair::new(format!("AT{}", i), format!("RT{}", i));
                    store.save(&pair).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let pair = store.load().unwrap().expect("pair is always present");
            // Tokens always come from the same save
            assert_eq!(&pair.access_token[2..], &pair.refresh_token[2..]);
        }
        writer.join().unwrap();
    }
}
