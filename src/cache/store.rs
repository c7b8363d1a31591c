//! Key-value backends behind the [`Cache`](super::Cache).
//!
//! A backend knows nothing about HTTP caching rules; it only keeps
//! [`ServerResponse`] snapshots by cache key. Calls are synchronous and must
//! be made off the async executor.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::entry::ServerResponse;
use crate::http::body::MessageBody;

pub trait Storage: Send + Sync {
    fn put(&self, key: &str, entry: &ServerResponse) -> io::Result<()>;
    fn get(&self, key: &str) -> io::Result<Option<ServerResponse>>;
    fn remove(&self, key: &str) -> io::Result<()>;
    fn keys(&self) -> Vec<String>;
    fn clear(&self) -> io::Result<()>;
}

/// Process-lifetime store.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, ServerResponse>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn put(&self, key: &str, entry: &ServerResponse) -> io::Result<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Option<ServerResponse>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn clear(&self) -> io::Result<()> {
        self.entries.clear();
        Ok(())
    }
}

const HEAD_EXT: &str = "head";
const BODY_EXT: &str = "body";
const TMP_EXT: &str = "tmp";

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

/// What a head file holds.
#[derive(Clone, Serialize, Deserialize)]
struct PersistedHead {
    key: String,
    /// Name of the body file inside the store directory.
    body_file: String,
    body_len: u64,
    entry: ServerResponse,
}

/// Store that survives restarts.
///
/// Every entry is a head file `<hash>.head`, named after a hash of its key
/// and holding the JSON encoded header data, and a body file whose name is
/// recorded in the head. Each write of a body goes to a fresh file name, so
/// a committed head always points at the body it was written with.
///
/// Files are written to a temporary file, synced and renamed into place, the
/// head last: an entry exists on disk once its head file does. The body it
/// replaces is deleted afterwards. Heads are loaded into memory on open;
/// bodies are read on demand.
///
/// One head file serves one key: storing a key whose hash collides with a
/// stored one evicts the older entry.
pub struct DiskStore {
    dir: PathBuf,
    heads: DashMap<u64, PersistedHead>,
}

impl DiskStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            heads: DashMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn head_path(&self, slot: u64) -> PathBuf {
        self.dir.join(format!("{slot:016x}.{HEAD_EXT}"))
    }

    fn load(&self) -> io::Result<()> {
        let mut bodies = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(TMP_EXT) => {
                    debug!(path = %path.display(), "removing unfinished cache write");
                    remove_if_exists(&path)?;
                }
                Some(HEAD_EXT) => {
                    if let Err(err) = self.load_head(&path) {
                        warn!(path = %path.display(), "skipping unreadable cache entry: {err}");
                    }
                }
                Some(BODY_EXT) => bodies.push(path),
                _ => {}
            }
        }

        // bodies written by an overwrite that never committed its head
        for path in bodies {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !self.heads.iter().any(|h| h.body_file == name) {
                debug!(path = %path.display(), "removing orphaned cache body");
                remove_if_exists(&path)?;
            }
        }
        debug!(dir = %self.dir.display(), entries = self.heads.len(), "cache store opened");
        Ok(())
    }

    fn load_head(&self, path: &Path) -> io::Result<()> {
        let persisted: PersistedHead = serde_json::from_slice(&fs::read(path)?)?;
        let slot = key_hash(&persisted.key);
        if path != self.head_path(slot) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "head file does not match its key"));
        }
        let body_len = fs::metadata(self.dir.join(&persisted.body_file))?.len();
        if body_len != persisted.body_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("body has {body_len} bytes, head expects {}", persisted.body_len),
            ));
        }
        self.heads.insert(slot, persisted);
        Ok(())
    }

    fn put_in_slot(&self, slot: u64, key: &str, entry: &ServerResponse) -> io::Result<()> {
        let mut head = entry.clone();
        head.body = MessageBody::empty();
        let body = entry.body.as_bytes();
        let persisted = PersistedHead {
            key: key.to_string(),
            body_file: format!("{slot:016x}-{}.{BODY_EXT}", next_generation()),
            body_len: body.len() as u64,
            entry: head,
        };
        let json = serde_json::to_vec(&persisted)?;

        let body_path = self.dir.join(&persisted.body_file);
        self.write_atomically(&body_path, body)?;
        if let Err(err) = self.write_atomically(&self.head_path(slot), &json) {
            let _ = remove_if_exists(&body_path);
            return Err(err);
        }

        if let Some(previous) = self.heads.insert(slot, persisted) {
            if previous.key != key {
                debug!(evicted = %previous.key, key, "cache key collision");
            }
            remove_if_exists(&self.dir.join(&previous.body_file))?;
        }
        Ok(())
    }

    /// Forgets the entry in `slot` and deletes its files.
    fn drop_slot(&self, slot: u64) -> io::Result<()> {
        if let Some((_, previous)) = self.heads.remove(&slot) {
            remove_if_exists(&self.head_path(slot))?;
            remove_if_exists(&self.dir.join(&previous.body_file))?;
        }
        Ok(())
    }

    fn write_atomically(&self, target: &Path, data: &[u8]) -> io::Result<()> {
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".");
        tmp.push(TMP_EXT);
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, target)
    }
}

impl Storage for DiskStore {
    fn put(&self, key: &str, entry: &ServerResponse) -> io::Result<()> {
        self.put_in_slot(key_hash(key), key, entry)
    }

    fn get(&self, key: &str) -> io::Result<Option<ServerResponse>> {
        let slot = key_hash(key);
        let Some(head) = self.heads.get(&slot).map(|h| h.value().clone()) else {
            return Ok(None);
        };
        if head.key != key {
            return Ok(None);
        }
        match fs::read(self.dir.join(&head.body_file)) {
            Ok(body) if body.len() as u64 == head.body_len => {
                let mut entry = head.entry;
                entry.body = MessageBody::new(body);
                Ok(Some(entry))
            }
            Ok(body) => {
                warn!(key, expected = head.body_len, found = body.len(), "cache body damaged, dropping entry");
                self.drop_slot(slot)?;
                Ok(None)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(key, "cache body vanished, dropping entry");
                self.drop_slot(slot)?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let slot = key_hash(key);
        if self.heads.get(&slot).is_some_and(|h| h.key == key) {
            self.drop_slot(slot)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.heads.iter().map(|h| h.key.clone()).collect()
    }

    fn clear(&self) -> io::Result<()> {
        let slots: Vec<u64> = self.heads.iter().map(|h| *h.key()).collect();
        for slot in slots {
            self.drop_slot(slot)?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Unique across the store's lifetime, restarts included.
fn next_generation() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}-{seq:x}")
}

/// FNV-1a, stable across runs and platforms.
fn key_hash(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::http::request::RequestHeader;
    use crate::http::response::ResponseHeader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn temp_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "rustyproxy-store-{name}-{}-{n}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample(path: &str, body: &[u8]) -> ServerResponse {
        let request = RequestHeader::new(HttpMethod::Get, path, "example.com", 80);
        let mut header = ResponseHeader::new(200, "OK");
        header
            .fields
            .set("ETag", "\"v1\"")
            .set("Content-Length", &body.len().to_string());
        ServerResponse::new(request, header, MessageBody::new(body.to_vec()), SystemTime::now())
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let entry = sample("/a", b"alpha");
        store.put("example.com/a", &entry).unwrap();

        let got = store.get("example.com/a").unwrap().unwrap();
        assert_eq!(got.body.as_bytes(), b"alpha");
        assert_eq!(got.header, entry.header);
        assert_eq!(store.keys(), vec!["example.com/a".to_string()]);

        store.remove("example.com/a").unwrap();
        assert!(store.get("example.com/a").unwrap().is_none());
    }

    #[test]
    fn test_disk_store_survives_reopen() {
        let dir = temp_dir("reopen");
        let entry = sample("/a", b"alpha");
        {
            let store = DiskStore::open(&dir).unwrap();
            store.put("example.com/a", &entry).unwrap();
            store.put("example.com/b", &sample("/b", b"")).unwrap();
        }

        let store = DiskStore::open(&dir).unwrap();
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["example.com/a", "example.com/b"]);

        let got = store.get("example.com/a").unwrap().unwrap();
        assert_eq!(got.body.as_bytes(), b"alpha");
        assert_eq!(got.header, entry.header);
        assert_eq!(got.request, entry.request);
        assert_eq!(got.request_sent, entry.request_sent);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_remove_and_clear() {
        let dir = temp_dir("remove");
        let store = DiskStore::open(&dir).unwrap();
        store.put("example.com/a", &sample("/a", b"alpha")).unwrap();
        store.put("example.com/b", &sample("/b", b"beta")).unwrap();

        store.remove("example.com/a").unwrap();
        store.remove("example.com/missing").unwrap();
        assert!(store.get("example.com/a").unwrap().is_none());
        assert!(store.get("example.com/b").unwrap().is_some());

        store.clear().unwrap();
        assert!(store.keys().is_empty());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let reopened = DiskStore::open(&dir).unwrap();
        assert!(reopened.keys().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_skips_debris() {
        let dir = temp_dir("debris");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("0000000000000001.head"), b"{ not json").unwrap();
        fs::write(dir.join("0000000000000002.tmp"), b"partial").unwrap();

        let store = DiskStore::open(&dir).unwrap();
        assert!(store.keys().is_empty());
        assert!(!dir.join("0000000000000002.tmp").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_overwrite_interrupted_before_head() {
        let dir = temp_dir("interrupted");
        let key = "example.com/a";
        {
            let store = DiskStore::open(&dir).unwrap();
            store.put(key, &sample("/a", b"alpha")).unwrap();
            // a new body reached the disk, its head never did
            let slot = key_hash(key);
            store
                .write_atomically(&dir.join(format!("{slot:016x}-ffff.body")), b"a much longer new body")
                .unwrap();
        }

        let store = DiskStore::open(&dir).unwrap();
        let got = store.get(key).unwrap().unwrap();
        assert_eq!(got.header.fields.get("Content-Length"), Some("5"));
        assert_eq!(got.body.as_bytes(), b"alpha");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_overwrite_replaces_body_file() {
        let dir = temp_dir("overwrite");
        let store = DiskStore::open(&dir).unwrap();
        store.put("example.com/a", &sample("/a", b"alpha")).unwrap();
        store.put("example.com/a", &sample("/a", b"alpha, second edition")).unwrap();

        let got = store.get("example.com/a").unwrap().unwrap();
        assert_eq!(got.body.as_bytes(), b"alpha, second edition");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_rejects_body_of_wrong_length() {
        let dir = temp_dir("damaged");
        let key = "example.com/a";
        {
            let store = DiskStore::open(&dir).unwrap();
            store.put(key, &sample("/a", b"alpha")).unwrap();
            let body_file = store.heads.get(&key_hash(key)).unwrap().body_file.clone();
            fs::write(dir.join(body_file), b"tampered with").unwrap();
            assert!(store.get(key).unwrap().is_none());
            assert!(store.keys().is_empty());
        }

        let store = DiskStore::open(&dir).unwrap();
        store.put(key, &sample("/a", b"alpha")).unwrap();
        let body_file = store.heads.get(&key_hash(key)).unwrap().body_file.clone();
        fs::write(dir.join(body_file), b"al").unwrap();
        drop(store);
        assert!(DiskStore::open(&dir).unwrap().keys().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_disk_store_colliding_keys_never_share_a_body() {
        let dir = temp_dir("collision");
        let store = DiskStore::open(&dir).unwrap();
        let slot = key_hash("example.com/a");
        store.put("example.com/a", &sample("/a", b"alpha")).unwrap();
        store.put_in_slot(slot, "example.com/b", &sample("/b", b"beta")).unwrap();

        assert!(store.get("example.com/a").unwrap().is_none());
        assert_eq!(store.keys(), vec!["example.com/b".to_string()]);
        let occupant = store.heads.get(&slot).unwrap().value().clone();
        assert_eq!(occupant.key, "example.com/b");
        assert_eq!(fs::read(dir.join(&occupant.body_file)).unwrap(), b"beta");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);

        // removing the evicted key leaves its successor alone
        store.remove("example.com/a").unwrap();
        assert_eq!(store.keys(), vec!["example.com/b".to_string()]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_key_hash_is_stable() {
        assert_eq!(key_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(key_hash("example.com/a"), key_hash("example.com/b"));
    }
}
