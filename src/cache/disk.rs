//! Persistent tier: one file per entry in a cache directory.
//!
//! File names start with the hex SHA-256 of the key, so arbitrary feed URLs
//! map to safe paths, and end with a per-write suffix so a pending delete of
//! an old file never races a rewrite of the same key. An in-memory index
//! keeps metadata; payload reads and writes run outside the table lock.
//!
//! A freshly inserted payload stays staged in memory until its write job has
//! renamed the file into place, so readers never look for a file too early.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{CacheEntry, EntryMeta, Tier};
use super::error::TierError;
use super::lock::mutex_lock;
use super::tier::{JobKind, Payload, PayloadRead, Removed, Stored, TierBackend, TierJob};

const SOURCE: &str = "cache::disk";
const ENTRY_EXTENSION: &str = "entry";
const STAGING_EXTENSION: &str = "tmp";

#[derive(Debug, Serialize, Deserialize)]
struct DiskEnvelope {
    key: String,
    created_at_ms: i64,
    expires_at_ms: i64,
    access_count: u64,
    value: String,
}

type Staged = Arc<Mutex<Option<Bytes>>>;

struct Slot {
    meta: EntryMeta,
    path: PathBuf,
    staged: Staged,
}

pub struct DiskTier {
    directory: PathBuf,
    capacity_bytes: u64,
    size_bytes: u64,
    index: HashMap<String, Slot>,
}

impl DiskTier {
    /// Open (creating if needed) a cache directory and index what it holds.
    ///
    /// Expired, unreadable, superseded and over-capacity files are deleted.
    pub fn open(directory: impl Into<PathBuf>, capacity_bytes: u64) -> Result<Self, TierError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let mut tier = Self {
            directory,
            capacity_bytes,
            size_bytes: 0,
            index: HashMap::new(),
        };
        tier.reindex(OffsetDateTime::now_utc())?;
        Ok(tier)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn reindex(&mut self, now: OffsetDateTime) -> Result<(), TierError> {
        let mut newest: HashMap<String, (CacheEntry, PathBuf)> = HashMap::new();
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(ENTRY_EXTENSION) => {}
                Some(STAGING_EXTENSION) => {
                    discard(&path, "interrupted_write");
                    continue;
                }
                _ => continue,
            }
            let entry = match read_envelope(&path) {
                Ok(entry) if !entry.is_expired(now) => entry,
                Ok(_) => {
                    discard(&path, "expired");
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Dropping unreadable cache file");
                    discard(&path, "unreadable");
                    continue;
                }
            };
            match newest.get(&entry.key) {
                Some((kept, _)) if kept.created_at >= entry.created_at => {
                    discard(&path, "superseded");
                }
                _ => {
                    if let Some((_, stale)) = newest.insert(entry.key.clone(), (entry, path)) {
                        discard(&stale, "superseded");
                    }
                }
            }
        }

        // Newest first, so they survive a shrunken capacity.
        let mut loaded: Vec<_> = newest.into_values().collect();
        loaded.sort_by_key(|(entry, _)| std::cmp::Reverse(entry.created_at));
        for (entry, path) in loaded {
            if self.size_bytes + entry.size_bytes > self.capacity_bytes {
                discard(&path, "over_capacity");
                continue;
            }
            self.size_bytes += entry.size_bytes;
            self.index.insert(
                entry.key.clone(),
                Slot {
                    meta: entry.meta(),
                    path,
                    staged: Arc::new(Mutex::new(None)),
                },
            );
        }

        info!(
            directory = %self.directory.display(),
            entries = self.index.len(),
            size_bytes = self.size_bytes,
            "Persistent cache tier indexed"
        );
        Ok(())
    }

    fn fresh_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory.join(format!(
            "{}-{}.{ENTRY_EXTENSION}",
            hex::encode(digest),
            Uuid::new_v4().simple()
        ))
    }
}

impl TierBackend for DiskTier {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn peek_meta(&self, key: &str) -> Option<EntryMeta> {
        self.index.get(key).map(|slot| slot.meta)
    }

    fn list_meta(&self) -> Vec<(String, EntryMeta)> {
        self.index
            .iter()
            .map(|(key, slot)| (key.clone(), slot.meta))
            .collect()
    }

    fn get(&mut self, key: &str) -> Option<Stored> {
        let slot = self.index.get_mut(key)?;
        slot.meta.access_count += 1;

        let staged = mutex_lock(&*slot.staged, SOURCE, "get").clone();
        let payload = match staged {
            Some(value) => Payload::Resident(value),
            None => {
                let path = slot.path.clone();
                let key = key.to_string();
                Payload::Deferred(PayloadRead::new(move || read_payload(&path, &key)))
            }
        };
        Some(Stored {
            meta: slot.meta,
            payload,
        })
    }

    fn insert(&mut self, mut entry: CacheEntry) -> Result<Vec<TierJob>, TierError> {
        let replaced = self.peek_meta(&entry.key).map_or(0, |meta| meta.size_bytes);
        let free = self.capacity_bytes.saturating_sub(self.size_bytes - replaced);
        if entry.size_bytes > free {
            return Err(TierError::NoRoom {
                size: entry.size_bytes,
                free,
            });
        }

        let mut jobs = Vec::with_capacity(2);
        if let Some(removed) = self.remove(&entry.key) {
            jobs.extend(removed.cleanup);
        }

        entry.tier = Tier::Persistent;
        let path = self.fresh_path(&entry.key);
        let staged: Staged = Arc::new(Mutex::new(Some(entry.value.clone())));
        let meta = entry.meta();

        self.size_bytes += entry.size_bytes;
        self.index.insert(
            entry.key.clone(),
            Slot {
                meta,
                path: path.clone(),
                staged: Arc::clone(&staged),
            },
        );

        let kind = JobKind::Write {
            key: entry.key.clone(),
            meta,
        };
        jobs.push(TierJob::new(kind, move || {
            write_envelope(&path, &entry)?;
            *mutex_lock(&*staged, SOURCE, "unstage") = None;
            Ok(())
        }));
        Ok(jobs)
    }

    fn remove(&mut self, key: &str) -> Option<Removed> {
        let slot = self.index.remove(key)?;
        self.size_bytes -= slot.meta.size_bytes;
        Some(Removed {
            meta: slot.meta,
            cleanup: Some(delete_job(slot.path)),
        })
    }

    fn clear(&mut self) -> Vec<TierJob> {
        self.size_bytes = 0;
        self.index
            .drain()
            .map(|(_, slot)| delete_job(slot.path))
            .collect()
    }
}

fn delete_job(path: PathBuf) -> TierJob {
    let kind = JobKind::Delete { path: path.clone() };
    TierJob::new(kind, move || remove_file_if_present(&path))
}

fn read_payload(path: &Path, key: &str) -> Result<Bytes, TierError> {
    let entry = read_envelope(path)?;
    if entry.key != key {
        return Err(TierError::ForeignEntry { found: entry.key });
    }
    Ok(entry.value)
}

fn read_envelope(path: &Path) -> Result<CacheEntry, TierError> {
    let raw = fs::read(path)?;
    let envelope: DiskEnvelope = serde_json::from_slice(&raw)?;
    let value = Bytes::from(STANDARD.decode(envelope.value.as_bytes())?);
    Ok(CacheEntry {
        key: envelope.key,
        size_bytes: value.len() as u64,
        value,
        tier: Tier::Persistent,
        created_at: from_millis(envelope.created_at_ms)?,
        expires_at: from_millis(envelope.expires_at_ms)?,
        access_count: envelope.access_count,
    })
}

fn write_envelope(path: &Path, entry: &CacheEntry) -> Result<(), TierError> {
    let envelope = DiskEnvelope {
        key: entry.key.clone(),
        created_at_ms: to_millis(entry.created_at),
        expires_at_ms: to_millis(entry.expires_at),
        access_count: entry.access_count,
        value: STANDARD.encode(&entry.value),
    };
    let body = serde_json::to_vec(&envelope)?;

    // Readers only ever see complete files.
    let staging = path.with_extension(STAGING_EXTENSION);
    fs::write(&staging, body)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn remove_file_if_present(path: &Path) -> Result<(), TierError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn discard(path: &Path, reason: &'static str) {
    debug!(path = %path.display(), reason, "Removing cache file");
    if let Err(err) = remove_file_if_present(path) {
        warn!(path = %path.display(), error = %err, "Failed to remove cache file");
    }
}

fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> Result<OffsetDateTime, TierError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|err| {
        TierError::Io(std::io::Error::new(ErrorKind::InvalidData, err.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn entry_at(key: &str, body: &str, now: OffsetDateTime, ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, Bytes::from(body.to_string()), now, ttl).expect("entry")
    }

    fn entry(key: &str, body: &str) -> CacheEntry {
        entry_at(key, body, OffsetDateTime::now_utc(), Duration::from_secs(600))
    }

    fn run_all(jobs: Vec<TierJob>) {
        for job in jobs {
            job.run().expect("tier job");
        }
    }

    fn entry_files(dir: &TempDir) -> usize {
        fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|item| item.path().extension().and_then(|ext| ext.to_str()) == Some("entry"))
            .count()
    }

    fn read_value(stored: Stored) -> Bytes {
        match stored.payload {
            Payload::Resident(value) => value,
            Payload::Deferred(read) => read.run().expect("read payload"),
        }
    }

    #[test]
    fn insert_defers_file_io_to_returned_jobs() {
        let dir = TempDir::new().expect("tempdir");
        let mut tier = DiskTier::open(dir.path(), 1024).expect("open");

        let jobs = tier
            .insert(entry("https://example.com/rss?page=2", "<rss/>"))
            .expect("insert");
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 6);
        assert_eq!(entry_files(&dir), 0);
        assert!(matches!(jobs.as_slice(), [job] if matches!(job.kind(), JobKind::Write { .. })));

        // Staged bytes serve reads before the file exists.
        let staged = tier.get("https://example.com/rss?page=2").expect("present");
        assert!(matches!(staged.payload, Payload::Resident(_)));

        run_all(jobs);
        assert_eq!(entry_files(&dir), 1);

        let read = tier.get("https://example.com/rss?page=2").expect("present");
        assert_eq!(read.meta.access_count, 2);
        assert!(matches!(read.payload, Payload::Deferred(_)));
        assert_eq!(read_value(read), Bytes::from_static(b"<rss/>"));

        let removed = tier.remove("https://example.com/rss?page=2").expect("removed");
        assert_eq!(removed.meta.size_bytes, 6);
        assert!(tier.is_empty());
        assert_eq!(entry_files(&dir), 1);
        run_all(removed.cleanup.into_iter().collect());
        assert_eq!(entry_files(&dir), 0);
    }

    #[test]
    fn refuses_entries_without_room() {
        let dir = TempDir::new().expect("tempdir");
        let mut tier = DiskTier::open(dir.path(), 8).expect("open");

        run_all(tier.insert(entry("a", "12345")).expect("insert"));
        let err = tier.insert(entry("b", "12345")).expect_err("no room");
        assert!(matches!(err, TierError::NoRoom { size: 5, free: 3 }));

        // Overwriting reuses the replaced entry's bytes.
        let jobs = tier.insert(entry("a", "12345678")).expect("overwrite");
        assert_eq!(tier.size_bytes(), 8);
        assert_eq!(jobs.len(), 2);
        run_all(jobs);
        assert_eq!(entry_files(&dir), 1);
    }

    #[test]
    fn delete_of_old_file_does_not_touch_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let mut tier = DiskTier::open(dir.path(), 1024).expect("open");
        run_all(tier.insert(entry("a", "old")).expect("insert"));

        let cleanup = tier.remove("a").expect("removed").cleanup;
        run_all(tier.insert(entry("a", "new")).expect("rewrite"));
        run_all(cleanup.into_iter().collect());

        let read = tier.get("a").expect("present");
        assert_eq!(read_value(read), Bytes::from_static(b"new"));
    }

    #[test]
    fn reopen_restores_live_entries_and_drops_expired() {
        let dir = TempDir::new().expect("tempdir");
        let past = OffsetDateTime::now_utc() - time::Duration::hours(2);
        {
            let mut tier = DiskTier::open(dir.path(), 1024).expect("open");
            run_all(tier.insert(entry("live", "fresh")).expect("insert live"));
            run_all(
                tier.insert(entry_at("stale", "old", past, Duration::from_secs(60)))
                    .expect("insert stale"),
            );
        }

        let mut reopened = DiskTier::open(dir.path(), 1024).expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert!(reopened.peek_meta("stale").is_none());
        let live = reopened.get("live").expect("present");
        assert_eq!(read_value(live), Bytes::from_static(b"fresh"));
    }

    #[test]
    fn reopen_keeps_newest_copy_of_a_key() {
        let dir = TempDir::new().expect("tempdir");
        let earlier = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        {
            let mut tier = DiskTier::open(dir.path(), 1024).expect("open");
            // An interrupted rewrite can leave both files behind.
            let old = tier
                .insert(entry_at("feed", "v1", earlier, Duration::from_secs(600)))
                .expect("insert v1");
            run_all(old);
            let newer = tier.insert(entry("feed", "v2")).expect("insert v2");
            for job in newer {
                if matches!(job.kind(), JobKind::Write { .. }) {
                    job.run().expect("write v2");
                }
            }
        }
        assert_eq!(entry_files(&dir), 2);

        let mut reopened = DiskTier::open(dir.path(), 1024).expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert_eq!(entry_files(&dir), 1);
        let read = reopened.get("feed").expect("present");
        assert_eq!(read_value(read), Bytes::from_static(b"v2"));
    }

    #[test]
    fn reopen_drops_garbage_files() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("bogus.entry"), b"not json").expect("write garbage");
        fs::write(dir.path().join("half.tmp"), b"{").expect("write staging");

        let tier = DiskTier::open(dir.path(), 1024).expect("open");
        assert!(tier.is_empty());
        assert!(!dir.path().join("bogus.entry").exists());
        assert!(!dir.path().join("half.tmp").exists());
    }

    #[test]
    fn clear_returns_one_delete_per_file() {
        let dir = TempDir::new().expect("tempdir");
        let mut tier = DiskTier::open(dir.path(), 1024).expect("open");
        run_all(tier.insert(entry("a", "1")).expect("insert"));
        run_all(tier.insert(entry("b", "2")).expect("insert"));

        let jobs = tier.clear();
        assert_eq!(jobs.len(), 2);
        assert_eq!(tier.size_bytes(), 0);
        run_all(jobs);
        assert_eq!(entry_files(&dir), 0);
    }
}
