// src/stage/cache.rs

//! Incremental cache: per-stage `path -> fingerprint` partitions.
//!
//! Each stage owns one [`CachePartition`]; partitions never share entries,
//! so no lock is held across stages. Within a partition, checking a
//! fingerprint and recording the new one happen under a single lock.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::types::CacheStorageMode;

/// Relative path (from the project root) of the persisted cache.
pub const CACHE_FILE_PATH: &str = ".assetdag/cache";

/// Reserved entry holding the fingerprint of an aggregating stage's sorted
/// source list. The leading control character keeps it apart from any
/// real path.
pub const SOURCE_SET_KEY: &str = "\u{1}sources";

type Entries = HashMap<String, String>;

/// One stage's slice of the cache.
#[derive(Debug, Clone, Default)]
pub struct CachePartition {
    entries: Arc<Mutex<Entries>>,
}

impl CachePartition {
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically compare `fingerprint` against the stored one and record it.
    ///
    /// Returns `true` when the file is new or changed (and must be
    /// processed), `false` when it is unchanged (and must be skipped).
    pub fn check_and_record(&self, path: &str, fingerprint: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(path) {
            Some(old) if old == fingerprint => false,
            _ => {
                entries.insert(path.to_string(), fingerprint.to_string());
                true
            }
        }
    }

    /// Drop the entry for `path`, so the next run treats it as new.
    pub fn forget(&self, path: &str) -> bool {
        self.lock().remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Entries {
        self.lock().clone()
    }
}

/// Owner of every stage partition, optionally persisted to disk.
#[derive(Debug, Clone)]
pub struct CacheStore {
    partitions: Arc<Mutex<HashMap<String, CachePartition>>>,
    file: Option<PathBuf>,
}

impl CacheStore {
    /// Memory-only store.
    pub fn in_memory() -> Self {
        Self {
            partitions: Arc::new(Mutex::new(HashMap::new())),
            file: None,
        }
    }

    /// Open a store for `mode`. In file mode existing entries are loaded
    /// from `<root>/.assetdag/cache`.
    pub fn open(mode: CacheStorageMode, root: &Path) -> Result<Self> {
        match mode {
            CacheStorageMode::Memory => Ok(Self::in_memory()),
            CacheStorageMode::File => {
                let path = root.join(CACHE_FILE_PATH);
                let loaded = load_entries(&path)?;
                let partitions = loaded
                    .into_iter()
                    .map(|(stage, entries)| {
                        (
                            stage,
                            CachePartition {
                                entries: Arc::new(Mutex::new(entries)),
                            },
                        )
                    })
                    .collect();
                Ok(Self {
                    partitions: Arc::new(Mutex::new(partitions)),
                    file: Some(path),
                })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachePartition>> {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The partition owned by `stage`, created on first use.
    pub fn partition(&self, stage: &str) -> CachePartition {
        self.lock().entry(stage.to_string()).or_default().clone()
    }

    /// Remove `path` from the partitions of `stages`.
    ///
    /// Returns the number of entries actually removed.
    pub fn evict(&self, stages: &[String], path: &str) -> usize {
        let partitions = self.lock();
        let mut removed = 0;
        for stage in stages {
            if let Some(partition) = partitions.get(stage) {
                if partition.forget(path) {
                    debug!(stage = %stage, path = %path, "evicted cache entry");
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Drop partitions of stages no longer declared.
    pub fn prune(&self, active_stages: &[&str]) {
        let mut partitions = self.lock();
        let before = partitions.len();
        partitions.retain(|k, _| active_stages.contains(&k.as_str()));
        if partitions.len() < before {
            info!(removed = before - partitions.len(), "pruned stale cache partitions");
        }
    }

    /// Write all partitions to disk (no-op for a memory store).
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };

        let snapshot: BTreeMap<String, Entries> = self
            .lock()
            .iter()
            .map(|(stage, p)| (stage.clone(), p.snapshot()))
            .collect();

        save_entries(path, &snapshot)?;
        debug!(path = ?path, "persisted incremental cache");
        Ok(())
    }
}

/// Load `<stage>\t<path>\t<fingerprint>` lines.
fn load_entries(path: &Path) -> Result<HashMap<String, Entries>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).with_context(|| format!("opening cache file at {:?}", path))?;
    let reader = BufReader::new(file);

    let mut map: HashMap<String, Entries> = HashMap::new();
    for line_res in reader.lines() {
        let line = line_res?;
        let mut parts = line.splitn(3, '\t');
        if let (Some(stage), Some(file), Some(hash)) = (parts.next(), parts.next(), parts.next()) {
            map.entry(stage.to_string())
                .or_default()
                .insert(file.to_string(), hash.trim().to_string());
        }
    }

    Ok(map)
}

fn save_entries(path: &Path, map: &BTreeMap<String, Entries>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory at {:?}", parent))?;
    }

    let file = File::create(path).with_context(|| format!("creating cache file at {:?}", path))?;
    let mut writer = BufWriter::new(file);

    for (stage, entries) in map {
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort();
        for (file, hash) in sorted {
            writeln!(writer, "{stage}\t{file}\t{hash}")?;
        }
    }

    writer.flush()?;
    Ok(())
}
