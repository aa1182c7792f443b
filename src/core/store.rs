use crate::core::hash::{FuzzyHash, StrictHash};
use crate::core::record::{PostId, format_record, parse_line};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store {path} is locked by another process (remove {lock} if it is stale)")]
    Locked { path: String, lock: String },
}

/// Append-only sink the store mirrors every mutation into.
pub trait RecordLog: Write {
    /// Makes previously written bytes durable.
    fn sync(&mut self) -> io::Result<()>;
}

impl RecordLog for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl RecordLog for Vec<u8> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log of a store opened for inspection. Every write is refused, so a
/// record attempt fails before the indices change.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnlyLog;

impl Write for ReadOnlyLog {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "store was opened read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RecordLog for ReadOnlyLog {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Exclusive lock file held next to the log for as long as the store is open.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(store_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = store_path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path: lock_path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::Locked {
                path: store_path.display().to_string(),
                lock: lock_path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub identities: usize,
    pub strict_hashes: usize,
    pub buckets: usize,
    pub skipped_fields: usize,
    pub skipped_lines: usize,
}

impl StoreStats {
    /// Hash count as reported in progress messages: strict hashes plus buckets.
    pub fn hashes(&self) -> usize {
        self.strict_hashes + self.buckets
    }
}

/// Persistent record of every post ever processed.
///
/// The log is the source of truth. The three indices are rebuilt from it on
/// load and every mutation is appended (and synced) before the indices change.
/// The store assumes it is the only writer; [`DuplicateStore::open`] enforces
/// that with a [`StoreLock`].
#[derive(Debug)]
pub struct DuplicateStore<L: RecordLog = File> {
    identities: HashSet<PostId>,
    strict: HashSet<StrictHash>,
    buckets: HashMap<FuzzyHash, Vec<StrictHash>>,
    log: L,
    path: Option<PathBuf>,
    skipped_fields: usize,
    skipped_lines: usize,
    _lock: Option<StoreLock>,
}

impl DuplicateStore<File> {
    /// Opens (creating if needed) the log at `path`, locks it and loads it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let lock = StoreLock::acquire(path)?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut store = Self::load(BufReader::new(&file), file.try_clone()?)?;
        store.path = Some(path.to_path_buf());
        store._lock = Some(lock);
        if !ends_with_newline(&file)? {
            // keep the next record off a truncated last line
            store.append("\n")?;
        }

        let stats = store.stats();
        info!(
            "Loaded {} post IDs and {} image hashes from {}",
            stats.identities,
            stats.hashes(),
            path.display()
        );
        Ok(store)
    }
}

impl DuplicateStore<ReadOnlyLog> {
    /// Loads the log at `path` without locking, creating or writing it.
    /// A missing log reads as an empty store.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut store = match File::open(path) {
            Ok(file) => Self::load(BufReader::new(file), ReadOnlyLog)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist yet", path.display());
                Self::load(io::empty(), ReadOnlyLog)?
            }
            Err(e) => return Err(e.into()),
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }
}

fn ends_with_newline(mut file: &File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

impl<L: RecordLog> DuplicateStore<L> {
    /// Rebuilds the indices from `reader` and appends future records to `log`.
    ///
    /// Lines that are not valid UTF-8 or carry nothing recognizable are skipped.
    pub fn load<R: BufRead>(reader: R, log: L) -> Result<Self, StoreError> {
        let mut store = Self {
            identities: HashSet::new(),
            strict: HashSet::new(),
            buckets: HashMap::new(),
            log,
            path: None,
            skipped_fields: 0,
            skipped_lines: 0,
            _lock: None,
        };

        for (line_no, raw) in reader.split(b'\n').enumerate() {
            let raw = raw?;
            let Ok(line) = String::from_utf8(raw) else {
                debug!("Skipping non UTF-8 line {} in store", line_no + 1);
                store.skipped_lines += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }

            let record = parse_line(&line);
            store.skipped_fields += record.ignored;
            if record.is_empty() {
                debug!("Skipping unrecognized line {} in store", line_no + 1);
                store.skipped_lines += 1;
                continue;
            }

            if let Some(id) = record.identity {
                store.identities.insert(id);
            }
            store.strict.extend(record.strict.iter().copied());
            for fuzzy in &record.fuzzy {
                store
                    .buckets
                    .entry(*fuzzy)
                    .or_default()
                    .extend(record.strict.iter().copied());
            }
        }

        Ok(store)
    }

    /// Modification time of the backing log, if known.
    pub fn last_modified(&self) -> Option<SystemTime> {
        let path = self.path.as_ref()?;
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    pub fn contains_identity(&self, id: &PostId) -> bool {
        self.identities.contains(id)
    }

    pub fn contains_strict_hash(&self, hash: &StrictHash) -> bool {
        self.strict.contains(hash)
    }

    /// Strict hashes filed under `fuzzy`, in insertion order.
    pub fn bucket_for(&self, fuzzy: &FuzzyHash) -> &[StrictHash] {
        self.buckets.get(fuzzy).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Marks `id` as processed without any hashes.
    pub fn record_identity_only(&mut self, id: &PostId) -> Result<(), StoreError> {
        if self.contains_identity(id) {
            debug!("{} is already recorded", id);
            return Ok(());
        }
        self.append(&format_record(id, None))?;
        self.identities.insert(id.clone());
        Ok(())
    }

    /// Records a post whose image was judged unique.
    pub fn record_unique(
        &mut self,
        id: &PostId,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
    ) -> Result<(), StoreError> {
        self.record_hashed(id, strict, fuzzy)
    }

    /// Records a near-duplicate. Its own hash is indexed so that later
    /// near-duplicates of it are caught too.
    pub fn record_fuzzy_duplicate(
        &mut self,
        id: &PostId,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
    ) -> Result<(), StoreError> {
        self.record_hashed(id, strict, fuzzy)
    }

    fn record_hashed(
        &mut self,
        id: &PostId,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
    ) -> Result<(), StoreError> {
        if self.contains_identity(id) {
            debug!("{} is already recorded", id);
            return Ok(());
        }
        self.append(&format_record(id, Some((strict, fuzzy))))?;
        self.identities.insert(id.clone());
        self.strict.insert(*strict);
        self.buckets.entry(*fuzzy).or_default().push(*strict);
        Ok(())
    }

    fn append(&mut self, line: &str) -> Result<(), StoreError> {
        self.log.write_all(line.as_bytes())?;
        self.log.flush()?;
        self.log.sync()?;
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            identities: self.identities.len(),
            strict_hashes: self.strict.len(),
            buckets: self.buckets.len(),
            skipped_fields: self.skipped_fields,
            skipped_lines: self.skipped_lines,
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
