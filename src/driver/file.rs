//! Filesystem Driver
//!
//! One file per entry under the configured directory. The file name is the
//! SHA-256 of the id, fanned out by its first two hex digits:
//!
//! ```text
//! <path>/3f/3fa1...e9.cache
//! ```
//!
//! Each file starts with a three-line text header followed by the payload:
//!
//! ```text
//! MCACHE1
//! <created_at>
//! <expires_at>
//! <payload bytes>
//! ```
//!
//! The header can be read on its own, so `has` and `get_metadata` never load
//! the payload. Writes go to a temp file in the target directory and are
//! renamed over the target, so readers see either the old or the new entry.
//! Files that do not start with a valid header are treated as foreign and
//! are never removed by a sweep.
//!
//! A sweep also reaps the driver's own leftovers once they are older than
//! the orphan grace period: temp files (`.mcache-*.tmp`) of writers that died
//! before renaming, and tombstones (`.*.stale`) of removals that died midway.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, info, warn};

use super::entry::{Clock, Metadata, SystemClock};
use super::Driver;
use crate::config::FileConfig;
use crate::error::{CacheError, Result};

// == Constants ==
/// First header line of every entry file
const MAGIC: &[u8] = b"MCACHE1";

/// Extension of entry files; nothing else is considered by a sweep
const EXTENSION: &str = "cache";

/// Upper bound on a header line, keeps foreign files from being slurped
const MAX_HEADER_LINE: u64 = 32;

/// Name affixes of in-flight writes
const TEMP_PREFIX: &str = ".mcache-";
const TEMP_SUFFIX: &str = ".tmp";

/// Name suffix of entries taken out of view for removal
const TOMBSTONE_SUFFIX: &str = ".stale";

/// Age after which a temp file or tombstone is assumed abandoned
pub const ORPHAN_GRACE: Duration = Duration::from_secs(60 * 60);

/// Distinguishes tombstones created by concurrent removals in this process
static TOMBSTONE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Files found below the base directory by a sweep
#[derive(Debug, Default)]
struct Scan {
    entries: Vec<PathBuf>,
    orphans: Vec<PathBuf>,
}

// == File Driver ==
/// Cache driver storing entries as files on local disk.
#[derive(Debug, Clone)]
pub struct FileDriver {
    config: FileConfig,
    clock: Arc<dyn Clock>,
    orphan_grace: Duration,
}

impl FileDriver {
    // == Constructor ==
    /// Creates a driver over `config.path`. The directory is created lazily
    /// by the first save.
    pub fn new(config: FileConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            orphan_grace: ORPHAN_GRACE,
        }
    }

    /// Replaces the time source, mainly to simulate expiry in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How old an abandoned temp file or tombstone must be before a sweep
    /// deletes it. Measured against file modification times, not the clock.
    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    /// Base directory of the cache.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // == Key Mapping ==
    /// Location of the file holding `id`.
    pub fn entry_path(&self, id: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(id.as_bytes()));
        self.config
            .path
            .join(&hash[..2])
            .join(format!("{}.{}", hash, EXTENSION))
    }

    // == Header Access ==
    /// Opens an entry file and parses its header, leaving the reader at the
    /// first payload byte. `None` when the file does not exist.
    fn open_entry(path: &Path) -> Result<Option<(Metadata, BufReader<File>)>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let meta = read_header(&mut reader, path)?;
        Ok(Some((meta, reader)))
    }

    /// Opens `path` if it holds a live entry, pruning it when it is expired.
    fn open_live(&self, path: &Path) -> Result<Option<(Metadata, BufReader<File>)>> {
        let Some((meta, reader)) = Self::open_entry(path)? else {
            return Ok(None);
        };

        if !meta.is_expired(self.clock.now()) {
            return Ok(Some((meta, reader)));
        }

        drop(reader);
        debug!(path = %path.display(), expire = meta.expire, "Entry expired");
        if self.config.prune_on_read {
            if let Err(e) = self.remove_if_expired(path) {
                debug!(path = %path.display(), error = %e, "Failed to prune expired entry");
            }
        }
        Ok(None)
    }

    // == Race-Safe Removal ==
    /// Removes `path` only if it still holds an expired entry.
    ///
    /// The file is first renamed to a private tombstone, which takes it out of
    /// view atomically. If the tombstone turns out to be live (a writer
    /// replaced the entry after our expiry check), it is linked back into
    /// place unless an even newer write has landed there meanwhile, or a
    /// concurrent `delete` has claimed the tombstone.
    ///
    /// Returns true when an expired entry was removed.
    fn remove_if_expired(&self, path: &Path) -> Result<bool> {
        match self.take_to_tombstone(path)? {
            Some(tombstone) => self.settle_tombstone(path, &tombstone),
            None => Ok(false),
        }
    }

    /// Renames `path` to a fresh tombstone; `None` when nothing is there.
    fn take_to_tombstone(&self, path: &Path) -> Result<Option<PathBuf>> {
        let tombstone = tombstone_path(path);
        match fs::rename(path, &tombstone) {
            Ok(()) => Ok(Some(tombstone)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the tombstone if it is expired, restores it otherwise.
    fn settle_tombstone(&self, path: &Path, tombstone: &Path) -> Result<bool> {
        let now = self.clock.now();
        let expired = match Self::open_entry(tombstone) {
            Ok(Some((meta, _))) => meta.is_expired(now),
            Ok(None) => return Ok(false),
            Err(_) => false,
        };

        if expired {
            return match fs::remove_file(tombstone) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        debug!(path = %path.display(), "Entry replaced during removal, restoring");
        match fs::hard_link(tombstone, path) {
            Ok(()) => {}
            // A newer write owns the name.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            // `remove` deleted the tombstone: the entry stays deleted.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(_) if !path.exists() => match fs::rename(tombstone, path) {
                Ok(()) => return Ok(false),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        }
        remove_if_present(tombstone)?;
        Ok(false)
    }

    /// Deletes every tombstone of the entry at `path`, whoever made it.
    fn purge_tombstones(path: &Path) -> Result<()> {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(());
        };
        let prefix = format!(".{}.", name.to_string_lossy());
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name.ends_with(TOMBSTONE_SUFFIX) {
                remove_if_present(&entry.path())?;
            }
        }
        Ok(())
    }

    // == Sweep Helpers ==
    /// Inspects one candidate file; true when it was removed as expired.
    fn sweep_file(&self, path: &Path, now: i64) -> Result<bool> {
        let meta = match Self::open_entry(path)? {
            Some((meta, _)) => meta,
            None => return Ok(false),
        };
        if !meta.is_expired(now) {
            return Ok(false);
        }
        self.remove_if_expired(path)
    }

    /// Collects entry files and orphan candidates below the base directory.
    fn scan(&self) -> Result<Scan> {
        let mut scan = Scan::default();
        let mut pending = vec![self.config.path.clone()];
        let mut at_root = true;

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    at_root = false;
                    continue;
                }
                Err(e) if at_root => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            at_root = false;

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                let path = entry.path();
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(kind) if kind.is_file() => {
                        if is_orphan_name(&entry.file_name().to_string_lossy()) {
                            scan.orphans.push(path);
                        } else if path.extension().is_some_and(|ext| ext == EXTENSION) {
                            scan.entries.push(path);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(scan)
    }

    /// Deletes orphans older than the grace period; returns how many went.
    fn reap_orphans(&self, orphans: &[PathBuf]) -> usize {
        let now = SystemTime::now();
        let mut reaped = 0;
        for path in orphans {
            let modified = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot age orphan file");
                    continue;
                }
            };
            // A modification time in the future counts as fresh.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < self.orphan_grace {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => reaped += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to reap orphan file"),
            }
        }
        reaped
    }
}

impl Driver for FileDriver {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    fn lifetime(&self) -> u64 {
        self.config.lifetime
    }

    fn read_payload(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(id);
        let Some((_, mut reader)) = self.open_live(&path)? else {
            return Ok(None);
        };
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        Ok(Some(payload))
    }

    fn write_payload(&self, id: &str, payload: &[u8]) -> Result<()> {
        let path = self.entry_path(id);
        let dir = path
            .parent()
            .ok_or_else(|| CacheError::Io(io::Error::new(ErrorKind::InvalidInput, "entry path has no parent")))?;
        fs::create_dir_all(dir)?;

        let meta = Metadata::new(self.clock.now(), self.config.lifetime);
        let mut tmp = Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?;
        {
            let file = tmp.as_file_mut();
            file.write_all(MAGIC)?;
            write!(file, "\n{}\n{}\n", meta.time, meta.expire)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        let path = self.entry_path(id);
        Ok(self.open_live(&path)?.map(|(meta, _)| meta))
    }

    // A pruner may hold the entry as a tombstone it is about to restore.
    // Removing the name, then every tombstone, then the name again leaves
    // the pruner nothing to restore, or removes what it restored.
    fn remove(&self, id: &str) -> Result<()> {
        let path = self.entry_path(id);
        remove_if_present(&path)?;
        Self::purge_tombstones(&path)?;
        remove_if_present(&path)
    }

    fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        let mut skipped = 0;
        let scan = self.scan()?;

        for path in &scan.entries {
            match self.sweep_file(path, now) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(CacheError::CorruptEntry(reason)) => {
                    debug!(path = %path.display(), reason = %reason, "Leaving foreign file untouched");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to sweep entry");
                    skipped += 1;
                }
            }
        }

        let reaped = self.reap_orphans(&scan.orphans);

        if removed > 0 || reaped > 0 {
            info!(path = %self.config.path.display(), removed, reaped, skipped, "Swept expired entries");
        } else {
            debug!(path = %self.config.path.display(), skipped, "No expired entries found");
        }
        Ok(removed)
    }
}

// == Header Parsing ==
fn read_header(reader: &mut impl BufRead, path: &Path) -> Result<Metadata> {
    let magic = read_header_line(reader, path)?;
    if magic != MAGIC {
        return Err(corrupt(path, "missing header"));
    }
    let time = parse_timestamp(&read_header_line(reader, path)?, path)?;
    let expire = parse_timestamp(&read_header_line(reader, path)?, path)?;
    Ok(Metadata { time, expire })
}

fn read_header_line(reader: &mut impl BufRead, path: &Path) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    Read::take(&mut *reader, MAX_HEADER_LINE).read_until(b'\n', &mut line)?;
    if line.pop() != Some(b'\n') {
        return Err(corrupt(path, "truncated header"));
    }
    Ok(line)
}

fn parse_timestamp(raw: &[u8], path: &Path) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| corrupt(path, "bad timestamp"))
}

fn corrupt(path: &Path, reason: &str) -> CacheError {
    CacheError::CorruptEntry(format!("{}: {}", path.display(), reason))
}

fn tombstone_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TOMBSTONE_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}{}", name, std::process::id(), seq, TOMBSTONE_SUFFIX))
}

fn is_orphan_name(name: &str) -> bool {
    (name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
        || (name.starts_with('.') && name.ends_with(TOMBSTONE_SUFFIX))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
