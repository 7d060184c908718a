//! On-disk format for generational state files.
//!
//! File layout (`<prefix><generation>.st`):
//!
//! | Field    | Size     | Notes                                   |
//! |----------|----------|-----------------------------------------|
//! | magic    | 4        | `MSST`                                  |
//! | version  | 4 (LE)   | [`FORMAT_VERSION`]                      |
//! | length   | 8 (LE)   | length of the JSON envelope             |
//! | envelope | length   | generation, reason, timestamp, payload  |
//! | checksum | 32       | SHA-256 of the envelope bytes           |
//!
//! Files are written to a temporary name, synced, renamed into place and the
//! directory is synced. A failure up to and including the rename leaves the
//! final file absent and is reported as clean. A failure to sync the
//! directory after the rename is dirty: the new file may or may not survive a
//! crash.

use crate::gateway::manifest::Generation;
use crate::utils::errors::{MetaStateError, Result, WriteStateError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Magic bytes for state files.
const STATE_MAGIC: &[u8; 4] = b"MSST";
/// State file format version.
pub const FORMAT_VERSION: u32 = 1;

pub const STATE_FILE_EXTENSION: &str = ".st";
const TEMP_SUFFIX: &str = ".tmp";

const HEADER_LEN: usize = 4 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope<P> {
    generation: Generation,
    reason: String,
    written_at: DateTime<Utc>,
    payload: P,
}

/// A state file read back from disk.
#[derive(Debug, Clone)]
pub struct LoadedState<T> {
    pub generation: Generation,
    pub reason: String,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

/// Reads and writes one family of state files, identified by a file prefix.
#[derive(Debug, Clone, Copy)]
pub struct StateFormat {
    prefix: &'static str,
}

impl StateFormat {
    pub const fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn file_name(&self, generation: Generation) -> String {
        format!("{}{}{}", self.prefix, generation, STATE_FILE_EXTENSION)
    }

    /// Generation encoded in `file_name`, if it belongs to this format
    pub fn parse_generation(&self, file_name: &str) -> Option<Generation> {
        file_name
            .strip_prefix(self.prefix)
            .and_then(|s| s.strip_suffix(STATE_FILE_EXTENSION))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
    }

    /// All generations present in `dir`, ascending. A missing directory holds none.
    pub fn generations(&self, dir: &Path) -> io::Result<Vec<Generation>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut generations = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(generation) = self.parse_generation(&name.to_string_lossy()) {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    /// Write `payload` as the next generation in `dir`.
    pub fn write<T: Serialize>(
        &self,
        dir: &Path,
        reason: &str,
        payload: &T,
    ) -> std::result::Result<Generation, WriteStateError> {
        fs::create_dir_all(dir).map_err(|e| {
            WriteStateError::clean(format!("failed to create state directory {}", dir.display()), e)
        })?;

        let generation = self
            .generations(dir)
            .map_err(|e| {
                let message = format!("failed to list state files in {}", dir.display());
                WriteStateError::clean(message, e)
            })?
            .last()
            .map_or(1, |max| max + 1);

        let envelope = StateEnvelope {
            generation,
            reason: reason.to_string(),
            written_at: Utc::now(),
            payload,
        };
        let data = serde_json::to_vec(&envelope).map_err(|e| {
            WriteStateError::clean(
                format!("failed to serialize {}", self.file_name(generation)),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;

        let file_name = self.file_name(generation);
        let path = dir.join(&file_name);
        let temp_path = dir.join(format!("{}{}", file_name, TEMP_SUFFIX));

        if let Err(e) = write_state_file(&temp_path, &data) {
            let _ = fs::remove_file(&temp_path);
            return Err(WriteStateError::clean(
                format!("failed to write {}", temp_path.display()),
                e,
            ));
        }

        // Atomic rename
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(WriteStateError::clean(
                format!("failed to move {} into place", file_name),
                e,
            ));
        }

        sync_dir(dir).map_err(|e| {
            let message = format!("failed to sync {} after writing {}", dir.display(), file_name);
            WriteStateError::dirty(message, e)
        })?;

        debug!(file = %path.display(), reason, "Wrote state file");
        Ok(generation)
    }

    /// Load a specific generation, verifying header and checksum.
    pub fn load_generation<T: DeserializeOwned>(
        &self,
        dir: &Path,
        generation: Generation,
    ) -> Result<LoadedState<T>> {
        let path = dir.join(self.file_name(generation));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MetaStateError::MissingState(format!(
                    "{} [generation: {}] not found in {}",
                    self.prefix.trim_end_matches('-'),
                    generation,
                    dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let corrupted = |reason: String| MetaStateError::CorruptedState {
            path: path.clone(),
            reason,
        };

        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(corrupted(format!("file too short ({} bytes)", bytes.len())));
        }
        if &bytes[0..4] != STATE_MAGIC {
            return Err(corrupted("invalid magic".to_string()));
        }

        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(version_bytes);
        if version != FORMAT_VERSION {
            return Err(corrupted(format!("unsupported format version {}", version)));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[8..HEADER_LEN]);
        let header_len = u64::from_le_bytes(len_bytes);
        let len = usize::try_from(header_len)
            .ok()
            .filter(|len| len.checked_add(HEADER_LEN + CHECKSUM_LEN) == Some(bytes.len()))
            .ok_or_else(|| {
                corrupted(format!(
                    "length mismatch: header says {} bytes, file holds {}",
                    header_len,
                    bytes.len() - (HEADER_LEN + CHECKSUM_LEN)
                ))
            })?;

        let data = &bytes[HEADER_LEN..HEADER_LEN + len];
        let checksum = &bytes[HEADER_LEN + len..];
        if Sha256::digest(data).as_slice() != checksum {
            return Err(corrupted("checksum mismatch".to_string()));
        }

        let envelope: StateEnvelope<T> = serde_json::from_slice(data)
            .map_err(|e| corrupted(format!("invalid envelope: {}", e)))?;
        if envelope.generation != generation {
            return Err(corrupted(format!(
                "file name says generation {} but content says {}",
                generation, envelope.generation
            )));
        }

        Ok(LoadedState {
            generation: envelope.generation,
            reason: envelope.reason,
            written_at: envelope.written_at,
            payload: envelope.payload,
        })
    }

    /// Load the newest readable generation. Unreadable newer generations are
    /// skipped with a warning; if files exist but none can be read, the
    /// newest failure is returned.
    pub fn load_latest<T: DeserializeOwned>(&self, dir: &Path) -> Result<Option<LoadedState<T>>> {
        let generations = self.generations(dir)?;
        let mut first_failure = None;

        for generation in generations.into_iter().rev() {
            match self.load_generation(dir, generation) {
                Ok(state) => return Ok(Some(state)),
                Err(e) => {
                    warn!(
                        generation,
                        dir = %dir.display(),
                        error = %e,
                        "Failed to load {} state file, trying older one",
                        self.prefix.trim_end_matches('-')
                    );
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Remove every generation other than `keep`, plus leftover temp files.
    /// Failures are logged and otherwise ignored.
    pub fn cleanup_old_files(&self, dir: &Path, keep: Generation) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list state files for cleanup");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let stale = match self.parse_generation(&name) {
                Some(generation) => generation != keep,
                None => name.starts_with(self.prefix) && name.ends_with(TEMP_SUFFIX),
            };
            if !stale {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = %entry.path().display(), "Removed stale state file"),
                Err(e) => warn!(
                    file = %entry.path().display(),
                    error = %e,
                    "Failed to remove stale state file"
                ),
            }
        }
    }
}

fn write_state_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(STATE_MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(Sha256::digest(data).as_slice())?;
    writer.flush()?;

    // Sync to disk
    writer.get_ref().sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    // Directory handles cannot be synced here; the rename is as durable as it gets
    Ok(())
}
