//! Snapshot persistence for [`SharedState`].
//!
//! A snapshot is a small header (date, worker name, a one-line
//! description of the owner) followed by a `VALUES: ` marker line and
//! the store serialized as JSON. A SHA-1 of the whole file is kept in a
//! sidecar so a torn write is detected on load. Saving rotates up to
//! three numbered backups of the previous snapshot.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::errors::{StateError, StateResult};
use crate::store::{Selector, SharedState};

const VALUES_MARKER: &str = "VALUES: \n";

/// Snapshot file pair for one worker: `<workdir>/<name>.values` plus a
/// `.sha1` digest sidecar.
#[derive(Debug, Clone)]
pub struct Snapshot {
    name: String,
    path: PathBuf,
}

impl Snapshot {
    pub fn new(workdir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = workdir.as_ref().join(format!("{}.values", name));
        Self { name, path }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the digest sidecar.
    pub fn digest_path(&self) -> PathBuf {
        self.path.with_extension("sha1")
    }

    /// Write the store to disk, rotating previous snapshots to `.bak1`
    /// through `.bak3` first. `descriptor` goes on the `SELF:` header
    /// line.
    ///
    /// The store itself is not locked against writers between
    /// serialization and the digest write; the digest covers whatever
    /// was serialized.
    pub fn save(&self, state: &SharedState, descriptor: &str) -> StateResult<()> {
        fs::rename(with_suffix(&self.path, ".bak2"), with_suffix(&self.path, ".bak3")).ok();
        fs::rename(with_suffix(&self.path, ".bak1"), with_suffix(&self.path, ".bak2")).ok();
        fs::rename(&self.path, with_suffix(&self.path, ".bak1")).ok();

        let json = serde_json::to_string(&state.select(&Selector::All))?;
        let body = format!(
            "DATE: {}\nNAME: {}\nSELF: {}\n{}{}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S %z"),
            self.name,
            descriptor,
            VALUES_MARKER,
            json,
        );
        fs::write(&self.path, &body)?;
        fs::write(self.digest_path(), hex_digest(body.as_bytes()))?;
        Ok(())
    }

    /// Load the default snapshot into `state`, replacing its contents.
    pub fn load(&self, state: &SharedState) -> StateResult<()> {
        self.load_from(&self.path, state)
    }

    /// Load a snapshot from an explicit path. The digest sidecar is
    /// looked up next to it; a missing sidecar skips verification.
    pub fn load_from(&self, path: &Path, state: &SharedState) -> StateResult<()> {
        let bytes = fs::read(path).map_err(|_| StateError::snapshot_missing(path))?;

        if let Ok(expected) = fs::read_to_string(path.with_extension("sha1")) {
            if hex_digest(&bytes) != expected {
                return Err(StateError::digest_mismatch(path));
            }
        }

        let text = String::from_utf8_lossy(&bytes);
        let json = values_section(&text)
            .ok_or_else(|| StateError::malformed(path, "missing values section"))?;
        if json.trim().is_empty() {
            return Err(StateError::malformed(path, "empty values section"));
        }

        let values: HashMap<String, Value> = serde_json::from_str(json)
            .map_err(|err| StateError::malformed(path, err.to_string()))?;
        state.replace(values);
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn values_section(text: &str) -> Option<&str> {
    if let Some(rest) = text.strip_prefix(VALUES_MARKER) {
        return Some(rest);
    }
    text.find("\nVALUES: \n")
        .map(|pos| &text[pos + 1 + VALUES_MARKER.len()..])
}

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(40);
    for byte in digest.as_slice() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
