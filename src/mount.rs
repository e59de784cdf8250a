//! Read-only access to a feature database on a file system.
//!
//! # Layout
//! ```text
//! <mount>/<group>/<tier>/ids/<collection>                     one identity per line
//! <mount>/<group>/<tier>/gates/<family>/<gate>/<collection>   rollout record
//! <mount>/gates/<family>/<gate>                               gate definition (salt)
//! ```
//!
//! Records are `key<whitespace>value` lines (`salt`, `volume`, `open`); a
//! bare decimal line is read as the volume. Directory listings are sorted by
//! name and skip entries starting with `.`, which writers use for temporary
//! files. A directory that does not exist lists as empty.
//!
//! The database is produced by a separate writer; nothing here mutates it.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::GateRecord;

/// Mount-root directory holding gate definitions; never a group.
pub const DEFINITIONS_DIR: &str = "gates";

const IDS_DIR: &str = "ids";
const GATES_DIR: &str = "gates";

const WAIT_MIN_DELAY: Duration = Duration::from_millis(100);
const WAIT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Root directory of a feature database.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MountPoint {
    path: PathBuf,
}

impl MountPoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves symlinks so a load reads from a single, stable directory tree.
    pub fn resolve(&self) -> Result<MountPoint> {
        fs::canonicalize(&self.path)
            .map(MountPoint::new)
            .map_err(|e| Error::io("resolve", &self.path, e))
    }

    /// Groups, sorted by name.
    pub fn groups(&self) -> Result<Vec<String>> {
        let mut groups = list_dir(&self.path)?;
        groups.retain(|name| name != DEFINITIONS_DIR);
        Ok(groups)
    }

    /// Tiers of `group`, sorted by name.
    pub fn tiers(&self, group: &str) -> Result<Vec<String>> {
        list_dir(&self.path.join(group))
    }

    pub fn tier<'a>(&'a self, group: &'a str, name: &'a str) -> Tier<'a> {
        Tier {
            mount: self,
            group,
            name,
        }
    }

    pub fn definition_path(&self, family: &str, gate: &str) -> PathBuf {
        self.path.join(DEFINITIONS_DIR).join(family).join(gate)
    }

    /// Salt from the gate definition, if one exists.
    pub fn read_salt(&self, family: &str, gate: &str) -> Result<Option<String>> {
        let path = self.definition_path(family, gate);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let salt = content.trim();
                Ok((!salt.is_empty()).then(|| salt.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("read", &path, e)),
        }
    }

    /// Blocks until the mount point exists or `cancel` fires.
    ///
    /// Polls with a linearly increasing delay, capped at one second.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let mut delay = WAIT_MIN_DELAY;
        let mut announced = false;

        loop {
            match tokio::fs::symlink_metadata(&self.path).await {
                Ok(_) => {
                    if announced {
                        info!("Feature database {} now exists", self.path.display());
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io("stat", &self.path, e)),
            }

            if !announced {
                info!(
                    "Waiting for feature database {} to be created",
                    self.path.display()
                );
                announced = true;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            delay = (delay + WAIT_MIN_DELAY).min(WAIT_MAX_DELAY);
        }
    }
}

/// A tier directory, `<mount>/<group>/<name>`.
#[derive(Clone, Copy, Debug)]
pub struct Tier<'a> {
    mount: &'a MountPoint,
    group: &'a str,
    name: &'a str,
}

impl<'a> Tier<'a> {
    pub fn group(&self) -> &'a str {
        self.group
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn path(&self) -> PathBuf {
        self.mount.path.join(self.group).join(self.name)
    }

    /// Collections of the tier, sorted by name.
    pub fn collections(&self) -> Result<Vec<String>> {
        list_dir(&self.path().join(IDS_DIR))
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.path().join(IDS_DIR).join(collection)
    }

    /// Gate families with records in this tier, sorted by name.
    pub fn families(&self) -> Result<Vec<String>> {
        list_dir(&self.path().join(GATES_DIR))
    }

    /// Gates of `family` with records in this tier, sorted by name.
    pub fn gates(&self, family: &str) -> Result<Vec<String>> {
        list_dir(&self.path().join(GATES_DIR).join(family))
    }

    /// Collections `gate` has a record for, sorted by name.
    pub fn gate_collections(&self, family: &str, gate: &str) -> Result<Vec<String>> {
        list_dir(&self.path().join(GATES_DIR).join(family).join(gate))
    }

    pub fn record_path(&self, family: &str, gate: &str, collection: &str) -> PathBuf {
        self.path()
            .join(GATES_DIR)
            .join(family)
            .join(gate)
            .join(collection)
    }

    pub fn read_record(&self, family: &str, gate: &str, collection: &str) -> Result<GateRecord> {
        let path = self.record_path(family, gate, collection);
        let content = fs::read(&path).map_err(|e| Error::io("read", &path, e))?;
        parse_record(&path, &content)
    }
}

/// Lists the entries of `path`, sorted, skipping hidden names.
fn list_dir(path: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("read_dir", path, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("read_dir", path, e))?;
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => names.push(name),
            Err(raw) => warn!(
                "Skipping non UTF-8 entry {:?} in {}",
                raw,
                path.display()
            ),
        }
    }

    names.sort_unstable();
    Ok(names)
}

/// Parses a rollout record.
pub fn parse_record(path: &Path, content: &[u8]) -> Result<GateRecord> {
    let text =
        std::str::from_utf8(content).map_err(|_| Error::malformed(path, "record is not UTF-8"))?;

    let mut salt = None;
    let mut volume = None;
    let mut open = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = match line.find(char::is_whitespace) {
            Some(i) => (&line[..i], line[i..].trim()),
            None => (line, ""),
        };

        match key {
            // An empty salt falls back to the gate definition, as if absent.
            "salt" => salt = (!value.is_empty()).then(|| value.to_string()),
            "volume" => volume = Some(parse_volume(path, value)?),
            "open" => open = parse_flag(path, value)?,
            bare if value.is_empty() && bare.parse::<f64>().is_ok() => {
                volume = Some(parse_volume(path, bare)?)
            }
            _ => {}
        }
    }

    let volume = volume.ok_or_else(|| Error::malformed(path, "record has no volume"))?;
    Ok(GateRecord { salt, volume, open })
}

fn parse_volume(path: &Path, value: &str) -> Result<f64> {
    let volume: f64 = value
        .parse()
        .map_err(|_| Error::malformed(path, format!("invalid volume {:?}", value)))?;

    if !(0.0..=1.0).contains(&volume) {
        return Err(Error::malformed(
            path,
            format!("volume {} outside [0, 1]", volume),
        ));
    }
    Ok(volume)
}

// Same spellings the writer tools accept.
fn parse_flag(path: &Path, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::malformed(
            path,
            format!("invalid open flag {:?}", value),
        )),
    }
}
