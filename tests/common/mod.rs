//! Fixture helpers that lay out a feature database on disk.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// A feature database rooted in a temporary directory.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `<group>/<tier>/ids/<collection>` with one line per id.
    pub fn collection(&self, group: &str, tier: &str, collection: &str, ids: &[&str]) -> PathBuf {
        let mut content = ids.join("\n");
        if !ids.is_empty() {
            content.push('\n');
        }
        self.write(
            &[group, tier, "ids", collection],
            content.as_bytes(),
        )
    }

    /// Writes a key/value rollout record.
    pub fn record(
        &self,
        group: &str,
        tier: &str,
        family: &str,
        gate: &str,
        collection: &str,
        salt: &str,
        volume: f64,
    ) -> PathBuf {
        let content = format!("salt\t{}\nvolume\t{}\nopen\tfalse\n", salt, volume);
        self.raw_record(group, tier, family, gate, collection, &content)
    }

    /// Writes a rollout record with arbitrary content.
    pub fn raw_record(
        &self,
        group: &str,
        tier: &str,
        family: &str,
        gate: &str,
        collection: &str,
        content: &str,
    ) -> PathBuf {
        self.write(
            &[group, tier, "gates", family, gate, collection],
            content.as_bytes(),
        )
    }

    /// Writes the mount-level definition of a gate.
    pub fn definition(&self, family: &str, gate: &str, salt: &str) -> PathBuf {
        self.write(&["gates", family, gate], format!("{}\n", salt).as_bytes())
    }

    fn write(&self, parts: &[&str], content: &[u8]) -> PathBuf {
        let path = parts.iter().fold(self.path().to_path_buf(), |p, s| p.join(s));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        // Write-then-rename, the way the writer tools publish files.
        let tmp = path.with_file_name(format!(
            ".tmp-{}",
            path.file_name().unwrap().to_string_lossy()
        ));
        fs::write(&tmp, content).unwrap();
        fs::rename(&tmp, &path).unwrap();
        path
    }
}

/// Salt under which `id` falls in `bucket` (1..=100), searched from `start`.
pub fn salt_for_bucket(id: &str, bucket: u64, start: u64) -> String {
    let mut hasher = gatestore::GateHasher::new();
    (start..)
        .map(|n| n.to_string())
        .find(|salt| hasher.hash(id, salt) % 100 + 1 == bucket)
        .unwrap()
}
