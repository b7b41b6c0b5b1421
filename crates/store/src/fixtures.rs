//! Fixture store: cached tool outputs keyed by case id + input hash.
//!
//! The eval runner that replays these lives outside this repo; the
//! sidecar only offers the read/write primitive. One JSON file per
//! case keeps the store greppable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use forge_domain::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct FixtureFile {
    hash: String,
    output: Value,
}

/// Result of a fixture lookup.
#[derive(Debug, PartialEq)]
pub enum FixtureRead {
    Hit(Value),
    /// No entry, or the stored hash does not match the requested one.
    Miss { stored_hash: Option<String> },
}

pub struct FixtureStore {
    dir: PathBuf,
}

impl FixtureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Ids come from the eval pipeline; flatten anything path-like.
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn write_fixture(&self, id: &str, hash: &str, output: &Value) -> Result<()> {
        let file = FixtureFile {
            hash: hash.to_owned(),
            output: output.clone(),
        };
        let payload = serde_json::to_string_pretty(&file)?;
        std::fs::write(self.path_for(id), payload)?;
        Ok(())
    }

    pub fn read_fixture(&self, id: &str, hash: &str) -> Result<FixtureRead> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(FixtureRead::Miss { stored_hash: None });
        }
        let raw = std::fs::read_to_string(&path)?;
        let file: FixtureFile = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("fixture {}: {e}", path.display())))?;
        if file.hash != hash {
            return Ok(FixtureRead::Miss {
                stored_hash: Some(file.hash),
            });
        }
        Ok(FixtureRead::Hit(file.output))
    }
}

impl FixtureStore {
    /// Visible for tests and the admin surface.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FixtureStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_read_hits() {
        let (_dir, store) = store();
        let out = serde_json::json!({"value": "ok"});
        store.write_fixture("case-1", "abc123", &out).unwrap();
        assert_eq!(
            store.read_fixture("case-1", "abc123").unwrap(),
            FixtureRead::Hit(out)
        );
    }

    #[test]
    fn hash_mismatch_reports_stored_hash() {
        let (_dir, store) = store();
        store
            .write_fixture("case-1", "abc123", &serde_json::json!(1))
            .unwrap();
        match store.read_fixture("case-1", "zzz999").unwrap() {
            FixtureRead::Miss { stored_hash } => {
                assert_eq!(stored_hash.as_deref(), Some("abc123"))
            }
            FixtureRead::Hit(_) => panic!("stale hash must miss"),
        }
    }

    #[test]
    fn absent_entry_misses_without_hash() {
        let (_dir, store) = store();
        assert_eq!(
            store.read_fixture("nope", "h").unwrap(),
            FixtureRead::Miss { stored_hash: None }
        );
    }

    #[test]
    fn rewrite_replaces_hash_and_output() {
        let (_dir, store) = store();
        store
            .write_fixture("case-1", "h1", &serde_json::json!("old"))
            .unwrap();
        store
            .write_fixture("case-1", "h2", &serde_json::json!("new"))
            .unwrap();
        assert_eq!(
            store.read_fixture("case-1", "h2").unwrap(),
            FixtureRead::Hit(serde_json::json!("new"))
        );
    }

    #[test]
    fn ids_with_path_separators_are_flattened() {
        let (dir, store) = store();
        store
            .write_fixture("../escape", "h", &serde_json::json!(0))
            .unwrap();
        // Nothing escaped the fixture dir.
        assert!(dir.path().join("___escape.json").exists());
    }
}
