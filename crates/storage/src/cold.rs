//! Cold tier: one file per key
//!
//! Live (and tombstoned) documents each get a file under `docs/`; every
//! collection set gets a file under `sets/`. Filenames are derived from
//! the key by a deterministic, reversible escaping: bytes outside
//! `[A-Za-z0-9_-]` become `%XX`, so distinct keys can never collide.
//!
//! Cold files are written via temp file + rename so a crash mid-write
//! leaves the previous content intact. Durability does not depend on the
//! cold tier — every write reaches the WAL first — but intact files keep
//! rehydration on cache miss trustworthy.

use bri_core::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Escape a key into a filesystem-safe, collision-free file stem.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

/// On-disk key-file storage for documents and set indexes.
#[derive(Debug)]
pub struct ColdTier {
    docs_dir: PathBuf,
    sets_dir: PathBuf,
}

impl ColdTier {
    /// Open (and create if needed) the `docs/` and `sets/` directories.
    pub fn open(docs_dir: PathBuf, sets_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&docs_dir)?;
        fs::create_dir_all(&sets_dir)?;
        Ok(ColdTier { docs_dir, sets_dir })
    }

    /// Read a document value, `None` when the key has no cold file.
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        read_optional(&self.doc_path(key))
    }

    /// Write a document value (temp file + rename).
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        write_atomic(&self.doc_path(key), value.as_bytes())
    }

    /// Remove a document file; missing files are fine.
    pub fn remove(&self, key: &str) -> Result<()> {
        remove_optional(&self.doc_path(key))
    }

    /// Move a document file from one key to another.
    ///
    /// A missing source is not an error — the value may still live only in
    /// the hot tier, in which case the rename is purely logical.
    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<()> {
        let from = self.doc_path(old_key);
        if !from.exists() {
            return Ok(());
        }
        fs::rename(from, self.doc_path(new_key))?;
        Ok(())
    }

    /// Read a set index, `None` when the set has no cold file.
    pub fn read_set(&self, set_key: &str) -> Result<Option<BTreeSet<String>>> {
        let Some(text) = read_optional(&self.set_path(set_key))? else {
            return Ok(None);
        };
        let members: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| Error::corruption(format!("set file for {set_key:?}: {e}")))?;
        Ok(Some(members.into_iter().collect()))
    }

    /// Write a set index as a JSON array of members.
    pub fn write_set(&self, set_key: &str, members: &BTreeSet<String>) -> Result<()> {
        let ordered: Vec<&String> = members.iter().collect();
        let text = serde_json::to_string(&ordered)?;
        write_atomic(&self.set_path(set_key), text.as_bytes())
    }

    /// Remove a set file; missing files are fine.
    pub fn remove_set(&self, set_key: &str) -> Result<()> {
        remove_optional(&self.set_path(set_key))
    }

    fn doc_path(&self, key: &str) -> PathBuf {
        self.docs_dir.join(format!("{}.doc", escape_key(key)))
    }

    fn set_path(&self, set_key: &str) -> PathBuf {
        self.sets_dir.join(format!("{}.set", escape_key(set_key)))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tier(dir: &Path) -> ColdTier {
        ColdTier::open(dir.join("docs"), dir.join("sets")).unwrap()
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("USER_abc"), "USER_abc");
        assert_eq!(escape_key("USER?"), "USER%3F");
        assert_eq!(escape_key("X:USER_a:X"), "X%3AUSER_a%3AX");
        // '%' itself is escaped, so escaping cannot collide
        assert_ne!(escape_key("a%3A"), escape_key("a:"));
    }

    #[test]
    fn test_doc_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = open_tier(dir.path());

        assert_eq!(tier.read("USER_a").unwrap(), None);
        tier.write("USER_a", "{\"x\":1}").unwrap();
        assert_eq!(tier.read("USER_a").unwrap().as_deref(), Some("{\"x\":1}"));

        tier.remove("USER_a").unwrap();
        assert_eq!(tier.read("USER_a").unwrap(), None);
        // Removing again is fine
        tier.remove("USER_a").unwrap();
    }

    #[test]
    fn test_rename() {
        let dir = tempdir().unwrap();
        let tier = open_tier(dir.path());

        tier.write("USER_a", "v").unwrap();
        tier.rename("USER_a", "X:USER_a:X").unwrap();
        assert_eq!(tier.read("USER_a").unwrap(), None);
        assert_eq!(tier.read("X:USER_a:X").unwrap().as_deref(), Some("v"));

        // Renaming a key with no cold file is a no-op
        tier.rename("USER_missing", "X:USER_missing:X").unwrap();
    }

    #[test]
    fn test_set_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = open_tier(dir.path());

        assert_eq!(tier.read_set("USER?").unwrap(), None);

        let members: BTreeSet<String> =
            ["USER_a", "USER_b"].iter().map(|s| s.to_string()).collect();
        tier.write_set("USER?", &members).unwrap();
        assert_eq!(tier.read_set("USER?").unwrap(), Some(members));

        tier.remove_set("USER?").unwrap();
        assert_eq!(tier.read_set("USER?").unwrap(), None);
    }

    #[test]
    fn test_corrupt_set_file_detected() {
        let dir = tempdir().unwrap();
        let tier = open_tier(dir.path());

        tier.write_set("USER?", &BTreeSet::new()).unwrap();
        let path = dir.path().join("sets").join("USER%3F.set");
        std::fs::write(&path, b"not json").unwrap();

        let err = tier.read_set("USER?").unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }
}
