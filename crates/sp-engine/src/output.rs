//! The persisted shape artifact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sp_core::{Error, Result};
use sp_hist::Histogram;

use crate::systematic::ShapeKey;

/// Format tag written into every shape file.
pub const SHAPE_FILE_FORMAT: &str = "shapeprod/shapes-v1";

/// All shapes of one run, keyed by the string form of their [`ShapeKey`].
///
/// Keys are kept sorted, so the serialized file depends only on its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeFile {
    format: String,
    shapes: BTreeMap<String, Histogram>,
}

impl Default for ShapeFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeFile {
    /// Empty file.
    pub fn new() -> Self {
        Self { format: SHAPE_FILE_FORMAT.to_string(), shapes: BTreeMap::new() }
    }

    /// Store a shape. A key can be written once.
    pub fn insert(&mut self, key: &ShapeKey, histogram: Histogram) -> Result<()> {
        let key = key.to_string();
        if self.shapes.contains_key(&key) {
            return Err(Error::ConflictingRequest(format!("shape '{}' written twice", key)));
        }
        self.shapes.insert(key, histogram);
        Ok(())
    }

    /// Shape by key string.
    pub fn get(&self, key: &str) -> Option<&Histogram> {
        self.shapes.get(key)
    }

    /// Number of shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.shapes.keys().map(String::as_str)
    }

    /// Shapes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Histogram)> {
        self.shapes.iter().map(|(k, h)| (k.as_str(), h))
    }

    /// Write to `path` via a sibling temp file and rename.
    pub fn write_atomic(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp{}", std::process::id()));
        let tmp = std::path::PathBuf::from(tmp);

        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            std::fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a file written by [`ShapeFile::write_atomic`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let file: ShapeFile = serde_json::from_slice(&std::fs::read(path)?)?;
        if file.format != SHAPE_FILE_FORMAT {
            return Err(Error::Configuration(format!(
                "unsupported shape file format '{}' (expected '{}')",
                file.format, SHAPE_FILE_FORMAT
            )));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(process: &str) -> ShapeKey {
        ShapeKey {
            channel: "tt".into(),
            category: "tt_inclusive".into(),
            process: process.into(),
            analysis: "smhtt".into(),
            era: "Run2018".into(),
            variable: "m_vis".into(),
            mass: "125".into(),
            shift: "nominal".into(),
        }
    }

    #[test]
    fn insert_once_and_sorted_keys() {
        let h = Histogram::zeros("h", &[0.0, 1.0]).unwrap();
        let mut file = ShapeFile::new();
        file.insert(&key("ZTT"), h.clone()).unwrap();
        file.insert(&key("TTT"), h.clone()).unwrap();
        assert!(file.insert(&key("ZTT"), h).is_err());

        let keys: Vec<&str> = file.keys().collect();
        assert_eq!(keys[0], "tt#tt_inclusive#TTT#smhtt#Run2018#m_vis#125#nominal");
        assert_eq!(file.len(), 2);
    }

    #[test]
    fn write_and_read_back() {
        let nanos =
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("sp_engine_output_{}", nanos));
        let path = dir.join("nested").join("shapes.json");

        let mut file = ShapeFile::new();
        file.insert(&key("ZTT"), Histogram::from_contents("h", &[0.0, 1.0], vec![2.0], None).unwrap())
            .unwrap();
        file.write_atomic(&path).unwrap();

        let back = ShapeFile::read(&path).unwrap();
        assert_eq!(back, file);
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
