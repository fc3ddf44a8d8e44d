//! Columnar event files.
//!
//! An event file holds one folder per `<channel>_<pipeline>` combination
//! (e.g. `mt_nominal`, `mt_tauEsOneProngUp`); each folder maps column names
//! to equally long arrays of values:
//!
//! ```json
//! { "folders": { "mt_nominal": { "m_vis": [61.2, 88.0], "puweight": [1.0, 0.97] } } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HistError, Result};

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventColumns {
    columns: BTreeMap<String, Vec<f64>>,
}

impl EventColumns {
    /// Build from `(name, values)` pairs, checking that all columns have the same length.
    pub fn from_columns(columns: impl IntoIterator<Item = (String, Vec<f64>)>) -> Result<Self> {
        let events = Self { columns: columns.into_iter().collect() };
        events.validate("<memory>")?;
        Ok(events)
    }

    /// Number of entries (0 for a folder without columns).
    pub fn n_entries(&self) -> usize {
        self.columns.values().next().map(Vec::len).unwrap_or(0)
    }

    /// Column values, if present.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    fn validate(&self, origin: &str) -> Result<()> {
        let n = self.n_entries();
        for (name, values) in &self.columns {
            if values.len() != n {
                return Err(HistError::HistogramFill(format!(
                    "{}: column '{}' has {} entries, expected {}",
                    origin,
                    name,
                    values.len(),
                    n
                )));
            }
        }
        Ok(())
    }
}

/// A columnar event file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFile {
    #[serde(skip)]
    path: PathBuf,
    folders: BTreeMap<String, EventColumns>,
}

impl EventFile {
    /// Read and validate an event file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut file: EventFile = serde_json::from_slice(&bytes)?;
        file.path = path.to_path_buf();
        let origin = path.display().to_string();
        for (folder, columns) in &file.folders {
            columns.validate(&format!("{}:{}", origin, folder))?;
        }
        Ok(file)
    }

    /// Build an in-memory file from folders.
    pub fn from_folders(
        path: impl Into<PathBuf>,
        folders: impl IntoIterator<Item = (String, EventColumns)>,
    ) -> Self {
        Self { path: path.into(), folders: folders.into_iter().collect() }
    }

    /// Path the file was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folder names in sorted order.
    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }

    /// Columns of one folder.
    pub fn folder(&self, name: &str) -> Result<&EventColumns> {
        self.folders.get(name).ok_or_else(|| {
            HistError::MissingSource(format!("folder '{}' in {}", name, self.path.display()))
        })
    }

    /// Write the file as JSON.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }
}
