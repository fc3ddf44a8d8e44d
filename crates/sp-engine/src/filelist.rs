//! Input file lists per estimation, for batch submission and bookkeeping.

use std::collections::BTreeMap;

use sp_core::{Error, Result};
use sp_hist::EventFile;

use crate::process::ProcessMap;

/// `estimation name → file → folders of the channel`.
pub type FileList = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Collect the input files of every leaf process in `processes`, with the
/// folders each file holds for the map's channel.
pub fn build_file_list(processes: &ProcessMap) -> Result<FileList> {
    let prefix = format!("{}_", processes.channel());
    let mut list = FileList::new();
    for process in processes.iter() {
        let Some(estimation) = process.estimation() else {
            continue;
        };
        let files = list.entry(estimation.name().to_string()).or_default();
        for path in estimation.list_source_files()? {
            if !path.is_file() {
                return Err(Error::Configuration(format!(
                    "input file of '{}' not found: {}",
                    estimation.name(),
                    path.display()
                )));
            }
            let file = EventFile::open(&path)
                .map_err(|e| Error::Production(format!("{}: {}", path.display(), e)))?;
            let folders = file.folder_names().filter(|f| f.starts_with(&prefix)).map(str::to_string).collect();
            files.insert(path.display().to_string(), folders);
        }
    }
    tracing::info!(channel = processes.channel(), estimations = list.len(), "built file list");
    Ok(list)
}
