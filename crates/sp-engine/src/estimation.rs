//! The estimation seam and the column-file reference engine.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sp_core::{Error, Result};
use sp_hist::{
    CompiledExpr, EventFile, FlowPolicy, HistError, Histogram, HistogramSpec, NegativeWeightPolicy,
    fill_histogram,
};

use crate::category::{Category, Era};
use crate::cutstring::{Cuts, Weight, Weights};
use crate::variation::Shift;

/// Input pipeline, selection and weights for one histogram.
///
/// Estimations build the nominal settings and let the [`Shift`] rewrite them.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSettings {
    /// Pipeline suffix of the input folder (`nominal`, `tauEsOneProngUp`, ...).
    pub pipeline: String,
    /// Selection.
    pub cuts: Cuts,
    /// Event weights.
    pub weights: Weights,
}

impl HistogramSettings {
    /// Input folder: `{channel}_{pipeline}`.
    pub fn folder(&self, channel: &str) -> String {
        format!("{}_{}", channel, self.pipeline)
    }
}

/// Produces the histogram of one process in one category at one shift.
pub trait Estimation: Send + Sync + fmt::Debug {
    /// Name used in logs and file lists.
    fn name(&self) -> &str;

    /// Compute the histogram on the category's variable binning.
    fn materialize(&self, category: &Category, shift: &Shift) -> Result<Histogram>;

    /// Input files this estimation reads.
    fn list_source_files(&self) -> Result<Vec<PathBuf>>;

    /// Identity of what the estimation computes. Two estimations with equal
    /// fingerprints must produce equal histograms.
    fn fingerprint(&self) -> String {
        let files = self.list_source_files().unwrap_or_default();
        let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        format!("{}[{}]", self.name(), files.join(","))
    }
}

/// Opened event files shared by all estimations of a run.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: Mutex<HashMap<PathBuf, Arc<EventFile>>>,
}

impl SourceCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` once; later calls share the parsed file.
    pub fn open(&self, path: &Path) -> Result<Arc<EventFile>> {
        if let Some(file) = self.lock()?.get(path) {
            return Ok(Arc::clone(file));
        }
        // Parse outside the lock; a concurrent open of the same file keeps the first insert.
        let file = Arc::new(EventFile::open(path).map_err(|e| backend_error(path.display(), e))?);
        tracing::debug!(path = %path.display(), "opened event file");
        let mut files = self.lock()?;
        Ok(Arc::clone(files.entry(path.to_path_buf()).or_insert(file)))
    }

    /// Number of opened files.
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// True if nothing has been opened.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<EventFile>>>> {
        self.files.lock().map_err(|_| Error::Production("source cache poisoned".to_string()))
    }
}

fn backend_error(context: impl fmt::Display, err: HistError) -> Error {
    Error::Production(format!("{}: {}", context, err))
}

/// Reference estimation over columnar event files.
///
/// The nominal settings are `pipeline = nominal`, the category cuts followed by
/// the process cuts, and the process weights (plus the era luminosity when
/// enabled). Every file contributes its `{channel}_{pipeline}` folder.
#[derive(Debug, Clone)]
pub struct ColumnEstimation {
    name: String,
    era: Arc<Era>,
    files: Vec<PathBuf>,
    cuts: Cuts,
    weights: Weights,
    scale_to_luminosity: bool,
    negative_weight_policy: NegativeWeightPolicy,
    sources: Arc<SourceCache>,
}

impl ColumnEstimation {
    /// New estimation without files, cuts or weights.
    pub fn new(name: impl Into<String>, era: Arc<Era>, sources: Arc<SourceCache>) -> Self {
        Self {
            name: name.into(),
            era,
            files: Vec::new(),
            cuts: Cuts::new(),
            weights: Weights::new(),
            scale_to_luminosity: false,
            negative_weight_policy: NegativeWeightPolicy::Allow,
            sources,
        }
    }

    /// Add one input file.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add input files.
    pub fn files(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.files.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Process-specific selection.
    pub fn with_cuts(mut self, cuts: Cuts) -> Self {
        self.cuts = cuts;
        self
    }

    /// Process weights.
    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    /// Multiply by the era luminosity (simulated samples).
    pub fn scale_to_luminosity(mut self, enabled: bool) -> Self {
        self.scale_to_luminosity = enabled;
        self
    }

    /// Negative event weight handling.
    pub fn negative_weight_policy(mut self, policy: NegativeWeightPolicy) -> Self {
        self.negative_weight_policy = policy;
        self
    }

    /// Settings before any shift is applied.
    pub fn nominal_settings(&self, category: &Category) -> Result<HistogramSettings> {
        let mut cuts = category.cuts().clone();
        cuts.extend(&self.cuts)?;
        let mut weights = self.weights.clone();
        if self.scale_to_luminosity {
            weights.add(Weight::new(format!("{}", self.era.luminosity()), "lumi"))?;
        }
        Ok(HistogramSettings { pipeline: "nominal".to_string(), cuts, weights })
    }

    fn compile(&self, source: &str) -> Result<CompiledExpr> {
        CompiledExpr::compile(source).map_err(|e| backend_error(&self.name, e))
    }
}

impl Estimation for ColumnEstimation {
    fn name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, category: &Category, shift: &Shift) -> Result<Histogram> {
        if self.files.is_empty() {
            return Err(Error::Production(format!("estimation '{}' has no input files", self.name)));
        }
        let mut settings = self.nominal_settings(category)?;
        shift.apply(&mut settings)?;

        let variable = category.variable();
        let spec = HistogramSpec {
            name: self.name.clone(),
            variable: self.compile(variable.expression())?,
            selection: Some(self.compile(&settings.cuts.expand())?),
            weight: Some(self.compile(&settings.weights.extract())?),
            bin_edges: variable.edges().to_vec(),
            flow_policy: FlowPolicy::Drop,
            negative_weight_policy: self.negative_weight_policy,
        };
        let folder = settings.folder(category.channel().name());

        let mut total =
            Histogram::zeros(self.name.clone(), variable.edges()).map_err(|e| backend_error(&self.name, e))?;
        for path in &self.files {
            let file = self.sources.open(path)?;
            let events = file.folder(&folder).map_err(|e| backend_error(&self.name, e))?;
            let filled = fill_histogram(&spec, events).map_err(|e| backend_error(&self.name, e))?;
            total.add_scaled(&filled.histogram, 1.0).map_err(|e| backend_error(&self.name, e))?;
        }

        tracing::debug!(
            estimation = %self.name,
            category = category.name(),
            shift = %shift,
            folder = %folder,
            integral = total.integral(),
            "materialized"
        );
        Ok(total)
    }

    fn list_source_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.files.clone())
    }

    fn fingerprint(&self) -> String {
        let files: Vec<String> = self.files.iter().map(|p| p.display().to_string()).collect();
        format!(
            "{}[{}]|{}|{}|lumi={}|{:?}",
            self.name,
            files.join(","),
            self.cuts.expand(),
            self.weights.extract(),
            if self.scale_to_luminosity { self.era.luminosity() } else { 1.0 },
            self.negative_weight_policy
        )
    }
}
