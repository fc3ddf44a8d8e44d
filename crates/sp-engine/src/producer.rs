//! Parallel production of a sealed registry.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use sp_core::{Error, Result};
use sp_hist::Histogram;

use crate::cache::{CacheStats, ShapeCache};
use crate::output::ShapeFile;
use crate::registry::SealedRegistry;

/// What a production run did.
#[derive(Debug, Clone, Serialize)]
pub struct ProductionSummary {
    /// Output path (empty for in-memory runs).
    pub output: PathBuf,
    /// Requests processed.
    pub n_requests: usize,
    /// Shapes in the output.
    pub n_shapes: usize,
    /// Histograms computed by estimations or compositions.
    pub n_materializations: u64,
    /// Histograms served from the run cache.
    pub n_cache_hits: u64,
    /// Wall time in seconds.
    pub elapsed_s: f64,
}

/// Runs every request of a sealed registry on a bounded worker pool and
/// writes one shape file.
#[derive(Debug, Clone)]
pub struct Producer {
    output: PathBuf,
    num_threads: usize,
}

impl Producer {
    /// Producer writing to `output`, one worker per available core.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self { output: output.into(), num_threads: 0 }
    }

    /// Worker count (`0` = available parallelism).
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    /// Output path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Produce all requests and write the shape file atomically.
    ///
    /// Nothing is written if any request fails.
    pub fn produce(&self, registry: &SealedRegistry) -> Result<ProductionSummary> {
        let start = Instant::now();
        let (shapes, stats) = self.run(registry)?;
        shapes.write_atomic(&self.output)?;

        let summary = ProductionSummary {
            output: self.output.clone(),
            n_requests: registry.len(),
            n_shapes: shapes.len(),
            n_materializations: stats.materializations,
            n_cache_hits: stats.hits,
            elapsed_s: start.elapsed().as_secs_f64(),
        };
        tracing::info!(
            output = %self.output.display(),
            shapes = summary.n_shapes,
            materializations = summary.n_materializations,
            cache_hits = summary.n_cache_hits,
            elapsed_s = summary.elapsed_s,
            "production finished"
        );
        Ok(summary)
    }

    /// Produce all requests without writing anything.
    pub fn produce_in_memory(&self, registry: &SealedRegistry) -> Result<ShapeFile> {
        self.run(registry).map(|(shapes, _)| shapes)
    }

    fn run(&self, registry: &SealedRegistry) -> Result<(ShapeFile, CacheStats)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("shapeprod-{}", i))
            .build()
            .map_err(|e| Error::Production(format!("failed to build thread pool: {}", e)))?;
        tracing::info!(
            requests = registry.len(),
            threads = pool.current_num_threads(),
            "production started"
        );

        let cache = ShapeCache::new();
        let sink = Mutex::new(ShapeFile::new());
        pool.install(|| {
            registry.requests().par_iter().try_for_each(|request| -> Result<()> {
                let key = request.key();
                let histogram = request.produce(&cache).map_err(|e| {
                    tracing::error!(%key, error = %e, "production failed");
                    e
                })?;
                if !is_finite(&histogram) {
                    tracing::error!(%key, "non-finite bin content");
                    return Err(Error::Production(format!("{}: non-finite bin content", key)));
                }
                tracing::debug!(%key, integral = histogram.integral(), "produced");
                sink.lock()
                    .map_err(|_| Error::Production("shape sink poisoned".to_string()))?
                    .insert(&key, histogram)
            })
        })?;

        let shapes =
            sink.into_inner().map_err(|_| Error::Production("shape sink poisoned".to_string()))?;
        Ok((shapes, cache.stats()))
    }
}

fn is_finite(histogram: &Histogram) -> bool {
    histogram.entries.is_finite()
        && histogram.bin_content.iter().chain(&histogram.sumw2).all(|v| v.is_finite())
}
