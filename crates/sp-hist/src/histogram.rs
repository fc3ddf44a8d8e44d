//! Binned histogram with the bin-wise algebra used to compose shapes.

use serde::{Deserialize, Serialize};

use crate::error::{HistError, Result};

/// A 1D histogram with variable-width bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name (the output key once produced).
    pub name: String,
    /// Bin edges (length = n_bins + 1, strictly increasing).
    pub bin_edges: Vec<f64>,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Number of filled entries contributing to the histogram.
    pub entries: f64,
}

impl Histogram {
    /// Create an empty histogram on the given edges.
    pub fn zeros(name: impl Into<String>, bin_edges: &[f64]) -> Result<Self> {
        validate_edges(bin_edges)?;
        let n_bins = bin_edges.len() - 1;
        Ok(Self {
            name: name.into(),
            bin_edges: bin_edges.to_vec(),
            bin_content: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            entries: 0.0,
        })
    }

    /// Build a histogram from explicit contents; `sumw2` defaults to the contents
    /// (Poisson errors for unit weights).
    pub fn from_contents(
        name: impl Into<String>,
        bin_edges: &[f64],
        bin_content: Vec<f64>,
        sumw2: Option<Vec<f64>>,
    ) -> Result<Self> {
        validate_edges(bin_edges)?;
        let n_bins = bin_edges.len() - 1;
        if bin_content.len() != n_bins {
            return Err(HistError::Binning(format!(
                "{} bin contents for {} bins",
                bin_content.len(),
                n_bins
            )));
        }
        let sumw2 = match sumw2 {
            Some(s) if s.len() != n_bins => {
                return Err(HistError::Binning(format!("{} sumw2 values for {} bins", s.len(), n_bins)));
            }
            Some(s) => s,
            None => bin_content.iter().map(|c| c.abs()).collect(),
        };
        let entries = bin_content.iter().sum();
        Ok(Self { name: name.into(), bin_edges: bin_edges.to_vec(), bin_content, sumw2, entries })
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Statistical error per bin (`sqrt(sumw2)`).
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|s| s.sqrt()).collect()
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Multiply every bin by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.bin_content {
            *c *= factor;
        }
        let f2 = factor * factor;
        for s in &mut self.sumw2 {
            *s *= f2;
        }
    }

    /// `self += factor * other`, bin by bin.
    ///
    /// Errors are combined as uncorrelated. Both histograms must share the
    /// same bin edges.
    pub fn add_scaled(&mut self, other: &Histogram, factor: f64) -> Result<()> {
        if self.bin_edges != other.bin_edges {
            return Err(HistError::Binning(format!(
                "cannot add '{}' to '{}': bin edges differ",
                other.name, self.name
            )));
        }
        let f2 = factor * factor;
        for (c, o) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *c += factor * o;
        }
        for (s, o) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *s += f2 * o;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Return the same histogram under a new name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(HistError::Binning(format!("need at least 2 bin edges, got {}", edges.len())));
    }
    if edges.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(HistError::Binning(format!("bin edges not strictly increasing: {:?}", edges)));
    }
    Ok(())
}
