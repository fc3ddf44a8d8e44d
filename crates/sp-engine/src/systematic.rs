//! Production requests and their output keys.

use std::fmt;
use std::sync::Arc;

use sp_core::{Error, Result};
use sp_hist::Histogram;

use crate::cache::ShapeCache;
use crate::category::{Category, Era};
use crate::process::Process;
use crate::variation::Shift;

/// Output address of one shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey {
    /// Channel name.
    pub channel: String,
    /// Category name.
    pub category: String,
    /// Process name.
    pub process: String,
    /// Analysis tag.
    pub analysis: String,
    /// Era identifier.
    pub era: String,
    /// Variable name.
    pub variable: String,
    /// Mass hypothesis.
    pub mass: String,
    /// Shift label (`nominal` or `{name}{Up|Down}`).
    pub shift: String,
}

impl ShapeKey {
    /// Field separator of the string form.
    pub const SEPARATOR: char = '#';

    /// `Configuration` if a field contains the separator, which would make
    /// the string form ambiguous.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("channel", &self.channel),
            ("category", &self.category),
            ("process", &self.process),
            ("analysis", &self.analysis),
            ("era", &self.era),
            ("variable", &self.variable),
            ("mass", &self.mass),
            ("shift", &self.shift),
        ];
        match fields.iter().find(|(_, v)| v.contains(Self::SEPARATOR)) {
            Some((field, value)) => Err(Error::Configuration(format!(
                "{} name '{}' contains the key separator '{}'",
                field,
                value,
                Self::SEPARATOR
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}#{}#{}#{}#{}",
            self.channel,
            self.category,
            self.process,
            self.analysis,
            self.era,
            self.variable,
            self.mass,
            self.shift
        )
    }
}

/// One production request: a process in a category at a shift.
#[derive(Debug, Clone)]
pub struct Systematic {
    category: Arc<Category>,
    process: Arc<Process>,
    analysis: String,
    era: Arc<Era>,
    shift: Shift,
    mass: String,
}

impl Systematic {
    /// Build a request.
    pub fn new(
        category: Arc<Category>,
        process: Arc<Process>,
        analysis: impl Into<String>,
        era: Arc<Era>,
        shift: Shift,
        mass: impl Into<String>,
    ) -> Self {
        Self { category, process, analysis: analysis.into(), era, shift, mass: mass.into() }
    }

    /// The same request at another shift.
    pub fn with_shift(&self, shift: Shift) -> Self {
        Self { shift, ..self.clone() }
    }

    /// Category.
    pub fn category(&self) -> &Arc<Category> {
        &self.category
    }

    /// Process.
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Analysis tag.
    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    /// Era.
    pub fn era(&self) -> &Arc<Era> {
        &self.era
    }

    /// Shift.
    pub fn shift(&self) -> &Shift {
        &self.shift
    }

    /// Mass hypothesis.
    pub fn mass(&self) -> &str {
        &self.mass
    }

    /// Output key.
    pub fn key(&self) -> ShapeKey {
        ShapeKey {
            channel: self.category.channel().name().to_string(),
            category: self.category.name().to_string(),
            process: self.process.name().to_string(),
            analysis: self.analysis.clone(),
            era: self.era.name().to_string(),
            variable: self.category.variable().name().to_string(),
            mass: self.mass.clone(),
            shift: self.shift.label(),
        }
    }

    /// What the request computes, independent of how it is addressed.
    pub(crate) fn content_fingerprint(&self) -> String {
        format!("{}|{}|{}", self.process.fingerprint(), self.category.fingerprint(), self.shift.fingerprint())
    }

    /// Materialize the histogram, named by the output key.
    pub fn produce(&self, cache: &ShapeCache) -> Result<Histogram> {
        let histogram = self.process.materialize(&self.category, &self.shift, cache)?;
        Ok(histogram.renamed(self.key().to_string()))
    }
}
