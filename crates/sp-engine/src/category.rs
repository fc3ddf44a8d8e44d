//! Eras, channels, binned variables and analysis categories.

use std::fmt;
use std::sync::Arc;

use sp_core::{Error, Result};

use crate::cutstring::{Cut, Cuts};

const KNOWN_ERAS: [(&str, f64); 3] =
    [("Run2016", 35_870.0), ("Run2017", 41_529.0), ("Run2018", 59_740.0)];

/// Name of the opposite-sign cut every channel carries.
const OPPOSITE_SIGN: &str = "os";

/// A data-taking era with its integrated luminosity (pb⁻¹).
#[derive(Debug, Clone, PartialEq)]
pub struct Era {
    name: String,
    luminosity_pb: f64,
}

impl Era {
    /// Resolve a known era identifier (`Run2016`, `Run2017`, `Run2018`).
    pub fn from_name(name: &str) -> Result<Self> {
        KNOWN_ERAS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(n, lumi)| Self { name: n.to_string(), luminosity_pb: lumi })
            .ok_or_else(|| {
                let known: Vec<&str> = KNOWN_ERAS.iter().map(|(n, _)| *n).collect();
                Error::Configuration(format!("unknown era '{}' (known: {})", name, known.join(", ")))
            })
    }

    /// Era identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Integrated luminosity in pb⁻¹.
    pub fn luminosity(&self) -> f64 {
        self.luminosity_pb
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A final state (`mt`, `et`, `tt`, `em`) with its base selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    cuts: Cuts,
}

impl Channel {
    /// Create a channel.
    pub fn new(name: impl Into<String>, cuts: Cuts) -> Self {
        Self { name: name.into(), cuts }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base selection shared by all categories of the channel.
    pub fn cuts(&self) -> &Cuts {
        &self.cuts
    }
}

/// Histogram binning of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Binning {
    /// `n_bins` equal-width bins in `[low, high)`.
    Constant {
        /// Number of bins.
        n_bins: usize,
        /// Lower edge.
        low: f64,
        /// Upper edge.
        high: f64,
    },
    /// Explicit bin edges.
    Variable(Vec<f64>),
}

impl Binning {
    /// Validated bin edges.
    pub fn edges(&self) -> Result<Vec<f64>> {
        let edges = match self {
            Binning::Constant { n_bins, low, high } => {
                if *n_bins == 0 || !(low < high) {
                    return Err(Error::Configuration(format!(
                        "invalid constant binning: {} bins in [{}, {})",
                        n_bins, low, high
                    )));
                }
                let width = (high - low) / *n_bins as f64;
                (0..=*n_bins)
                    .map(|i| if i == *n_bins { *high } else { low + width * i as f64 })
                    .collect()
            }
            Binning::Variable(edges) => edges.clone(),
        };
        if edges.len() < 2 || edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::Configuration(format!(
                "bin edges must be at least 2 strictly increasing values, got {:?}",
                edges
            )));
        }
        Ok(edges)
    }
}

/// A histogrammed quantity: output name, expression and binning.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    expression: String,
    binning: Binning,
    edges: Vec<f64>,
}

impl Variable {
    /// Create a variable; the binning is validated here.
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        binning: Binning,
    ) -> Result<Self> {
        let edges = binning.edges()?;
        Ok(Self { name: name.into(), expression: expression.into(), binning, edges })
    }

    /// Name used in output keys.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expression evaluated per event.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Binning as configured.
    pub fn binning(&self) -> &Binning {
        &self.binning
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }
}

/// Cut replacements that move a signal-region category into a control region.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRegion {
    name: String,
    replacements: Vec<Cut>,
}

impl ControlRegion {
    /// Each replacement substitutes the category cut of the same name.
    pub fn new(name: impl Into<String>, replacements: Vec<Cut>) -> Self {
        Self { name: name.into(), replacements }
    }

    /// Same-sign lepton pair.
    pub fn same_sign() -> Self {
        Self::new("same_sign", vec![Cut::new("q_1*q_2>0", OPPOSITE_SIGN)])
    }

    /// Inverted isolation of one leg; `cut` replaces the isolation cut of the same name.
    pub fn anti_isolated(cut: Cut) -> Self {
        Self::new("anti_isolated", vec![cut])
    }

    /// Both regions at once (`same_sign().and(anti_isolated(..))`).
    pub fn and(mut self, other: ControlRegion) -> Self {
        self.name = format!("{}+{}", self.name, other.name);
        self.replacements.extend(other.replacements);
        self
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replacement cuts.
    pub fn replacements(&self) -> &[Cut] {
        &self.replacements
    }
}

/// An analysis category: channel selection plus category cuts and the
/// histogrammed variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    name: String,
    channel: Arc<Channel>,
    cuts: Cuts,
    variable: Variable,
}

impl Category {
    /// Build a category. Its cuts are the channel cuts followed by `cuts`.
    ///
    /// Categories named like a sign control region (`_qcd_`, `_ss_`) get the
    /// opposite-sign requirement flipped to same sign.
    pub fn new(
        name: impl Into<String>,
        channel: &Arc<Channel>,
        cuts: Cuts,
        variable: Variable,
    ) -> Result<Self> {
        let mut all = channel.cuts().clone();
        all.extend(&cuts)?;
        let mut category = Self { name: name.into(), channel: Arc::clone(channel), cuts: all, variable };
        if category.is_sign_control_region() {
            category.cuts.replace(OPPOSITE_SIGN, Cut::new("q_1*q_2>0", OPPOSITE_SIGN)).map_err(|e| {
                Error::Configuration(format!("category '{}': sign flip failed: {}", category.name, e))
            })?;
        }
        Ok(category)
    }

    /// Category name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Full selection (channel + category cuts).
    pub fn cuts(&self) -> &Cuts {
        &self.cuts
    }

    /// Histogrammed variable.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// Expanded selection string.
    pub fn selection(&self) -> String {
        self.cuts.expand()
    }

    /// Whether the name marks a same-sign control region.
    pub fn is_sign_control_region(&self) -> bool {
        self.name.contains("_qcd_") || self.name.contains("_ss_")
    }

    /// The same category with the region's cuts substituted.
    pub fn in_region(&self, region: &ControlRegion) -> Result<Category> {
        let mut moved = self.clone();
        for cut in region.replacements() {
            moved.cuts.replace(cut.name(), cut.clone()).map_err(|e| {
                Error::Configuration(format!(
                    "control region '{}' on category '{}': {}",
                    region.name(),
                    self.name,
                    e
                ))
            })?;
        }
        Ok(moved)
    }

    /// Content identity: selection, variable expression and bin edges.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{:?}", self.selection(), self.variable.expression, self.variable.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt() -> Arc<Channel> {
        Arc::new(Channel::new(
            "mt",
            Cuts::from_cuts([Cut::new("q_1*q_2<0", "os"), Cut::new("pt_2>30", "pt_2")]).unwrap(),
        ))
    }

    fn m_vis() -> Variable {
        Variable::new("m_vis", "m_vis", Binning::Constant { n_bins: 4, low: 0.0, high: 200.0 }).unwrap()
    }

    #[test]
    fn known_eras_and_unknown_era() {
        let era = Era::from_name("Run2017").unwrap();
        assert_eq!(era.luminosity(), 41_529.0);
        let err = Era::from_name("Run2019").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn binning_edges() {
        assert_eq!(m_vis().edges(), &[0.0, 50.0, 100.0, 150.0, 200.0]);
        assert!(Binning::Variable(vec![0.0]).edges().is_err());
        assert!(Binning::Variable(vec![0.0, 10.0, 10.0]).edges().is_err());
        assert!(Binning::Constant { n_bins: 0, low: 0.0, high: 1.0 }.edges().is_err());
    }

    #[test]
    fn category_prepends_channel_cuts() {
        let cat = Category::new(
            "mt_nobtag",
            &mt(),
            Cuts::from_cuts([Cut::new("nbtag==0", "nobtag")]).unwrap(),
            m_vis(),
        )
        .unwrap();
        assert_eq!(cat.selection(), "(q_1*q_2<0)&&(pt_2>30)&&(nbtag==0)");
        assert!(!cat.is_sign_control_region());
    }

    #[test]
    fn sign_control_region_flips_os() {
        let cat = Category::new("mt_ss_nobtag", &mt(), Cuts::new(), m_vis()).unwrap();
        assert_eq!(cat.cuts().len(), 2);
        assert_eq!(cat.cuts().get("os").unwrap().expression(), "q_1*q_2>0");
        assert_eq!(cat.cuts().get("pt_2").unwrap().expression(), "pt_2>30");
    }

    #[test]
    fn control_region_replaces_by_name() {
        let cat = Category::new("mt_inclusive", &mt(), Cuts::new(), m_vis()).unwrap();
        let ss = cat.in_region(&ControlRegion::same_sign()).unwrap();
        assert_eq!(ss.name(), "mt_inclusive");
        assert_eq!(ss.cuts().get("os").unwrap().expression(), "q_1*q_2>0");
        assert_ne!(ss.fingerprint(), cat.fingerprint());

        let missing = ControlRegion::anti_isolated(Cut::new("byTightIso_2<0.5", "tau_2_iso"));
        assert!(cat.in_region(&missing).is_err());
    }

    #[test]
    fn combined_region_applies_all_replacements() {
        let cat = Category::new("mt_inclusive", &mt(), Cuts::new(), m_vis()).unwrap();
        let region = ControlRegion::same_sign().and(ControlRegion::anti_isolated(Cut::new("pt_2<=30", "pt_2")));
        assert_eq!(region.name(), "same_sign+anti_isolated");

        let moved = cat.in_region(&region).unwrap();
        assert_eq!(moved.selection(), "(q_1*q_2>0)&&(pt_2<=30)");
    }
}
