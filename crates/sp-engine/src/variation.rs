//! Named variation transforms and production shifts.
//!
//! A [`Variation`] rewrites the nominal [`HistogramSettings`] of an
//! estimation: it switches the input pipeline, adds/replaces/squares a
//! weight, or only relabels the output. [`create_variations`] builds the
//! Up/Down pair for the symmetric kinds.

use std::fmt;

use sp_core::{Error, Result};

use crate::cutstring::Weight;
use crate::estimation::HistogramSettings;

/// Shift direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Upward shift.
    Up,
    /// Downward shift.
    Down,
}

impl Direction {
    /// `"Up"` or `"Down"`.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Up => "Up",
            Direction::Down => "Down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a variation does to the nominal settings.
#[derive(Debug, Clone, PartialEq)]
pub enum VariationKind {
    /// Read the `{pipeline}{Up|Down}` folder instead of `nominal`.
    DifferentPipeline {
        /// Pipeline stem, e.g. `tauEsOneProng`.
        pipeline: String,
    },
    /// Multiply by an extra weight.
    AddWeight {
        /// The weight to add.
        weight: Weight,
    },
    /// Swap a named weight for another expression.
    ReplaceWeight {
        /// Name of the weight being replaced.
        weight_name: String,
        /// Its replacement.
        weight: Weight,
    },
    /// Up squares the named weight, Down removes it.
    SquareAndRemoveWeight {
        /// Name of the weight.
        weight_name: String,
    },
    /// Output relabelling only; materialized at nominal.
    Relabel,
}

impl VariationKind {
    /// `DifferentPipeline` shorthand.
    pub fn pipeline(pipeline: impl Into<String>) -> Self {
        VariationKind::DifferentPipeline { pipeline: pipeline.into() }
    }

    /// `SquareAndRemoveWeight` shorthand.
    pub fn square_and_remove(weight_name: impl Into<String>) -> Self {
        VariationKind::SquareAndRemoveWeight { weight_name: weight_name.into() }
    }

    /// Kinds whose Up and Down differ only by direction.
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            VariationKind::DifferentPipeline { .. }
                | VariationKind::SquareAndRemoveWeight { .. }
                | VariationKind::Relabel
        )
    }

    fn describe(&self) -> String {
        match self {
            VariationKind::DifferentPipeline { pipeline } => format!("pipeline:{}", pipeline),
            VariationKind::AddWeight { weight } => {
                format!("add_weight:{}={}", weight.name(), weight.expression())
            }
            VariationKind::ReplaceWeight { weight_name, weight } => {
                format!("replace_weight:{}->{}={}", weight_name, weight.name(), weight.expression())
            }
            VariationKind::SquareAndRemoveWeight { weight_name } => {
                format!("square_and_remove:{}", weight_name)
            }
            VariationKind::Relabel => "relabel".to_string(),
        }
    }
}

/// A named, directed variation.
#[derive(Debug, Clone, PartialEq)]
pub struct Variation {
    name: String,
    direction: Direction,
    kind: VariationKind,
}

impl Variation {
    /// Generic constructor.
    pub fn new(name: impl Into<String>, kind: VariationKind, direction: Direction) -> Self {
        Self { name: name.into(), direction, kind }
    }

    /// Read shifted input pipeline `{pipeline}{direction}`.
    pub fn different_pipeline(
        name: impl Into<String>,
        pipeline: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self::new(name, VariationKind::pipeline(pipeline), direction)
    }

    /// Multiply the nominal weight by `weight`.
    pub fn add_weight(name: impl Into<String>, weight: Weight, direction: Direction) -> Self {
        Self::new(name, VariationKind::AddWeight { weight }, direction)
    }

    /// Replace the weight named `weight_name` by `weight`.
    pub fn replace_weight(
        name: impl Into<String>,
        weight_name: impl Into<String>,
        weight: Weight,
        direction: Direction,
    ) -> Self {
        Self::new(
            name,
            VariationKind::ReplaceWeight { weight_name: weight_name.into(), weight },
            direction,
        )
    }

    /// Square (Up) or drop (Down) the weight named `weight_name`.
    pub fn square_and_remove_weight(
        name: impl Into<String>,
        weight_name: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self::new(name, VariationKind::square_and_remove(weight_name), direction)
    }

    /// Pure relabelling.
    pub fn relabel(name: impl Into<String>, direction: Direction) -> Self {
        Self::new(name, VariationKind::Relabel, direction)
    }

    /// `[Up, Down]` adding `up` resp. `down` as weight `weight_name`.
    pub fn add_weight_pair(
        name: &str,
        weight_name: &str,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> [Variation; 2] {
        [
            Self::add_weight(name, Weight::new(up, weight_name), Direction::Up),
            Self::add_weight(name, Weight::new(down, weight_name), Direction::Down),
        ]
    }

    /// `[Up, Down]` replacing `weight_name` by `up` resp. `down`.
    pub fn replace_weight_pair(
        name: &str,
        weight_name: &str,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> [Variation; 2] {
        [
            Self::replace_weight(name, weight_name, Weight::new(up, weight_name), Direction::Up),
            Self::replace_weight(name, weight_name, Weight::new(down, weight_name), Direction::Down),
        ]
    }

    /// Systematic name (without direction).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shift direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Transform kind.
    pub fn kind(&self) -> &VariationKind {
        &self.kind
    }

    /// `{name}{Up|Down}`.
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.direction)
    }

    /// Whether the variation only renames the output.
    pub fn is_relabel(&self) -> bool {
        matches!(self.kind, VariationKind::Relabel)
    }

    /// Rewrite nominal settings for this variation.
    pub fn apply(&self, settings: &mut HistogramSettings) -> Result<()> {
        match &self.kind {
            VariationKind::DifferentPipeline { pipeline } => {
                settings.pipeline = format!("{}{}", pipeline, self.direction);
            }
            VariationKind::AddWeight { weight } => settings.weights.add(weight.clone())?,
            VariationKind::ReplaceWeight { weight_name, weight } => {
                settings.weights.replace(weight_name, weight.clone())?
            }
            VariationKind::SquareAndRemoveWeight { weight_name } => match self.direction {
                Direction::Up => settings.weights.square(weight_name)?,
                Direction::Down => {
                    settings.weights.remove(weight_name)?;
                }
            },
            VariationKind::Relabel => {}
        }
        Ok(())
    }

    pub(crate) fn fingerprint(&self) -> String {
        format!("{}|{}", self.label(), self.kind.describe())
    }
}

/// `[Up, Down]` for a symmetric kind.
///
/// `AddWeight`/`ReplaceWeight` carry a different expression per direction;
/// build those with [`Variation::add_weight_pair`] or
/// [`Variation::replace_weight_pair`].
pub fn create_variations(name: &str, kind: VariationKind) -> Result<[Variation; 2]> {
    if !kind.is_symmetric() {
        return Err(Error::Configuration(format!(
            "variation '{}': {} needs distinct up/down expressions",
            name,
            kind.describe()
        )));
    }
    Ok([
        Variation::new(name, kind.clone(), Direction::Up),
        Variation::new(name, kind, Direction::Down),
    ])
}

/// The shift a request is produced at.
#[derive(Debug, Clone, PartialEq)]
pub enum Shift {
    /// Unvaried.
    Nominal,
    /// Shifted by one variation.
    Varied(Variation),
}

static NOMINAL: Shift = Shift::Nominal;

impl Shift {
    /// True for [`Shift::Nominal`].
    pub fn is_nominal(&self) -> bool {
        matches!(self, Shift::Nominal)
    }

    /// `nominal` or `{name}{Up|Down}`.
    pub fn label(&self) -> String {
        match self {
            Shift::Nominal => "nominal".to_string(),
            Shift::Varied(v) => v.label(),
        }
    }

    /// Rewrite nominal settings (no-op at nominal).
    pub fn apply(&self, settings: &mut HistogramSettings) -> Result<()> {
        match self {
            Shift::Nominal => Ok(()),
            Shift::Varied(v) => v.apply(settings),
        }
    }

    /// Shift the histogram is actually computed at: relabels reuse nominal.
    pub fn materialization(&self) -> &Shift {
        match self {
            Shift::Varied(v) if v.is_relabel() => &NOMINAL,
            other => other,
        }
    }

    /// Content identity of the shift.
    pub fn fingerprint(&self) -> String {
        match self {
            Shift::Nominal => "nominal".to_string(),
            Shift::Varied(v) => v.fingerprint(),
        }
    }
}

impl From<Variation> for Shift {
    fn from(variation: Variation) -> Self {
        Shift::Varied(variation)
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutstring::{Cuts, Weights};

    fn settings() -> HistogramSettings {
        HistogramSettings {
            pipeline: "nominal".into(),
            cuts: Cuts::new(),
            weights: Weights::from_weights([
                Weight::new("puweight", "puweight"),
                Weight::new("topPtReweightWeight", "topPtReweightWeight"),
            ])
            .unwrap(),
        }
    }

    #[test]
    fn pairs_differ_only_in_direction() {
        for kind in [
            VariationKind::pipeline("tauEsOneProng"),
            VariationKind::square_and_remove("topPtReweightWeight"),
            VariationKind::Relabel,
        ] {
            let [up, down] = create_variations("CMS_x", kind.clone()).unwrap();
            assert_eq!(up.direction(), Direction::Up);
            assert_eq!(down.direction(), Direction::Down);
            assert_eq!(up.name(), down.name());
            assert_eq!(up.kind(), &kind);
            assert_eq!(down.kind(), &kind);
            assert_eq!(Variation::new("CMS_x", kind, Direction::Down), down);
        }
    }

    #[test]
    fn asymmetric_kinds_need_pair_helpers() {
        let kind = VariationKind::AddWeight { weight: Weight::new("1.02", "trg") };
        assert!(create_variations("CMS_trg", kind).is_err());

        let [up, down] = Variation::add_weight_pair("CMS_trg", "trg", "1.02", "0.98");
        assert_eq!(up.label(), "CMS_trgUp");
        assert_eq!(down.label(), "CMS_trgDown");
    }

    #[test]
    fn pipeline_switches_folder() {
        let [up, down] = create_variations("CMS_scale_t", VariationKind::pipeline("tauEsOneProng")).unwrap();
        let mut s = settings();
        up.apply(&mut s).unwrap();
        assert_eq!(s.pipeline, "tauEsOneProngUp");
        let mut s = settings();
        down.apply(&mut s).unwrap();
        assert_eq!(s.pipeline, "tauEsOneProngDown");
    }

    #[test]
    fn square_and_remove() {
        let [up, down] =
            create_variations("CMS_htt_ttbarShape", VariationKind::square_and_remove("topPtReweightWeight"))
                .unwrap();

        let mut s = settings();
        up.apply(&mut s).unwrap();
        assert_eq!(s.weights.extract(), "(puweight)*((topPtReweightWeight)*(topPtReweightWeight))");

        let mut s = settings();
        down.apply(&mut s).unwrap();
        assert_eq!(s.weights.extract(), "(puweight)");
    }

    #[test]
    fn replace_weight_on_absent_weight_fails() {
        let [up, _] = Variation::replace_weight_pair("CMS_zpt", "zPtReweightWeight", "1.1", "0.9");
        let err = up.apply(&mut settings()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let [up, _] = Variation::replace_weight_pair("CMS_pu", "puweight", "puweightUp", "puweightDown");
        let mut s = settings();
        up.apply(&mut s).unwrap();
        assert_eq!(s.weights.extract(), "(topPtReweightWeight)*(puweightUp)");
    }

    #[test]
    fn relabel_materializes_at_nominal() {
        let shift = Shift::from(Variation::relabel("CMS_htt_emb_ttbar", Direction::Up));
        assert_eq!(shift.label(), "CMS_htt_emb_ttbarUp");
        assert!(shift.materialization().is_nominal());
        assert_eq!(Shift::Nominal.label(), "nominal");
    }
}
