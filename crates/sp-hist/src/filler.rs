//! Single-pass histogram filling from event columns with selection and weight.

use crate::error::{HistError, Result};
use crate::events::EventColumns;
use crate::expr::CompiledExpr;
use crate::histogram::Histogram;

/// Under/overflow handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowPolicy {
    /// Drop entries outside the histogram range (recorded in `underflow/overflow`).
    #[default]
    Drop,
    /// Fold underflow into the first bin and overflow into the last bin.
    Fold,
}

/// Negative weight handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeWeightPolicy {
    /// Keep negative weights as-is.
    #[default]
    Allow,
    /// Clamp negative weights to 0.
    ClampToZero,
    /// Error on the first negative weight encountered.
    Error,
}

/// Specification for filling one histogram.
#[derive(Debug, Clone)]
pub struct HistogramSpec {
    /// Histogram name.
    pub name: String,
    /// Expression for the variable to histogram.
    pub variable: CompiledExpr,
    /// Optional selection (entries pass if > 0).
    pub selection: Option<CompiledExpr>,
    /// Optional per-entry weight.
    pub weight: Option<CompiledExpr>,
    /// Bin edges (sorted, length = n_bins + 1).
    pub bin_edges: Vec<f64>,
    /// Under/overflow policy.
    pub flow_policy: FlowPolicy,
    /// Policy for negative event weights.
    pub negative_weight_policy: NegativeWeightPolicy,
}

/// Result of filling a histogram.
#[derive(Debug, Clone)]
pub struct FilledHistogram {
    /// The in-range histogram.
    pub histogram: Histogram,
    /// Underflow sum of weights (before optional folding).
    pub underflow: f64,
    /// Overflow sum of weights (before optional folding).
    pub overflow: f64,
    /// Selected entries with negative weights.
    pub negative_weight_entries: u64,
}

/// Fill one histogram in a single pass over `events`.
pub fn fill_histogram(spec: &HistogramSpec, events: &EventColumns) -> Result<FilledHistogram> {
    let histogram = Histogram::zeros(spec.name.clone(), &spec.bin_edges)?;
    let last = histogram.n_bins() - 1;
    let mut filled =
        FilledHistogram { histogram, underflow: 0.0, overflow: 0.0, negative_weight_entries: 0 };

    let values = spec.variable.eval_columns(events)?;
    let selected = spec.selection.as_ref().map(|s| s.eval_columns(events)).transpose()?;
    let weights = spec.weight.as_ref().map(|w| w.eval_columns(events)).transpose()?;

    let edges = &spec.bin_edges;
    let (lo, hi) = (edges[0], edges[edges.len() - 1]);

    for (entry, &val) in values.iter().enumerate() {
        if let Some(sel) = &selected
            && sel[entry] <= 0.0
        {
            continue;
        }

        let mut w = weights.as_ref().map_or(1.0, |w| w[entry]);
        if w < 0.0 {
            filled.negative_weight_entries += 1;
            match spec.negative_weight_policy {
                NegativeWeightPolicy::Allow => {}
                NegativeWeightPolicy::ClampToZero => w = 0.0,
                NegativeWeightPolicy::Error => {
                    return Err(HistError::HistogramFill(format!(
                        "negative weight (spec='{}', entry={entry}, weight={w})",
                        spec.name
                    )));
                }
            }
        }

        let bin = if val < lo {
            filled.underflow += w;
            match spec.flow_policy {
                FlowPolicy::Fold => 0,
                FlowPolicy::Drop => continue,
            }
        } else if val >= hi || val.is_nan() {
            filled.overflow += w;
            match spec.flow_policy {
                FlowPolicy::Fold => last,
                FlowPolicy::Drop => continue,
            }
        } else {
            // First edge strictly greater than `val`, minus one.
            edges.partition_point(|&e| e <= val) - 1
        };

        let h = &mut filled.histogram;
        h.bin_content[bin] += w;
        h.sumw2[bin] += w * w;
        h.entries += 1.0;
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(weight: Option<&str>, selection: Option<&str>, edges: &[f64]) -> HistogramSpec {
        HistogramSpec {
            name: "h".into(),
            variable: CompiledExpr::compile("x").unwrap(),
            selection: selection.map(|s| CompiledExpr::compile(s).unwrap()),
            weight: weight.map(|w| CompiledExpr::compile(w).unwrap()),
            bin_edges: edges.to_vec(),
            flow_policy: FlowPolicy::Drop,
            negative_weight_policy: NegativeWeightPolicy::Allow,
        }
    }

    fn events(cols: &[(&str, Vec<f64>)]) -> EventColumns {
        EventColumns::from_columns(cols.iter().map(|(n, v)| (n.to_string(), v.clone()))).unwrap()
    }

    #[test]
    fn fill_simple() {
        let ev = events(&[("x", vec![0.5, 1.5, 2.5, 0.5, -1.0, 3.5])]);
        let r = fill_histogram(&spec(None, None, &[0.0, 1.0, 2.0, 3.0]), &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![2.0, 1.0, 1.0]);
        assert_eq!(r.underflow, 1.0);
        assert_eq!(r.overflow, 1.0);
        assert_eq!(r.histogram.entries, 4.0);
    }

    #[test]
    fn bin_lower_edges_are_inclusive() {
        let ev = events(&[("x", vec![0.0, 1.0, 2.0, 2.999, 3.0])]);
        let r = fill_histogram(&spec(None, None, &[0.0, 1.0, 2.0, 3.0]), &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![1.0, 1.0, 2.0]);
        assert_eq!(r.overflow, 1.0);
    }

    #[test]
    fn fill_with_weight_and_selection() {
        let ev = events(&[("x", vec![0.5, 1.5, 0.5, 1.5]), ("w", vec![2.0, 3.0, 1.0, 7.0])]);
        let r = fill_histogram(&spec(Some("w"), Some("w < 5"), &[0.0, 1.0, 2.0]), &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![3.0, 3.0]);
        assert_eq!(r.histogram.sumw2, vec![5.0, 9.0]);
    }

    #[test]
    fn fold_moves_flows_into_edge_bins() {
        let mut s = spec(None, None, &[0.0, 1.0, 2.0]);
        s.flow_policy = FlowPolicy::Fold;
        let ev = events(&[("x", vec![-1.0, 0.2, 1.2, 3.0])]);
        let r = fill_histogram(&s, &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![2.0, 2.0]);
        assert_eq!(r.underflow, 1.0);
        assert_eq!(r.overflow, 1.0);
    }

    #[test]
    fn negative_weight_policies() {
        let ev = events(&[("x", vec![0.5, 1.5]), ("w", vec![-1.0, 2.0])]);

        let mut s = spec(Some("w"), None, &[0.0, 1.0, 2.0]);
        let r = fill_histogram(&s, &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![-1.0, 2.0]);
        assert_eq!(r.negative_weight_entries, 1);

        s.negative_weight_policy = NegativeWeightPolicy::ClampToZero;
        let r = fill_histogram(&s, &ev).unwrap();
        assert_eq!(r.histogram.bin_content, vec![0.0, 2.0]);

        s.negative_weight_policy = NegativeWeightPolicy::Error;
        let err = fill_histogram(&s, &ev).unwrap_err();
        assert!(err.to_string().contains("negative weight"));
    }
}
