//! # sp-hist
//!
//! Histogram primitives for shapeprod.
//!
//! - [`Histogram`]: binned contents plus sum of squared weights, with the
//!   bin-wise algebra (scaling, weighted addition) used to compose shapes.
//! - [`CompiledExpr`]: string selection/weight expressions compiled once and
//!   evaluated over event columns.
//! - [`fill_histogram`]: single-pass filling with selection and weight.
//! - [`EventFile`]: columnar event files organised in named folders, one
//!   folder per processing pipeline.
//!
//! ## Example
//!
//! ```no_run
//! use sp_hist::{CompiledExpr, EventFile, FlowPolicy, HistogramSpec, NegativeWeightPolicy, fill_histogram};
//!
//! let file = EventFile::open("ztt.json").unwrap();
//! let columns = file.folder("mt_nominal").unwrap();
//! let spec = HistogramSpec {
//!     name: "m_vis".into(),
//!     variable: CompiledExpr::compile("m_vis").unwrap(),
//!     selection: Some(CompiledExpr::compile("pt_2 > 30 && q_1*q_2 < 0").unwrap()),
//!     weight: Some(CompiledExpr::compile("puweight*idWeight_1").unwrap()),
//!     bin_edges: vec![0.0, 50.0, 100.0, 150.0],
//!     flow_policy: FlowPolicy::Drop,
//!     negative_weight_policy: NegativeWeightPolicy::Allow,
//! };
//! let filled = fill_histogram(&spec, columns).unwrap();
//! println!("integral: {}", filled.histogram.integral());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod expr;
pub mod filler;
pub mod histogram;

pub use error::{HistError, Result};
pub use events::{EventColumns, EventFile};
pub use expr::CompiledExpr;
pub use filler::{FilledHistogram, FlowPolicy, HistogramSpec, NegativeWeightPolicy, fill_histogram};
pub use histogram::Histogram;
