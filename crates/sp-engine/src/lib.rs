//! # sp-engine
//!
//! Registration, deduplication, composition and parallel production of
//! analysis shapes.
//!
//! A run is assembled in three steps:
//!
//! 1. configuration code builds [`Category`]s (a [`Cuts`] selection plus a
//!    [`Variable`]) and per-channel [`ProcessMap`]s of leaf and derived
//!    [`Process`]es;
//! 2. the nominal Category × Process product is registered in a [`Registry`],
//!    then [`Variation`]s expand it with shifted requests;
//! 3. the sealed registry is handed to a [`Producer`], which materializes every
//!    request on a bounded worker pool and writes one [`ShapeFile`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use sp_engine::*;
//!
//! # fn main() -> sp_core::Result<()> {
//! let era = Arc::new(Era::from_name("Run2017")?);
//! let mt = Arc::new(Channel::new("mt", Cuts::from_cuts([Cut::new("q_1*q_2<0", "os")])?));
//! let sources = Arc::new(SourceCache::new());
//!
//! let mut processes = ProcessMap::new("mt");
//! processes.insert(Process::leaf(
//!     "ZTT",
//!     "ZTT",
//!     Arc::new(ColumnEstimation::new("ZTT", era.clone(), sources.clone()).file("dy.json")),
//! ))?;
//!
//! let variable = Variable::new("m_vis", "m_vis", Binning::Variable(vec![0.0, 50.0, 100.0]))?;
//! let inclusive = Arc::new(Category::new("mt_inclusive", &mt, Cuts::new(), variable)?);
//!
//! let mut registry = Registry::new();
//! registry.add_nominal(&processes, &[inclusive], "mssm", &era, "125")?;
//! for variation in create_variations("CMS_scale_t_1prong_Run2017", VariationKind::pipeline("tauEsOneProng"))? {
//!     registry.add_variation(&variation, processes.get("ZTT")?, "mt", &era)?;
//! }
//!
//! let summary = Producer::new("mt_shapes.json").num_threads(4).produce(&registry.seal())?;
//! println!("{} shapes written", summary.n_shapes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod category;
pub mod cutstring;
pub mod estimation;
pub mod filelist;
pub mod output;
pub mod process;
pub mod producer;
pub mod registry;
pub mod systematic;
pub mod variation;

pub use cache::{CacheKey, CacheStats, ShapeCache};
pub use category::{Binning, Category, Channel, ControlRegion, Era, Variable};
pub use cutstring::{Cut, Cuts, Weight, Weights};
pub use estimation::{ColumnEstimation, Estimation, HistogramSettings, SourceCache};
pub use filelist::{FileList, build_file_list};
pub use output::{SHAPE_FILE_FORMAT, ShapeFile};
pub use process::{Composition, Process, ProcessKind, ProcessMap};
pub use producer::{Producer, ProductionSummary};
pub use registry::{Registry, SealedRegistry, SystematicGroup};
pub use sp_hist::Histogram;
pub use systematic::{ShapeKey, Systematic};
pub use variation::{Direction, Shift, Variation, VariationKind, create_variations};
