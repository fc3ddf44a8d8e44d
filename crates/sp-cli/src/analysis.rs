//! Analysis configuration (YAML or JSON) and its translation into a registry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use sp_core::{Error, Result};
use sp_engine::{
    Binning, Category, Channel, ColumnEstimation, ControlRegion, Cut, Cuts, Era, Process, ProcessMap,
    Registry, SourceCache, Systematic, SystematicGroup, Variable, Variation, VariationKind, Weight,
    Weights, create_variations,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Era identifier (`Run2016`, `Run2017`, `Run2018`).
    pub era: String,
    /// Analysis tag used in shape keys.
    #[serde(default = "default_analysis")]
    pub analysis: String,
    /// Mass hypothesis used in shape keys.
    #[serde(default = "default_mass")]
    pub mass: String,
    /// Output tag (`{tag}_shapes.json`).
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Threads (0 = auto).
    #[serde(default)]
    pub threads: usize,
    /// Register nominal shapes only.
    #[serde(default)]
    pub skip_systematic_variations: bool,
    /// Directory input files are relative to (default: the config file's directory).
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<CategoryConfig>>,
    /// Control-plot variables per channel (used with `--control`).
    #[serde(default)]
    pub control: BTreeMap<String, Vec<ControlConfig>>,
    #[serde(default)]
    pub systematics: Vec<SystematicConfig>,

    #[serde(skip)]
    config_dir: PathBuf,
}

fn default_analysis() -> String {
    "smhtt".to_string()
}

fn default_mass() -> String {
    "125".to_string()
}

fn default_tag() -> String {
    "default".to_string()
}

fn default_one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct CutConfig {
    pub name: String,
    pub expr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelConfig {
    /// Base selection of every category of the channel.
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub derived: Vec<DerivedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub nick: String,
    /// Output name (default: the nick).
    #[serde(default)]
    pub name: Option<String>,
    /// Estimation name in logs and file lists (default: the nick).
    #[serde(default)]
    pub estimation: Option<String>,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
    #[serde(default)]
    pub weights: Vec<CutConfig>,
    /// Multiply by the era luminosity.
    #[serde(default)]
    pub lumi: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRegionConfig {
    SameSign,
    AntiIsolated(CutConfig),
}

/// One region or several applied together (`[same_sign, {anti_isolated: ...}]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegionConfig {
    One(ControlRegionConfig),
    All(Vec<ControlRegionConfig>),
}

impl RegionConfig {
    fn region(&self) -> Result<ControlRegion> {
        let one = |r: &ControlRegionConfig| match r {
            ControlRegionConfig::SameSign => ControlRegion::same_sign(),
            ControlRegionConfig::AntiIsolated(c) => ControlRegion::anti_isolated(Cut::new(&c.expr, &c.name)),
        };
        match self {
            RegionConfig::One(r) => Ok(one(r)),
            RegionConfig::All(rs) => {
                let mut iter = rs.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| Error::Configuration("empty control region list".to_string()))?;
                Ok(iter.fold(one(first), |acc, r| acc.and(one(r))))
            }
        }
    }
}

/// Transfer factor taken from the composed yields in two regions.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtrapolationConfig {
    pub numerator: RegionConfig,
    pub denominator: RegionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivedConfig {
    pub nick: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `[nick, coefficient]` pairs.
    pub components: Vec<(String, f64)>,
    #[serde(default = "default_one")]
    pub transfer_factor: f64,
    #[serde(default)]
    pub control_region: Option<RegionConfig>,
    #[serde(default)]
    pub extrapolation: Option<ExtrapolationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BinsConfig {
    Edges(Vec<f64>),
    Constant { n_bins: usize, low: f64, high: f64 },
}

impl From<&BinsConfig> for Binning {
    fn from(bins: &BinsConfig) -> Self {
        match bins {
            BinsConfig::Edges(edges) => Binning::Variable(edges.clone()),
            BinsConfig::Constant { n_bins, low, high } => {
                Binning::Constant { n_bins: *n_bins, low: *low, high: *high }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
    /// Variable name in shape keys.
    pub var: String,
    /// Expression to histogram (default: `var`).
    #[serde(default)]
    pub expression: Option<String>,
    pub bins: BinsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    pub var: String,
    #[serde(default)]
    pub expression: Option<String>,
    pub bins: BinsConfig,
    /// Extra selection for this control plot.
    #[serde(default)]
    pub cut: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystematicConfig {
    /// Shifted input pipeline `{pipeline}{Up|Down}`.
    Pipeline { name: String, pipeline: String, processes: Vec<String>, channels: Vec<String> },
    /// Up squares the weight, Down removes it.
    SquareAndRemove { name: String, weight: String, processes: Vec<String>, channels: Vec<String> },
    /// Extra weight named `weight_name`, `up`/`down` expressions.
    AddWeight {
        name: String,
        weight_name: String,
        up: String,
        down: String,
        processes: Vec<String>,
        channels: Vec<String>,
    },
    /// Replace the weight named `weight_name`.
    ReplaceWeight {
        name: String,
        weight_name: String,
        up: String,
        down: String,
        processes: Vec<String>,
        channels: Vec<String>,
    },
    /// `base ± fraction · admixture`, stored under the name of `base`.
    RelabelAdmixture { name: String, base: String, admixture: String, fraction: f64, channels: Vec<String> },
}

impl SystematicConfig {
    fn channels(&self) -> &[String] {
        match self {
            SystematicConfig::Pipeline { channels, .. }
            | SystematicConfig::SquareAndRemove { channels, .. }
            | SystematicConfig::AddWeight { channels, .. }
            | SystematicConfig::ReplaceWeight { channels, .. }
            | SystematicConfig::RelabelAdmixture { channels, .. } => channels,
        }
    }
}

/// Read an analysis config (`.json` by extension, YAML otherwise).
pub fn read_analysis_config(path: &Path) -> Result<AnalysisConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let mut cfg: AnalysisConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes).map_err(|e| Error::Yaml(format!("{}: {}", path.display(), e)))?
    };
    cfg.config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(cfg)
}

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Channels to process (empty = all configured channels).
    pub channels: Vec<String>,
    /// Produce control plots instead of analysis categories.
    pub control: bool,
    pub skip_systematic_variations: bool,
    pub base_dir: Option<PathBuf>,
}

/// Registry and process maps of one run.
#[derive(Debug)]
pub struct Plan {
    pub registry: Registry,
    pub process_maps: BTreeMap<String, ProcessMap>,
}

fn cuts(entries: &[CutConfig]) -> Result<Cuts> {
    Cuts::from_cuts(entries.iter().map(|c| Cut::new(&c.expr, &c.name)))
}

fn weights(entries: &[CutConfig]) -> Result<Weights> {
    Weights::from_weights(entries.iter().map(|w| Weight::new(&w.expr, &w.name)))
}

impl AnalysisConfig {
    fn era(&self) -> Result<Arc<Era>> {
        Era::from_name(&self.era).map(Arc::new)
    }

    fn channel_config(&self, channel: &str) -> Result<&ChannelConfig> {
        self.channels
            .get(channel)
            .ok_or_else(|| Error::Configuration(format!("channel '{}' is not configured", channel)))
    }

    fn resolve(&self, base_dir: Option<&Path>, file: &Path) -> PathBuf {
        if file.is_absolute() {
            return file.to_path_buf();
        }
        let base = match (base_dir, &self.base_dir) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(dir)) if dir.is_absolute() => dir.clone(),
            (None, Some(dir)) => self.config_dir.join(dir),
            (None, None) => self.config_dir.clone(),
        };
        base.join(file)
    }

    /// Leaf and derived processes of `channel`.
    pub fn process_map(
        &self,
        channel: &str,
        era: &Arc<Era>,
        sources: &Arc<SourceCache>,
        base_dir: Option<&Path>,
    ) -> Result<ProcessMap> {
        let cfg = self.channel_config(channel)?;
        let mut map = ProcessMap::new(channel);
        for p in &cfg.processes {
            let estimation = ColumnEstimation::new(
                p.estimation.as_deref().unwrap_or(&p.nick),
                Arc::clone(era),
                Arc::clone(sources),
            )
            .files(p.files.iter().map(|f| self.resolve(base_dir, f)))
            .with_cuts(cuts(&p.cuts)?)
            .with_weights(weights(&p.weights)?)
            .scale_to_luminosity(p.lumi);
            map.insert(Process::leaf(&p.nick, p.name.as_deref().unwrap_or(&p.nick), Arc::new(estimation)))?;
        }
        for d in &cfg.derived {
            let components: Vec<(&str, f64)> = d.components.iter().map(|(n, c)| (n.as_str(), *c)).collect();
            let mut composition = map.compose(&components)?.with_transfer_factor(d.transfer_factor);
            if let Some(region) = &d.control_region {
                composition = composition.with_control_region(region.region()?);
            }
            if let Some(e) = &d.extrapolation {
                composition = composition.with_extrapolation(e.numerator.region()?, e.denominator.region()?);
            }
            map.insert(Process::derived(&d.nick, d.name.as_deref().unwrap_or(&d.nick), composition))?;
        }
        Ok(map)
    }

    fn categories(&self, channel: &Arc<Channel>, control: bool) -> Result<Vec<Arc<Category>>> {
        let name = channel.name();
        let missing = || {
            Error::Configuration(format!(
                "no {} configured for channel '{}'",
                if control { "control variables" } else { "categories" },
                name
            ))
        };
        let categories = if control {
            let entries = self.control.get(name).filter(|v| !v.is_empty()).ok_or_else(missing)?;
            entries
                .iter()
                .map(|c| {
                    let variable =
                        Variable::new(&c.var, c.expression.as_deref().unwrap_or(&c.var), (&c.bins).into())?;
                    let extra = match &c.cut {
                        Some(expr) => Cuts::from_cuts([Cut::new(expr, "control")])?,
                        None => Cuts::new(),
                    };
                    Category::new(format!("{}_{}", name, c.var), channel, extra, variable).map(Arc::new)
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let entries = self.categories.get(name).filter(|v| !v.is_empty()).ok_or_else(missing)?;
            entries
                .iter()
                .map(|c| {
                    let variable =
                        Variable::new(&c.var, c.expression.as_deref().unwrap_or(&c.var), (&c.bins).into())?;
                    Category::new(&c.name, channel, cuts(&c.cuts)?, variable).map(Arc::new)
                })
                .collect::<Result<Vec<_>>>()?
        };
        Ok(categories)
    }

    /// Channels of this run: the requested ones, or every configured channel.
    pub fn active_channels(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.channels.keys().cloned().collect());
        }
        let mut seen = BTreeSet::new();
        for ch in requested {
            self.channel_config(ch)?;
            seen.insert(ch.clone());
        }
        Ok(seen.into_iter().collect())
    }

    /// Build the registry: nominal shapes of every active channel, then every
    /// systematic in configuration order.
    pub fn plan(&self, options: &BuildOptions) -> Result<Plan> {
        let era = self.era()?;
        let sources = Arc::new(SourceCache::new());
        let skip = self.skip_systematic_variations || options.skip_systematic_variations;
        let mut registry = Registry::new().skip_systematic_variations(skip);
        let mut process_maps = BTreeMap::new();

        for name in self.active_channels(&options.channels)? {
            let cfg = self.channel_config(&name)?;
            let channel = Arc::new(Channel::new(&name, cuts(&cfg.cuts)?));
            let categories = self.categories(&channel, options.control)?;
            let processes = self.process_map(&name, &era, &sources, options.base_dir.as_deref())?;
            registry.add_nominal(&processes, &categories, &self.analysis, &era, &self.mass)?;
            process_maps.insert(name, processes);
        }

        for systematic in &self.systematics {
            for ch in systematic.channels() {
                self.channel_config(ch)?;
            }
            self.register(systematic, &mut registry, &process_maps, &era)?;
        }
        tracing::info!(requests = registry.len(), channels = process_maps.len(), "analysis planned");
        Ok(Plan { registry, process_maps })
    }

    fn register(
        &self,
        systematic: &SystematicConfig,
        registry: &mut Registry,
        process_maps: &BTreeMap<String, ProcessMap>,
        era: &Arc<Era>,
    ) -> Result<usize> {
        let group = |variations: Vec<Variation>, processes: &[String], channels: &[String]| {
            SystematicGroup::new(variations).processes(processes.iter().cloned()).channels(channels.iter().cloned())
        };
        match systematic {
            SystematicConfig::Pipeline { name, pipeline, processes, channels } => {
                let variations = create_variations(name, VariationKind::pipeline(pipeline))?;
                registry.expand(&group(variations.to_vec(), processes, channels), process_maps, era)
            }
            SystematicConfig::SquareAndRemove { name, weight, processes, channels } => {
                let variations = create_variations(name, VariationKind::square_and_remove(weight))?;
                registry.expand(&group(variations.to_vec(), processes, channels), process_maps, era)
            }
            SystematicConfig::AddWeight { name, weight_name, up, down, processes, channels } => {
                let variations = Variation::add_weight_pair(name, weight_name, up, down);
                registry.expand(&group(variations.to_vec(), processes, channels), process_maps, era)
            }
            SystematicConfig::ReplaceWeight { name, weight_name, up, down, processes, channels } => {
                let variations = Variation::replace_weight_pair(name, weight_name, up, down);
                registry.expand(&group(variations.to_vec(), processes, channels), process_maps, era)
            }
            SystematicConfig::RelabelAdmixture { name, base, admixture, fraction, channels } => {
                let mut added = 0;
                for variation in create_variations(name, VariationKind::Relabel)? {
                    let sign = match variation.direction() {
                        sp_engine::Direction::Up => 1.0,
                        sp_engine::Direction::Down => -1.0,
                    };
                    for ch in channels {
                        let Some(processes) = process_maps.get(ch) else {
                            continue;
                        };
                        let composition = processes.compose(&[(base.as_str(), 1.0), (admixture.as_str(), sign * fraction)])?;
                        let output_name = processes.get(base)?.name().to_string();
                        let shifted = Arc::new(Process::derived(
                            format!("{}p{}{}", base, admixture, variation.direction()),
                            output_name,
                            composition,
                        ));
                        for category in registry.categories(ch) {
                            let request = Systematic::new(
                                category,
                                Arc::clone(&shifted),
                                &self.analysis,
                                Arc::clone(era),
                                variation.clone().into(),
                                &self.mass,
                            );
                            added += usize::from(registry.add(request)?);
                        }
                    }
                }
                Ok(added)
            }
        }
    }

    /// Output path for this analysis when none is given.
    pub fn default_output(&self) -> PathBuf {
        PathBuf::from(format!("{}_shapes.json", self.tag))
    }
}
