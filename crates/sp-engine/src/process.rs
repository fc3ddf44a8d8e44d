//! Processes and their composition algebra.
//!
//! A leaf process delegates to an [`Estimation`]. A derived process is a
//! weighted sum of other processes, optionally evaluated in a control region
//! and scaled by a transfer factor (e.g. QCD = data − ZTT − TT in the
//! same-sign region). The factor may also be extrapolated from data as the
//! ratio of the composed yields in two further regions (ABCD). Components are
//! held by `Arc`, so composition is fixed when the process is built and never
//! re-resolved by nick.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use sp_core::{Error, Result};
use sp_hist::Histogram;

use crate::cache::{CacheKey, ShapeCache};
use crate::category::{Category, ControlRegion};
use crate::estimation::Estimation;
use crate::variation::Shift;

/// Linear combination of processes.
#[derive(Debug, Clone)]
pub struct Composition {
    components: Vec<(Arc<Process>, f64)>,
    transfer_factor: f64,
    control_region: Option<ControlRegion>,
    extrapolation: Option<(ControlRegion, ControlRegion)>,
}

impl Composition {
    /// `Σ coefficient · component` with transfer factor 1.
    pub fn new(components: Vec<(Arc<Process>, f64)>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Configuration("composition without components".to_string()));
        }
        Ok(Self { components, transfer_factor: 1.0, control_region: None, extrapolation: None })
    }

    /// Scale the sum by `factor`.
    pub fn with_transfer_factor(mut self, factor: f64) -> Self {
        self.transfer_factor = factor;
        self
    }

    /// Evaluate the components in `region` instead of the requested category.
    pub fn with_control_region(mut self, region: ControlRegion) -> Self {
        self.control_region = Some(region);
        self
    }

    /// Multiply by the ratio of the composed yields in `numerator` over
    /// `denominator`, both evaluated at the requested shift.
    pub fn with_extrapolation(mut self, numerator: ControlRegion, denominator: ControlRegion) -> Self {
        self.extrapolation = Some((numerator, denominator));
        self
    }

    /// Components and coefficients.
    pub fn components(&self) -> &[(Arc<Process>, f64)] {
        &self.components
    }

    /// Transfer factor.
    pub fn transfer_factor(&self) -> f64 {
        self.transfer_factor
    }

    /// Control region, if any.
    pub fn control_region(&self) -> Option<&ControlRegion> {
        self.control_region.as_ref()
    }

    /// Numerator and denominator regions of the extrapolation factor, if any.
    pub fn extrapolation(&self) -> Option<(&ControlRegion, &ControlRegion)> {
        self.extrapolation.as_ref().map(|(n, d)| (n, d))
    }

    fn sum(&self, name: &str, category: &Category, shift: &Shift, cache: &ShapeCache) -> Result<Histogram> {
        let mut total = Histogram::zeros(name, category.variable().edges())
            .map_err(|e| Error::Production(format!("{}: {}", name, e)))?;
        for (process, coefficient) in &self.components {
            let h = process.materialize(category, shift, cache)?;
            total
                .add_scaled(&h, *coefficient)
                .map_err(|e| Error::Production(format!("{}: {}", name, e)))?;
        }
        Ok(total)
    }

    fn extrapolation_factor(
        &self,
        name: &str,
        category: &Category,
        shift: &Shift,
        cache: &ShapeCache,
    ) -> Result<f64> {
        let Some((numerator, denominator)) = &self.extrapolation else {
            return Ok(1.0);
        };
        let num = self.sum(name, &category.in_region(numerator)?, shift, cache)?.integral();
        let den = self.sum(name, &category.in_region(denominator)?, shift, cache)?.integral();
        if den == 0.0 || !den.is_finite() {
            return Err(Error::Production(format!(
                "{}: zero yield in region '{}' of category '{}'",
                name,
                denominator.name(),
                category.name()
            )));
        }
        let factor = num / den;
        tracing::debug!(process = name, category = category.name(), factor, "extrapolation factor");
        Ok(factor)
    }

    fn combine(&self, name: &str, category: &Category, shift: &Shift, cache: &ShapeCache) -> Result<Histogram> {
        let factor = self.extrapolation_factor(name, category, shift, cache)?;
        let region;
        let shape_category = match &self.control_region {
            Some(r) => {
                region = category.in_region(r)?;
                &region
            }
            None => category,
        };
        let mut total = self.sum(name, shape_category, shift, cache)?;
        total.scale(self.transfer_factor * factor);
        Ok(total)
    }
}

/// How a process is materialized.
#[derive(Debug, Clone)]
pub enum ProcessKind {
    /// Computed by an estimation.
    Leaf(Arc<dyn Estimation>),
    /// Combined from other processes.
    Derived(Composition),
}

/// A physics process (`ZTT`, `TT`, `QCD`, ...).
#[derive(Debug, Clone)]
pub struct Process {
    nick: String,
    name: String,
    kind: ProcessKind,
}

impl Process {
    /// Process backed by an estimation.
    pub fn leaf(nick: impl Into<String>, name: impl Into<String>, estimation: Arc<dyn Estimation>) -> Self {
        Self { nick: nick.into(), name: name.into(), kind: ProcessKind::Leaf(estimation) }
    }

    /// Process combined from others.
    pub fn derived(nick: impl Into<String>, name: impl Into<String>, composition: Composition) -> Self {
        Self { nick: nick.into(), name: name.into(), kind: ProcessKind::Derived(composition) }
    }

    /// Configuration handle.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Name used in output keys.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Leaf or derived.
    pub fn kind(&self) -> &ProcessKind {
        &self.kind
    }

    /// Estimation of a leaf process.
    pub fn estimation(&self) -> Option<&Arc<dyn Estimation>> {
        match &self.kind {
            ProcessKind::Leaf(e) => Some(e),
            ProcessKind::Derived(_) => None,
        }
    }

    /// Histogram of this process in `category` at `shift`, memoized in `cache`.
    ///
    /// Relabel shifts are materialized at nominal. Derived processes evaluate
    /// every component at the same shift.
    pub fn materialize(&self, category: &Category, shift: &Shift, cache: &ShapeCache) -> Result<Histogram> {
        let shift = shift.materialization();
        let key = CacheKey::new(category, &self.fingerprint(), shift);
        cache.get_or_materialize(key, || {
            tracing::debug!(process = %self.nick, category = category.name(), shift = %shift, "cache miss");
            match &self.kind {
                ProcessKind::Leaf(estimation) => estimation.materialize(category, shift),
                ProcessKind::Derived(composition) => composition.combine(&self.name, category, shift, cache),
            }
        })
    }

    /// Identity of what the process computes: the nick plus the estimation
    /// for leaves, the nick plus the resolved composition for derived processes.
    pub fn fingerprint(&self) -> String {
        match &self.kind {
            ProcessKind::Leaf(estimation) => format!("{}:{}", self.nick, estimation.fingerprint()),
            ProcessKind::Derived(c) => {
                let terms: Vec<String> =
                    c.components.iter().map(|(p, k)| format!("{}*{}", k, p.fingerprint())).collect();
                let region = c.control_region.as_ref().map(region_fingerprint).unwrap_or_default();
                let mut fp = format!("{}=[{}]x{}@{}", self.nick, terms.join("+"), c.transfer_factor, region);
                if let Some((n, d)) = &c.extrapolation {
                    fp.push_str(&format!("x({}/{})", region_fingerprint(n), region_fingerprint(d)));
                }
                fp
            }
        }
    }

    /// Input files of this process and, for derived processes, of all components.
    pub fn source_files(&self) -> Result<Vec<PathBuf>> {
        match &self.kind {
            ProcessKind::Leaf(estimation) => estimation.list_source_files(),
            ProcessKind::Derived(composition) => {
                let mut files = BTreeSet::new();
                for (process, _) in composition.components() {
                    files.extend(process.source_files()?);
                }
                Ok(files.into_iter().collect())
            }
        }
    }
}

fn region_fingerprint(region: &ControlRegion) -> String {
    let cuts: Vec<String> =
        region.replacements().iter().map(|c| format!("{}={}", c.name(), c.expression())).collect();
    format!("{}[{}]", region.name(), cuts.join(","))
}

/// The processes of one channel, keyed by nick in insertion order.
#[derive(Debug, Clone)]
pub struct ProcessMap {
    channel: String,
    processes: Vec<Arc<Process>>,
    index: HashMap<String, usize>,
}

impl ProcessMap {
    /// Empty map for `channel`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into(), processes: Vec::new(), index: HashMap::new() }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register a process. `DuplicateName` if the nick is taken.
    pub fn insert(&mut self, process: Process) -> Result<Arc<Process>> {
        if self.index.contains_key(process.nick()) {
            return Err(Error::DuplicateName(format!(
                "process '{}' in channel '{}'",
                process.nick(),
                self.channel
            )));
        }
        let process = Arc::new(process);
        self.index.insert(process.nick().to_string(), self.processes.len());
        self.processes.push(Arc::clone(&process));
        Ok(process)
    }

    /// Look up a process by nick. `Configuration` if unknown.
    pub fn get(&self, nick: &str) -> Result<&Arc<Process>> {
        self.index.get(nick).map(|&i| &self.processes[i]).ok_or_else(|| {
            Error::Configuration(format!("unknown process '{}' in channel '{}'", nick, self.channel))
        })
    }

    /// Resolve `(nick, coefficient)` pairs into a composition.
    /// `MissingDependency` if a nick is not registered.
    pub fn compose(&self, components: &[(&str, f64)]) -> Result<Composition> {
        let resolved = components
            .iter()
            .map(|&(nick, coefficient)| {
                let i = self.index.get(nick).ok_or_else(|| {
                    Error::MissingDependency(format!(
                        "process '{}' in channel '{}'",
                        nick, self.channel
                    ))
                })?;
                Ok((Arc::clone(&self.processes[*i]), coefficient))
            })
            .collect::<Result<Vec<_>>>()?;
        Composition::new(resolved)
    }

    /// Processes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Process>> {
        self.processes.iter()
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Binning, Channel, Variable};
    use crate::cutstring::{Cut, Cuts};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    /// Returns a fixed histogram and records the selections it was asked for.
    #[derive(Debug)]
    struct Fixed {
        contents: Vec<f64>,
        seen: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(contents: Vec<f64>) -> Arc<Self> {
            Arc::new(Self { contents, seen: Mutex::new(Vec::new()) })
        }
    }

    impl Estimation for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn materialize(&self, category: &Category, _shift: &Shift) -> Result<Histogram> {
            self.seen.lock().unwrap().push(category.selection());
            Ok(Histogram::from_contents("fixed", category.variable().edges(), self.contents.clone(), None).unwrap())
        }
        fn list_source_files(&self) -> Result<Vec<PathBuf>> {
            Ok(vec![PathBuf::from(format!("{}.json", self.contents.len()))])
        }
    }

    fn category(n_bins: usize) -> Category {
        let ch = Arc::new(Channel::new("mt", Cuts::from_cuts([Cut::new("q_1*q_2<0", "os")]).unwrap()));
        let var = Variable::new("m_vis", "m_vis", Binning::Constant { n_bins, low: 0.0, high: 10.0 }).unwrap();
        Category::new("mt_inclusive", &ch, Cuts::new(), var).unwrap()
    }

    #[test]
    fn composition_is_linear() {
        let mut map = ProcessMap::new("mt");
        map.insert(Process::leaf("A", "A", Fixed::new(vec![1.0, 2.0]))).unwrap();
        map.insert(Process::leaf("B", "B", Fixed::new(vec![10.0, 20.0]))).unwrap();
        let comp = map.compose(&[("A", 2.0), ("B", -0.5)]).unwrap().with_transfer_factor(3.0);
        let derived = Process::derived("D", "D", comp);

        let cache = ShapeCache::new();
        let h = derived.materialize(&category(2), &Shift::Nominal, &cache).unwrap();
        assert_relative_eq!(h.bin_content[0], 3.0 * (2.0 * 1.0 - 0.5 * 10.0));
        assert_relative_eq!(h.bin_content[1], 3.0 * (2.0 * 2.0 - 0.5 * 20.0));
    }

    #[test]
    fn qcd_from_same_sign_subtraction_keeps_negative_bins() {
        let data = Fixed::new(vec![100.0; 10]);
        let mut map = ProcessMap::new("mt");
        map.insert(Process::leaf("data", "data_obs", data.clone())).unwrap();
        map.insert(Process::leaf("ZTT", "ZTT", Fixed::new(vec![120.0; 10]))).unwrap();
        map.insert(Process::leaf("TT", "TT", Fixed::new(vec![80.0; 10]))).unwrap();
        let comp = map
            .compose(&[("data", 1.0), ("ZTT", -1.0), ("TT", -1.0)])
            .unwrap()
            .with_control_region(ControlRegion::same_sign());
        let qcd = map.insert(Process::derived("QCD", "QCD", comp)).unwrap();

        let h = qcd.materialize(&category(10), &Shift::Nominal, &ShapeCache::new()).unwrap();
        assert_eq!(h.bin_content, vec![-100.0; 10]);
        assert_eq!(data.seen.lock().unwrap().as_slice(), ["(q_1*q_2>0)"]);
    }

    #[test]
    fn same_nick_different_composition_is_not_shared() {
        let mut map = ProcessMap::new("mt");
        map.insert(Process::leaf("EMB", "EMB", Fixed::new(vec![5.0, 5.0]))).unwrap();
        map.insert(Process::leaf("TTT", "TTT", Fixed::new(vec![2.0, 2.0]))).unwrap();
        let up = Process::derived("EMBpTTT", "EMB", map.compose(&[("EMB", 1.0), ("TTT", 0.1)]).unwrap());
        let down = Process::derived("EMBpTTT", "EMB", map.compose(&[("EMB", 1.0), ("TTT", -0.1)]).unwrap());
        assert_ne!(up.fingerprint(), down.fingerprint());

        let cache = ShapeCache::new();
        let h_up = up.materialize(&category(2), &Shift::Nominal, &cache).unwrap();
        let h_down = down.materialize(&category(2), &Shift::Nominal, &cache).unwrap();
        assert_relative_eq!(h_up.bin_content[0], 5.2);
        assert_relative_eq!(h_down.bin_content[0], 4.8);
    }

    #[test]
    fn lookup_errors() {
        let mut map = ProcessMap::new("et");
        map.insert(Process::leaf("ZTT", "ZTT", Fixed::new(vec![1.0]))).unwrap();

        assert!(matches!(map.get("W"), Err(Error::Configuration(_))));
        assert!(matches!(map.compose(&[("ZTT", 1.0), ("W", -1.0)]), Err(Error::MissingDependency(_))));
        assert!(matches!(
            map.insert(Process::leaf("ZTT", "ZTT", Fixed::new(vec![1.0]))),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(map.compose(&[]), Err(Error::Configuration(_))));
    }

    #[test]
    fn derived_source_files_are_the_union() {
        let mut map = ProcessMap::new("mt");
        map.insert(Process::leaf("A", "A", Fixed::new(vec![1.0]))).unwrap();
        map.insert(Process::leaf("B", "B", Fixed::new(vec![1.0, 2.0]))).unwrap();
        map.insert(Process::leaf("C", "C", Fixed::new(vec![3.0]))).unwrap();
        let d = Process::derived("D", "D", map.compose(&[("A", 1.0), ("B", 1.0), ("C", 1.0)]).unwrap());
        assert_eq!(d.source_files().unwrap(), vec![PathBuf::from("1.json"), PathBuf::from("2.json")]);
    }

    #[test]
    fn mismatched_edges_fail_in_production() {
        #[derive(Debug)]
        struct Wrong;
        impl Estimation for Wrong {
            fn name(&self) -> &str {
                "wrong"
            }
            fn materialize(&self, _: &Category, _: &Shift) -> Result<Histogram> {
                Ok(Histogram::zeros("wrong", &[0.0, 1.0]).unwrap())
            }
            fn list_source_files(&self) -> Result<Vec<PathBuf>> {
                Ok(Vec::new())
            }
        }
        let mut map = ProcessMap::new("mt");
        map.insert(Process::leaf("W", "W", Arc::new(Wrong))).unwrap();
        let d = Process::derived("D", "D", map.compose(&[("W", 1.0)]).unwrap());
        let err = d.materialize(&category(2), &Shift::Nominal, &ShapeCache::new()).unwrap_err();
        assert!(matches!(err, Error::Production(_)));
    }

    /// Returns contents chosen by the selection it is asked for.
    #[derive(Debug)]
    struct ByRegion {
        name: &'static str,
        regions: Vec<(&'static str, Vec<f64>)>,
    }

    impl Estimation for ByRegion {
        fn name(&self) -> &str {
            self.name
        }
        fn materialize(&self, category: &Category, _shift: &Shift) -> Result<Histogram> {
            let selection = category.selection();
            let (_, contents) = self
                .regions
                .iter()
                .find(|(s, _)| *s == selection)
                .ok_or_else(|| Error::Production(format!("unexpected selection {}", selection)))?;
            Ok(Histogram::from_contents(self.name, category.variable().edges(), contents.clone(), None).unwrap())
        }
        fn list_source_files(&self) -> Result<Vec<PathBuf>> {
            Ok(vec![PathBuf::from(format!("{}.json", self.name))])
        }
    }

    fn iso_category() -> Category {
        let ch = Arc::new(Channel::new(
            "tt",
            Cuts::from_cuts([Cut::new("q_1*q_2<0", "os"), Cut::new("iso_1<0.5", "tau_1_iso")]).unwrap(),
        ));
        let var = Variable::new("m_vis", "m_vis", Binning::Constant { n_bins: 2, low: 0.0, high: 10.0 }).unwrap();
        Category::new("tt_inclusive", &ch, Cuts::new(), var).unwrap()
    }

    #[test]
    fn abcd_factor_is_taken_from_data() {
        // A: os iso (signal), B: ss iso, C: os anti-iso (shape), D: ss anti-iso.
        const B: &str = "(iso_1<0.5)&&(q_1*q_2>0)";
        const C: &str = "(q_1*q_2<0)&&(iso_1>=0.5)";
        const D: &str = "(q_1*q_2>0)&&(iso_1>=0.5)";
        let data = ByRegion {
            name: "data",
            regions: vec![(B, vec![30.0, 20.0]), (C, vec![60.0, 40.0]), (D, vec![110.0, 90.0])],
        };
        let ztt = ByRegion {
            name: "ZTT",
            regions: vec![(B, vec![5.0, 5.0]), (C, vec![10.0, 10.0]), (D, vec![0.0, 0.0])],
        };
        let mut map = ProcessMap::new("tt");
        map.insert(Process::leaf("data", "data_obs", Arc::new(data))).unwrap();
        map.insert(Process::leaf("ZTT", "ZTT", Arc::new(ztt))).unwrap();

        let anti_iso = || ControlRegion::anti_isolated(Cut::new("iso_1>=0.5", "tau_1_iso"));
        let comp = map
            .compose(&[("data", 1.0), ("ZTT", -1.0)])
            .unwrap()
            .with_control_region(anti_iso())
            .with_extrapolation(ControlRegion::same_sign(), ControlRegion::same_sign().and(anti_iso()));
        let qcd = Process::derived("QCD", "QCD", comp);

        let cache = ShapeCache::new();
        let h = qcd.materialize(&iso_category(), &Shift::Nominal, &cache).unwrap();
        // Shape (C − ZTT) = [50, 30], factor (50 − 10) / 200 = 0.2.
        assert_relative_eq!(h.bin_content[0], 10.0);
        assert_relative_eq!(h.bin_content[1], 6.0);
        assert_relative_eq!(h.integral(), 16.0);
        // The derived histogram plus two components in each of three regions.
        assert_eq!(cache.stats().materializations, 7);
    }

    #[test]
    fn zero_yield_denominator_is_a_production_error() {
        let flat = ByRegion { name: "data", regions: vec![("(iso_1<0.5)&&(q_1*q_2>0)", vec![0.0, 0.0])] };
        let mut map = ProcessMap::new("tt");
        map.insert(Process::leaf("data", "data_obs", Arc::new(flat))).unwrap();
        let comp = map
            .compose(&[("data", 1.0)])
            .unwrap()
            .with_extrapolation(ControlRegion::same_sign(), ControlRegion::same_sign());
        let qcd = Process::derived("QCD", "QCD", comp);

        let err = qcd.materialize(&iso_category(), &Shift::Nominal, &ShapeCache::new()).unwrap_err();
        assert!(matches!(err, Error::Production(_)));
        assert!(err.to_string().contains("zero yield"));
    }

    #[test]
    fn leaf_fingerprint_includes_the_estimation() {
        let a = Process::leaf("ZTT", "ZTT", Fixed::new(vec![1.0]));
        let b = Process::leaf("ZTT", "ZTT", Fixed::new(vec![1.0, 2.0]));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("ZTT:fixed"));
    }
}
