//! Deduplicating registry of production requests.
//!
//! Configuration code fills a [`Registry`] with the nominal Category ×
//! Process product, expands it with variations, then calls
//! [`Registry::seal`]. The [`SealedRegistry`] is read-only and is what the
//! producer consumes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sp_core::{Error, Result};

use crate::category::{Category, Era};
use crate::process::{Process, ProcessMap};
use crate::systematic::{ShapeKey, Systematic};
use crate::variation::{Shift, Variation};

/// Variations applied to a set of processes in a set of channels.
#[derive(Debug, Clone, Default)]
pub struct SystematicGroup {
    /// Variations, usually Up/Down pairs.
    pub variations: Vec<Variation>,
    /// Process nicks the variations apply to.
    pub process_nicks: Vec<String>,
    /// Channels the variations apply to.
    pub channels: Vec<String>,
}

impl SystematicGroup {
    /// Group of `variations` with no processes or channels yet.
    pub fn new(variations: impl IntoIterator<Item = Variation>) -> Self {
        Self { variations: variations.into_iter().collect(), ..Self::default() }
    }

    /// Target processes.
    pub fn processes<S: Into<String>>(mut self, nicks: impl IntoIterator<Item = S>) -> Self {
        self.process_nicks.extend(nicks.into_iter().map(Into::into));
        self
    }

    /// Target channels.
    pub fn channels<S: Into<String>>(mut self, channels: impl IntoIterator<Item = S>) -> Self {
        self.channels.extend(channels.into_iter().map(Into::into));
        self
    }
}

/// Requests being registered for one run.
#[derive(Debug, Default)]
pub struct Registry {
    requests: Vec<Systematic>,
    index: HashMap<ShapeKey, usize>,
    nominal: HashMap<NominalKey, Vec<usize>>,
    skip_systematic_variations: bool,
}

/// `(process nick, channel, era)` of a nominal request.
type NominalKey = (String, String, String);

fn nominal_key(nick: &str, channel: &str, era: &str) -> NominalKey {
    (nick.to_string(), channel.to_string(), era.to_string())
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore every non-nominal request (nominal-only runs).
    pub fn skip_systematic_variations(mut self, skip: bool) -> Self {
        self.skip_systematic_variations = skip;
        self
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &ShapeKey) -> bool {
        self.index.contains_key(key)
    }

    /// Requests in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Systematic> {
        self.requests.iter()
    }

    /// Register a request.
    ///
    /// Returns `true` if it was inserted, `false` if an identical request is
    /// already present (or variations are skipped). A different request under
    /// an existing key is a `ConflictingRequest`; a key field containing the
    /// `#` separator is a `Configuration` error.
    pub fn add(&mut self, request: Systematic) -> Result<bool> {
        if self.skip_systematic_variations && !request.shift().is_nominal() {
            return Ok(false);
        }
        let key = request.key();
        key.validate()?;
        if let Some(&i) = self.index.get(&key) {
            let existing = &self.requests[i];
            if existing.content_fingerprint() == request.content_fingerprint() {
                tracing::debug!(%key, "duplicate request ignored");
                return Ok(false);
            }
            return Err(Error::ConflictingRequest(format!(
                "{}: registered as [{}], requested as [{}]",
                key,
                existing.content_fingerprint(),
                request.content_fingerprint()
            )));
        }
        let i = self.requests.len();
        if request.shift().is_nominal() {
            let nominal = nominal_key(request.process().nick(), &key.channel, request.era().name());
            self.nominal.entry(nominal).or_default().push(i);
        }
        self.index.insert(key, i);
        self.requests.push(request);
        Ok(true)
    }

    /// Register every process of `processes` in every category at nominal,
    /// process by process. Returns the number of new requests.
    pub fn add_nominal(
        &mut self,
        processes: &ProcessMap,
        categories: &[Arc<Category>],
        analysis: &str,
        era: &Arc<Era>,
        mass: &str,
    ) -> Result<usize> {
        let mut added = 0;
        for process in processes.iter() {
            for category in categories {
                let request = Systematic::new(
                    Arc::clone(category),
                    Arc::clone(process),
                    analysis,
                    Arc::clone(era),
                    Shift::Nominal,
                    mass,
                );
                added += usize::from(self.add(request)?);
            }
        }
        tracing::info!(
            channel = processes.channel(),
            processes = processes.len(),
            categories = categories.len(),
            added,
            "registered nominal shapes"
        );
        Ok(added)
    }

    /// Copy every nominal request of `process` in `channel` and `era` with
    /// `variation` applied. Returns the number of new requests.
    pub fn add_variation(
        &mut self,
        variation: &Variation,
        process: &Arc<Process>,
        channel: &str,
        era: &Era,
    ) -> Result<usize> {
        if self.skip_systematic_variations {
            return Ok(0);
        }
        let shifted: Vec<Systematic> = self
            .nominal
            .get(&nominal_key(process.nick(), channel, era.name()))
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| self.requests[i].with_shift(Shift::Varied(variation.clone())))
                    .collect()
            })
            .unwrap_or_default();

        let mut added = 0;
        for request in shifted {
            added += usize::from(self.add(request)?);
        }
        if added == 0 {
            tracing::warn!(
                variation = %variation.label(),
                process = process.nick(),
                channel,
                "variation matched no nominal request"
            );
        }
        Ok(added)
    }

    /// Apply a group to every listed process in every listed channel.
    /// Channels missing from `process_maps` are not active in this run and
    /// are skipped.
    pub fn expand(
        &mut self,
        group: &SystematicGroup,
        process_maps: &BTreeMap<String, ProcessMap>,
        era: &Era,
    ) -> Result<usize> {
        let mut added = 0;
        for channel in &group.channels {
            let Some(processes) = process_maps.get(channel) else {
                tracing::debug!(channel = %channel, "channel not active, skipping");
                continue;
            };
            for nick in &group.process_nicks {
                let process = processes.get(nick)?;
                for variation in &group.variations {
                    added += self.add_variation(variation, process, channel, era)?;
                }
            }
        }
        Ok(added)
    }

    /// Distinct nominal categories of `channel`, in registration order.
    pub fn categories(&self, channel: &str) -> Vec<Arc<Category>> {
        let mut seen: Vec<Arc<Category>> = Vec::new();
        for request in self.requests.iter().filter(|r| r.shift().is_nominal()) {
            let category = request.category();
            if category.channel().name() == channel && !seen.iter().any(|c| c.name() == category.name()) {
                seen.push(Arc::clone(category));
            }
        }
        seen
    }

    /// Freeze the registry for production.
    pub fn seal(self) -> SealedRegistry {
        tracing::info!(requests = self.requests.len(), "registry sealed");
        SealedRegistry { requests: self.requests }
    }
}

/// Read-only request list handed to the producer.
#[derive(Debug, Clone)]
pub struct SealedRegistry {
    requests: Vec<Systematic>,
}

impl SealedRegistry {
    /// Requests in registration order.
    pub fn requests(&self) -> &[Systematic] {
        &self.requests
    }

    /// Output keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = ShapeKey> + '_ {
        self.requests.iter().map(Systematic::key)
    }

    /// Number of requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if there is nothing to produce.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Binning, Channel, Variable};
    use crate::cutstring::{Cut, Cuts};
    use crate::estimation::Estimation;
    use crate::variation::{Direction, VariationKind, create_variations};
    use sp_hist::Histogram;
    use std::path::PathBuf;

    #[derive(Debug)]
    struct Flat;

    impl Estimation for Flat {
        fn name(&self) -> &str {
            "flat"
        }
        fn materialize(&self, category: &Category, _: &Shift) -> Result<Histogram> {
            let n = category.variable().edges().len() - 1;
            Ok(Histogram::from_contents("flat", category.variable().edges(), vec![1.0; n], None).unwrap())
        }
        fn list_source_files(&self) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct Setup {
        era: Arc<Era>,
        processes: ProcessMap,
        categories: Vec<Arc<Category>>,
    }

    fn setup() -> Setup {
        let era = Arc::new(Era::from_name("Run2017").unwrap());
        let ch = Arc::new(Channel::new("mt", Cuts::from_cuts([Cut::new("q_1*q_2<0", "os")]).unwrap()));
        let var = Variable::new("m_vis", "m_vis", Binning::Variable(vec![0.0, 50.0, 100.0])).unwrap();
        let categories = ["mt_nobtag", "mt_btag"]
            .iter()
            .map(|name| Arc::new(Category::new(*name, &ch, Cuts::new(), var.clone()).unwrap()))
            .collect();
        let mut processes = ProcessMap::new("mt");
        for nick in ["ZTT", "ZL", "TTT"] {
            processes.insert(Process::leaf(nick, nick, Arc::new(Flat))).unwrap();
        }
        Setup { era, processes, categories }
    }

    #[test]
    fn nominal_product_and_idempotent_add() {
        let s = setup();
        let mut registry = Registry::new();
        assert_eq!(registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap(), 6);
        assert_eq!(registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap(), 0);
        assert_eq!(registry.len(), 6);

        let first = registry.iter().next().unwrap().clone();
        assert!(!registry.add(first.clone()).unwrap());
        assert_eq!(registry.len(), 6);
        assert_eq!(first.key().process, "ZTT");
        assert_eq!(first.key().category, "mt_nobtag");
    }

    #[test]
    fn same_key_different_content_conflicts() {
        let s = setup();
        let mut registry = Registry::new();
        registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap();

        let ch = Arc::new(Channel::new("mt", Cuts::from_cuts([Cut::new("q_1*q_2<0", "os")]).unwrap()));
        let var = Variable::new("m_vis", "m_vis", Binning::Variable(vec![0.0, 25.0, 100.0])).unwrap();
        let rebinned = Arc::new(Category::new("mt_nobtag", &ch, Cuts::new(), var).unwrap());
        let request = Systematic::new(
            rebinned,
            Arc::clone(s.processes.get("ZTT").unwrap()),
            "smhtt",
            s.era.clone(),
            Shift::Nominal,
            "125",
        );
        assert!(matches!(registry.add(request), Err(Error::ConflictingRequest(_))));
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn variations_copy_nominal_requests_of_one_process() {
        let s = setup();
        let mut registry = Registry::new();
        registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap();

        let ztt = s.processes.get("ZTT").unwrap();
        for v in create_variations("CMS_scale_t", VariationKind::pipeline("tauEsOneProng")).unwrap() {
            assert_eq!(registry.add_variation(&v, ztt, "mt", &s.era).unwrap(), 2);
        }
        assert_eq!(registry.len(), 10);

        let other_era = Era::from_name("Run2016").unwrap();
        let v = Variation::relabel("CMS_y", Direction::Up);
        assert_eq!(registry.add_variation(&v, ztt, "mt", &other_era).unwrap(), 0);
        assert_eq!(registry.add_variation(&v, ztt, "et", &s.era).unwrap(), 0);
    }

    #[test]
    fn expand_group_skips_inactive_channels() {
        let s = setup();
        let mut registry = Registry::new();
        registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap();
        let mut maps = BTreeMap::new();
        maps.insert("mt".to_string(), s.processes.clone());

        let group = SystematicGroup::new(
            create_variations("CMS_scale_t", VariationKind::pipeline("tauEsOneProng")).unwrap(),
        )
        .processes(["ZTT", "TTT"])
        .channels(["mt", "et"]);
        assert_eq!(registry.expand(&group, &maps, &s.era).unwrap(), 2 * 2 * 2);

        let bad = group.clone().processes(["W"]);
        assert!(matches!(registry.expand(&bad, &maps, &s.era), Err(Error::Configuration(_))));
    }

    #[test]
    fn skip_systematic_variations_keeps_nominal_only() {
        let s = setup();
        let mut registry = Registry::new().skip_systematic_variations(true);
        registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap();
        let v = Variation::different_pipeline("CMS_scale_t", "tauEsOneProng", Direction::Up);
        assert_eq!(registry.add_variation(&v, s.processes.get("ZL").unwrap(), "mt", &s.era).unwrap(), 0);
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn categories_in_registration_order() {
        let s = setup();
        let mut registry = Registry::new();
        registry.add_nominal(&s.processes, &s.categories, "smhtt", &s.era, "125").unwrap();
        let names: Vec<String> = registry.categories("mt").iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["mt_nobtag", "mt_btag"]);
        assert!(registry.categories("et").is_empty());

        let sealed = registry.seal();
        assert_eq!(sealed.len(), 6);
        assert_eq!(sealed.keys().next().unwrap().to_string(), "mt#mt_nobtag#ZTT#smhtt#Run2017#m_vis#125#nominal");
    }

    #[test]
    fn separator_in_a_key_field_is_rejected() {
        let s = setup();
        let ch = Arc::new(Channel::new("mt", Cuts::new()));
        let var = Variable::new("m_vis", "m_vis", Binning::Variable(vec![0.0, 50.0, 100.0])).unwrap();
        let hashed = Arc::new(Category::new("mt#btag", &ch, Cuts::new(), var).unwrap());
        let ztt = Arc::clone(s.processes.get("ZTT").unwrap());
        let mut registry = Registry::new();

        let request = Systematic::new(hashed, Arc::clone(&ztt), "smhtt", s.era.clone(), Shift::Nominal, "125");
        let err = registry.add(request).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("category name 'mt#btag'"));

        let request = Systematic::new(
            Arc::clone(&s.categories[0]),
            ztt,
            "smhtt",
            s.era.clone(),
            Variation::relabel("CMS#y", Direction::Up).into(),
            "125",
        );
        assert!(matches!(registry.add(request), Err(Error::Configuration(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn same_nick_different_estimation_conflicts() {
        #[derive(Debug)]
        struct FromFile(&'static str);
        impl Estimation for FromFile {
            fn name(&self) -> &str {
                "from_file"
            }
            fn materialize(&self, category: &Category, shift: &Shift) -> Result<Histogram> {
                Flat.materialize(category, shift)
            }
            fn list_source_files(&self) -> Result<Vec<PathBuf>> {
                Ok(vec![PathBuf::from(self.0)])
            }
        }

        let s = setup();
        let mut registry = Registry::new();
        let mut first = ProcessMap::new("mt");
        first.insert(Process::leaf("W", "W", Arc::new(FromFile("w_2017.json")))).unwrap();
        let mut second = ProcessMap::new("mt");
        second.insert(Process::leaf("W", "W", Arc::new(FromFile("w_2018.json")))).unwrap();
        let mut same = ProcessMap::new("mt");
        same.insert(Process::leaf("W", "W", Arc::new(FromFile("w_2017.json")))).unwrap();

        registry.add_nominal(&first, &s.categories, "smhtt", &s.era, "125").unwrap();
        assert_eq!(registry.add_nominal(&same, &s.categories, "smhtt", &s.era, "125").unwrap(), 0);
        let err = registry.add_nominal(&second, &s.categories, "smhtt", &s.era, "125").unwrap_err();
        assert!(matches!(err, Error::ConflictingRequest(_)));
        assert_eq!(registry.len(), 2);
    }
}
