//! Systematic uncertainty propagation
//!
//! Strategies book variation fills next to the nominal fills of each sample.
//! Once the nominal histogram of a variable is known, [`SystematicsProcessor`]
//! flushes every booked variation, asks each strategy for its covariance
//! contribution and combines them with the nominal statistical covariance.

mod detector;
mod multiverse;
mod normalisation;
mod weight_knob;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use faer::Mat;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::config::SystematicsConfig;
use super::deferred::{materialize_all, DeferredHistogram, WeightSpec};
use super::frame::SampleFrame;
use super::histogram::BinnedHistogram;
use super::result::VariableResult;
use super::variable::HistogramModel;

pub use detector::{detector_covariance, DetectorVariation};
pub use multiverse::{universe_covariance, Multiverse};
pub use normalisation::{normalisation_covariance, FlatNormalisation};
pub use weight_knob::{knob_covariance, WeightKnob};

/// Booked variation histograms: systematic key -> sample id -> histogram
#[derive(Debug, Default)]
pub struct VariationFutures {
    entries: BTreeMap<String, BTreeMap<String, DeferredHistogram>>,
}

impl VariationFutures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a histogram, replacing any earlier one for the same pair
    pub fn insert(&mut self, systematic: impl Into<String>, sample: impl Into<String>, histogram: DeferredHistogram) {
        self.entries
            .entry(systematic.into())
            .or_default()
            .insert(sample.into(), histogram);
    }

    pub fn get(&self, systematic: &str) -> Option<&BTreeMap<String, DeferredHistogram>> {
        self.entries.get(systematic)
    }

    /// Systematic keys in sorted order
    pub fn systematics(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of booked (systematic, sample) histograms
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Sum over samples for one systematic; `None` when nothing was booked.
    ///
    /// Pending entries are computed on the spot, so call [`flush`] first.
    ///
    /// [`flush`]: VariationFutures::flush
    pub fn total(&self, systematic: &str) -> Result<Option<BinnedHistogram>> {
        let Some(per_sample) = self.entries.get(systematic) else {
            return Ok(None);
        };
        let mut total: Option<BinnedHistogram> = None;
        for histogram in per_sample.values() {
            let resolved = histogram.resolve()?;
            total = Some(match total {
                Some(acc) => acc.add(&resolved)?,
                None => resolved,
            });
        }
        Ok(total)
    }

    /// Totals for keys that vary together, all built over the same samples.
    ///
    /// A simulated sample that is missing from any of `keys`, because its
    /// columns were absent or a fill failed, enters every total through its
    /// nominal histogram and so adds no spread. `None` when nothing was
    /// booked under any of the keys.
    pub fn matched_totals(&self, keys: &[String], result: &VariableResult) -> Result<Option<Vec<BinnedHistogram>>> {
        let booked: Vec<Option<&BTreeMap<String, DeferredHistogram>>> =
            keys.iter().map(|key| self.entries.get(key)).collect();
        if booked.iter().all(Option::is_none) {
            return Ok(None);
        }

        let mut samples: BTreeSet<&str> = result.samples.keys().map(String::as_str).collect();
        samples.extend(booked.iter().flatten().flat_map(|per_sample| per_sample.keys().map(String::as_str)));
        let (complete, incomplete): (Vec<&str>, Vec<&str>) = samples
            .into_iter()
            .partition(|sample| booked.iter().all(|per_sample| per_sample.is_some_and(|m| m.contains_key(*sample))));

        let mut base = BinnedHistogram::zeros(result.binning.clone());
        for sample in &incomplete {
            if let Some(nominal) = result.samples.get(*sample) {
                base = base.add(nominal)?;
            }
        }
        if !incomplete.is_empty() {
            warn!(
                first_key = keys.first().map(String::as_str).unwrap_or_default(),
                samples = ?incomplete,
                "variations incomplete for some samples, using their nominal histograms"
            );
        }

        let mut totals = Vec::with_capacity(keys.len());
        for per_sample in &booked {
            let mut total = base.clone();
            if let Some(per_sample) = per_sample {
                for sample in &complete {
                    if let Some(histogram) = per_sample.get(*sample) {
                        total = total.add(&histogram.resolve()?)?;
                    }
                }
            }
            totals.push(total);
        }
        Ok(Some(totals))
    }

    /// Materialise every pending histogram in one parallel pass.
    ///
    /// A histogram that fails is logged and removed, so it contributes nothing.
    pub fn flush(&mut self) {
        let keys: Vec<(String, String)> = self
            .entries
            .iter()
            .flat_map(|(systematic, per_sample)| {
                per_sample.keys().map(move |sample| (systematic.clone(), sample.clone()))
            })
            .collect();
        let pending: Vec<DeferredHistogram> = keys
            .iter()
            .filter_map(|(systematic, sample)| self.entries.get(systematic)?.get(sample).cloned())
            .collect();

        let mut failed = 0usize;
        for ((systematic, sample), outcome) in keys.into_iter().zip(materialize_all(&pending)) {
            let Some(per_sample) = self.entries.get_mut(&systematic) else {
                continue;
            };
            match outcome {
                Ok(resolved) => {
                    per_sample.insert(sample, resolved);
                }
                Err(e) => {
                    warn!(%systematic, %sample, error = %e, "variation failed to materialise, dropping it");
                    per_sample.remove(&sample);
                    failed += 1;
                }
            }
        }
        self.entries.retain(|_, per_sample| !per_sample.is_empty());
        debug!(histograms = self.len(), failed, "flushed variation histograms");
    }
}

/// Book one variation fill, logging instead of failing.
pub(crate) fn book_variation(
    futures: &Mutex<VariationFutures>,
    key: String,
    sample: &SampleFrame,
    model: &HistogramModel,
    weight: WeightSpec,
) {
    match sample.book_histogram(model.binning(), weight) {
        Ok(histogram) => lock(futures).insert(key, sample.id(), histogram),
        Err(e) => warn!(systematic = %key, sample = sample.id(), error = %e, "could not book variation"),
    }
}

/// `true` when every column is present; otherwise logs and returns `false`.
pub(crate) fn require_columns(sample: &SampleFrame, systematic: &str, columns: &[&str]) -> bool {
    for column in columns {
        match sample.has_column(column) {
            Ok(true) => {}
            Ok(false) => {
                warn!(systematic, sample = sample.id(), column, "column missing, skipping systematic");
                return false;
            }
            Err(e) => {
                warn!(systematic, sample = sample.id(), error = %e, "could not read schema, skipping systematic");
                return false;
            }
        }
    }
    true
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The closed set of systematic strategies
#[derive(Debug, Clone, PartialEq)]
pub enum SystematicStrategy {
    WeightKnob(WeightKnob),
    Multiverse(Multiverse),
    DetectorVariation(DetectorVariation),
    Normalisation(FlatNormalisation),
}

impl SystematicStrategy {
    pub fn name(&self) -> &str {
        match self {
            SystematicStrategy::WeightKnob(s) => s.name(),
            SystematicStrategy::Multiverse(s) => s.name(),
            SystematicStrategy::DetectorVariation(s) => s.name(),
            SystematicStrategy::Normalisation(s) => s.name(),
        }
    }

    /// Fixed keys this strategy books under; detector keys depend on the samples
    pub fn booking_keys(&self) -> Vec<String> {
        match self {
            SystematicStrategy::WeightKnob(s) => vec![s.up_key(), s.down_key()],
            SystematicStrategy::Multiverse(s) => s.universe_keys(),
            SystematicStrategy::DetectorVariation(_) | SystematicStrategy::Normalisation(_) => Vec::new(),
        }
    }

    /// Register this strategy's variation fills for one sample.
    ///
    /// Absent columns are logged and skipped.
    pub fn book_variations(&self, sample: &SampleFrame, model: &HistogramModel, futures: &Mutex<VariationFutures>) {
        match self {
            SystematicStrategy::WeightKnob(s) => s.book_variations(sample, model, futures),
            SystematicStrategy::Multiverse(s) => s.book_variations(sample, model, futures),
            SystematicStrategy::DetectorVariation(s) => s.book_variations(sample, model, futures),
            SystematicStrategy::Normalisation(_) => {}
        }
    }

    /// Covariance contribution, `n_bins x n_bins` of the nominal histogram
    pub fn compute_covariance(&self, result: &VariableResult, futures: &VariationFutures) -> Result<Mat<f64>> {
        match self {
            SystematicStrategy::WeightKnob(s) => s.compute_covariance(result, futures),
            SystematicStrategy::Multiverse(s) => s.compute_covariance(result, futures),
            SystematicStrategy::DetectorVariation(s) => s.compute_covariance(result, futures),
            SystematicStrategy::Normalisation(s) => Ok(s.compute_covariance(result)),
        }
    }

    /// Histograms worth exporting next to the covariance
    pub fn varied_histograms(
        &self,
        result: &VariableResult,
        futures: &VariationFutures,
    ) -> Result<Vec<(String, BinnedHistogram)>> {
        match self {
            SystematicStrategy::WeightKnob(s) => s.varied_histograms(result, futures),
            SystematicStrategy::Multiverse(s) => s.varied_histograms(result, futures),
            SystematicStrategy::DetectorVariation(s) => s.varied_histograms(result, futures),
            SystematicStrategy::Normalisation(_) => Ok(Vec::new()),
        }
    }
}

/// Owns the strategy set and the variations booked for the current variable
#[derive(Debug)]
pub struct SystematicsProcessor {
    strategies: Vec<SystematicStrategy>,
    futures: Mutex<VariationFutures>,
}

impl SystematicsProcessor {
    /// One strategy per configured knob and multiverse, plus the detector and
    /// normalisation strategies, which are always present.
    ///
    /// Fails when two strategies share a name or would book under the same key.
    pub fn new(config: &SystematicsConfig) -> Result<Self> {
        let mut strategies: Vec<SystematicStrategy> = config
            .knobs
            .iter()
            .map(|k| SystematicStrategy::WeightKnob(k.into()))
            .collect();
        strategies.extend(
            config
                .multiverses
                .iter()
                .map(|m| SystematicStrategy::Multiverse(m.into())),
        );
        strategies.push(SystematicStrategy::DetectorVariation((&config.detector).into()));
        strategies.push(SystematicStrategy::Normalisation((&config.normalisation).into()));
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<SystematicStrategy>) -> Result<Self> {
        check_keys(&strategies)?;
        Ok(Self {
            strategies,
            futures: Mutex::new(VariationFutures::new()),
        })
    }

    pub fn strategies(&self) -> &[SystematicStrategy] {
        &self.strategies
    }

    /// Number of variation histograms booked and not yet processed
    pub fn booked(&self) -> usize {
        lock(&self.futures).len()
    }

    /// Drop booked variations without evaluating them
    pub fn discard_booked(&self) {
        let mut futures = lock(&self.futures);
        if !futures.is_empty() {
            debug!(histograms = futures.len(), "discarding booked variations");
            futures.clear();
        }
    }

    /// Book every strategy's variations for one sample.
    pub fn book_systematics(&self, sample: &SampleFrame, model: &HistogramModel) {
        for strategy in &self.strategies {
            strategy.book_variations(sample, model, &self.futures);
        }
    }

    /// Evaluate all booked variations and fill the covariance fields of `result`.
    ///
    /// Strategy failures and covariances whose dimension does not match the
    /// nominal histogram are logged and left out of the total. The booked
    /// variations are cleared afterwards.
    pub fn process_systematics(&self, result: &mut VariableResult) -> Result<()> {
        let mut futures = std::mem::take(&mut *lock(&self.futures));
        futures.flush();

        let covariances: Mutex<BTreeMap<String, Mat<f64>>> = Mutex::new(BTreeMap::new());
        let shared: &VariableResult = result;
        self.strategies.par_iter().for_each(|strategy| {
            match strategy.compute_covariance(shared, &futures) {
                Ok(cov) => {
                    lock(&covariances).insert(strategy.name().to_string(), cov);
                }
                Err(e) => warn!(systematic = strategy.name(), error = %e, "covariance failed, skipping"),
            }
        });

        let mut varied = BTreeMap::new();
        for strategy in &self.strategies {
            match strategy.varied_histograms(shared, &futures) {
                Ok(histograms) => varied.extend(histograms),
                Err(e) => warn!(systematic = strategy.name(), error = %e, "could not build varied histograms"),
            }
        }

        let covariances = covariances.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let n = result.nominal.n_bins();
        let mut total = result.nominal.covariance().clone();
        for (name, cov) in &covariances {
            if cov.nrows() != n || cov.ncols() != n {
                warn!(
                    systematic = %name,
                    rows = cov.nrows(),
                    cols = cov.ncols(),
                    bins = n,
                    "covariance dimension mismatch, excluded from total"
                );
                continue;
            }
            total = &total + cov;
        }

        result.nominal_with_band = result.nominal.with_covariance(total.clone())?;
        result.total_covariance = total;
        result.covariances = covariances;
        result.varied = varied;

        futures.clear();
        info!(
            variable = %result.variable,
            systematics = result.covariances.len(),
            "systematics processed"
        );
        Ok(())
    }
}

/// Every strategy name is unique and no two strategies share a booking key.
fn check_keys(strategies: &[SystematicStrategy]) -> Result<()> {
    let mut names = BTreeSet::new();
    for strategy in strategies {
        if !names.insert(strategy.name()) {
            return Err(Error::InvalidInput(format!(
                "systematic name '{}' is used more than once",
                strategy.name()
            )));
        }
    }

    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for strategy in strategies {
        for key in strategy.booking_keys() {
            if let Some(other) = owners.insert(key.clone(), strategy.name()) {
                return Err(Error::InvalidInput(format!(
                    "systematics '{}' and '{}' both book '{}'",
                    other,
                    strategy.name(),
                    key
                )));
            }
        }
    }

    // Detector keys are open-ended, so reserve the whole prefix
    for strategy in strategies {
        if let SystematicStrategy::DetectorVariation(detector) = strategy {
            let prefix = detector.variant_key("");
            if let Some((key, owner)) = owners.iter().find(|(key, _)| key.starts_with(&prefix)) {
                return Err(Error::InvalidInput(format!(
                    "systematic '{}' books '{}', which clashes with detector variants of '{}'",
                    owner,
                    key,
                    detector.name()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::binning::BinningDefinition;
    use crate::pipeline::config::{KnobConfig, MultiverseConfig};
    use crate::pipeline::frame::SampleOrigin;
    use polars::prelude::*;

    fn binning() -> BinningDefinition {
        BinningDefinition::new(vec![0.0, 1.0, 2.0], "x", "x").unwrap()
    }

    #[test]
    fn test_processor_always_has_detector_and_normalisation() {
        let config = SystematicsConfig {
            knobs: vec![KnobConfig {
                name: "xsec".into(),
                up: "u".into(),
                down: "d".into(),
            }],
            multiverses: vec![MultiverseConfig {
                name: "flux".into(),
                column: "fw".into(),
                universes: 5,
                retain_universes: false,
            }],
            ..Default::default()
        };
        let processor = SystematicsProcessor::new(&config).unwrap();
        let names: Vec<&str> = processor.strategies().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["xsec", "flux", "detector", "normalisation"]);
    }

    #[test]
    fn test_futures_flush_and_total() {
        let df = df! { "x" => [0.5f64, 1.5], "w" => [1.0f64, 2.0] }.unwrap();
        let a = SampleFrame::new("a", SampleOrigin::MonteCarlo, df.clone().lazy());
        let b = SampleFrame::new("b", SampleOrigin::MonteCarlo, df.lazy()).with_scale(0.5);

        let mut futures = VariationFutures::new();
        futures.insert("k_up", "a", a.book_histogram(&binning(), WeightSpec::nominal("w")).unwrap());
        futures.insert("k_up", "b", b.book_histogram(&binning(), WeightSpec::nominal("w")).unwrap());
        assert_eq!(futures.len(), 2);

        futures.flush();
        assert!(futures.get("k_up").unwrap().values().all(|h| !h.is_pending()));
        let total = futures.total("k_up").unwrap().unwrap();
        assert_eq!(total.counts(), &[1.5, 3.0]);
        assert!(futures.total("missing").unwrap().is_none());

        futures.clear();
        assert!(futures.is_empty());
    }

    #[test]
    fn test_flush_drops_failed_variations() {
        let df = df! { "x" => [0.5f64], "w" => [1.0f64] }.unwrap();
        // The weight column is dropped after booking, so the fill fails
        let lf = df.lazy();
        let broken = SampleFrame::new("bad", SampleOrigin::MonteCarlo, lf.clone().select([col("x")]));
        let good = SampleFrame::new("good", SampleOrigin::MonteCarlo, lf);

        let mut futures = VariationFutures::new();
        let kind = crate::pipeline::frame::ColumnKind::Scalar(DataType::Float64);
        let source = crate::pipeline::deferred::FillSource::new(
            "bad",
            broken.lazy(),
            "x",
            kind,
            WeightSpec::nominal("w"),
        );
        futures.insert(
            "k_up",
            "bad",
            DeferredHistogram::pending(crate::pipeline::deferred::HistogramFuture::new(binning(), source)),
        );
        futures.insert("k_up", "good", good.book_histogram(&binning(), WeightSpec::nominal("w")).unwrap());

        futures.flush();
        assert_eq!(futures.len(), 1);
        assert_eq!(futures.total("k_up").unwrap().unwrap().counts(), &[1.0, 0.0]);
    }

    fn failing_fill(df: &DataFrame, id: &str) -> DeferredHistogram {
        // The weight column is gone by the time the fill runs
        let source = crate::pipeline::deferred::FillSource::new(
            id,
            df.clone().lazy().select([col("x")]),
            "x",
            crate::pipeline::frame::ColumnKind::Scalar(DataType::Float64),
            WeightSpec::nominal("w"),
        );
        DeferredHistogram::pending(crate::pipeline::deferred::HistogramFuture::new(binning(), source))
    }

    #[test]
    fn test_failed_up_fill_uses_nominal_on_both_sides() {
        let a_df = df! { "x" => [0.5f64], "w" => [1.0f64] }.unwrap();
        let b_df = df! { "x" => [1.5f64], "w" => [2.0f64] }.unwrap();
        let a = SampleFrame::new("a", SampleOrigin::MonteCarlo, a_df.lazy());
        let b = SampleFrame::new("b", SampleOrigin::MonteCarlo, b_df.clone().lazy());
        let fill = |s: &SampleFrame| s.book_histogram(&binning(), WeightSpec::nominal("w")).unwrap();

        let nominal_a = fill(&a).resolve().unwrap();
        let nominal_b = fill(&b).resolve().unwrap();
        let mut result = VariableResult::new("r", "x", nominal_a.add(&nominal_b).unwrap());
        result.samples.insert("a".into(), nominal_a);
        result.samples.insert("b".into(), nominal_b);

        let mut futures = VariationFutures::new();
        futures.insert("xsec_up", "a", fill(&a).scaled(1.2));
        futures.insert("xsec_down", "a", fill(&a).scaled(0.8));
        futures.insert("xsec_up", "b", failing_fill(&b_df, "b"));
        futures.insert("xsec_down", "b", fill(&b).scaled(0.5));
        futures.flush();
        assert_eq!(futures.len(), 3);

        let knob = WeightKnob::new("xsec", "u", "d");
        let cov = knob.compute_covariance(&result, &futures).unwrap();
        assert!((cov[(0, 0)] - 0.04).abs() < 1e-12);
        assert_eq!(cov[(1, 1)], 0.0);

        let varied = knob.varied_histograms(&result, &futures).unwrap();
        assert_eq!(varied[0].0, "xsec_up");
        assert_eq!(varied[1].1.counts()[1], 2.0);
    }

    #[test]
    fn test_matched_totals_without_bookings() {
        let result = VariableResult::new("r", "x", BinnedHistogram::zeros(binning()));
        let futures = VariationFutures::new();
        let keys = vec!["flux_0".to_string(), "flux_1".to_string()];
        assert!(futures.matched_totals(&keys, &result).unwrap().is_none());
    }

    #[test]
    fn test_clashing_names_are_rejected() {
        let knob = |name: &str| SystematicStrategy::WeightKnob(WeightKnob::new(name, "u", "d"));
        let flux = SystematicStrategy::Multiverse(Multiverse::new("flux", "fw", 3));
        let detector = SystematicStrategy::DetectorVariation(DetectorVariation::new("detector", "CV"));

        assert!(SystematicsProcessor::with_strategies(vec![flux.clone(), knob("flux")]).is_err());
        assert!(SystematicsProcessor::with_strategies(vec![detector.clone(), knob("detector/alt")]).is_err());
        assert!(SystematicsProcessor::with_strategies(vec![flux, detector, knob("xsec")]).is_ok());

        let config = SystematicsConfig {
            knobs: vec![KnobConfig {
                name: "normalisation".into(),
                up: "u".into(),
                down: "d".into(),
            }],
            ..Default::default()
        };
        assert!(SystematicsProcessor::new(&config).is_err());
    }

    #[test]
    fn test_discard_booked() {
        let df = df! { "x" => [0.5f64], "w" => [1.0f64] }.unwrap();
        let alt = SampleFrame::new("alt", SampleOrigin::DetectorVariation { variant: "alt".into() }, df.lazy());
        let processor = SystematicsProcessor::new(&SystematicsConfig::default()).unwrap();
        let model = HistogramModel::new(binning(), "w");
        processor.book_systematics(&alt, &model);
        assert_eq!(processor.booked(), 1);
        processor.discard_booked();
        assert_eq!(processor.booked(), 0);
    }
}
