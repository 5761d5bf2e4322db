use std::time::Duration;

use crate::demand::ContainerRequest;
use crate::gpu::Gpu;
use crate::metrics::{MetricCache, MetricKind};

/// Extender contract clamp (spec.md §4.3): a node that cannot host the pod
/// must never reach `Score` — it is filtered first. Defensively, scoring
/// returns `SCORE_MIN` on any lookup failure.
pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 10;

/// How long a metric sample stays usable before it's treated as absent.
pub const DEFAULT_ACTIVE_DURATION: Duration = Duration::from_secs(30);

/// Scoring policy, expressed as a tagged variant rather than a trait
/// object hierarchy — matches the teacher's `Provider` enum-of-variants
/// dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rater {
    /// Prefer GPUs with *smaller* residual after placement — concentrate load.
    BinPack,
    /// Prefer GPUs with *larger* residual after placement — level load.
    Spread,
}

impl Rater {
    /// Per-GPU score for placing `req` on `gpu`, given the residual that
    /// would remain after placement. Caller guarantees `gpu.fits(req)`.
    pub fn gpu_score(&self, gpu: &Gpu, req: &ContainerRequest) -> i64 {
        let residual_core = gpu.residual_core().saturating_sub(req.core_percent);
        let residual_memory = gpu.residual_memory().saturating_sub(req.memory_mib);
        // Normalise residual core to 0..=SCORE_MAX so memory (MiB-scale)
        // doesn't dominate the sum; both terms are on the same 0..=MAX scale.
        let core_component = (residual_core as i64 * SCORE_MAX) / gpu.total_core.max(1) as i64;
        let memory_component =
            (residual_memory as i64 * SCORE_MAX) / gpu.total_memory.max(1) as i64;
        let combined = (core_component + memory_component) / 2;
        match self {
            Rater::BinPack => SCORE_MAX - combined.clamp(SCORE_MIN, SCORE_MAX),
            Rater::Spread => combined.clamp(SCORE_MIN, SCORE_MAX),
        }
    }

    /// Per-node score: the sum of per-GPU scores for each container's
    /// chosen GPU, clamped to the extender contract range.
    pub fn node_score(&self, placements: &[(&Gpu, &ContainerRequest)]) -> i64 {
        let total: i64 = placements.iter().map(|(g, r)| self.gpu_score(g, r)).sum();
        total.clamp(SCORE_MIN, SCORE_MAX)
    }

    /// Pick the best-scoring GPU among `candidates` for `req`, ties broken
    /// by lower index (stable order of `candidates`).
    pub fn pick_best<'a>(&self, candidates: &[&'a Gpu], req: &ContainerRequest) -> Option<&'a Gpu> {
        candidates
            .iter()
            .copied()
            .max_by_key(|g| (self.gpu_score(g, req), std::cmp::Reverse(g.index)))
    }
}

/// Wraps a base `Rater` and penalises the node score linearly in recent
/// average core%/mem% utilisation read from the metric cache.
///
/// A sample is usable only if it's within `active_duration`; stale or
/// missing samples never reject a node, they simply drop out of the
/// average (spec.md §4.3).
pub struct LoadAwareRater<'a> {
    pub inner: Rater,
    pub cache: &'a MetricCache,
    pub active_duration: Duration,
}

impl<'a> LoadAwareRater<'a> {
    pub fn new(inner: Rater, cache: &'a MetricCache, active_duration: Duration) -> Self {
        Self {
            inner,
            cache,
            active_duration,
        }
    }

    pub fn gpu_score(&self, gpu: &Gpu, req: &ContainerRequest) -> i64 {
        self.inner.gpu_score(gpu, req)
    }

    /// Node score weighted by live utilisation: `base * (1 - avg_util/100)`.
    /// If every sample for this node is stale/missing, the load term is
    /// neutral (multiplier 1.0) and the result equals the base score —
    /// this is invariant 7 from spec.md §8.
    pub fn node_score(&self, node: &str, placements: &[(&Gpu, &ContainerRequest)]) -> i64 {
        let base = self.inner.node_score(placements);

        let mut samples = Vec::new();
        for (gpu, _) in placements {
            let (core_fresh, core_v) =
                self.cache
                    .get_usage(node, MetricKind::Core, gpu.index, self.active_duration);
            if core_fresh {
                samples.push(core_v);
            }
            let (mem_fresh, mem_v) =
                self.cache
                    .get_usage(node, MetricKind::Memory, gpu.index, self.active_duration);
            if mem_fresh {
                samples.push(mem_v);
            }
        }

        if samples.is_empty() {
            return base;
        }

        let avg_util: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let multiplier = (1.0 - (avg_util / 100.0)).clamp(0.0, 1.0);
        ((base as f64) * multiplier).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(core: u32, mem: u32) -> ContainerRequest {
        ContainerRequest {
            core_percent: core,
            memory_mib: mem,
        }
    }

    #[test]
    fn binpack_prefers_fuller_gpu() {
        let mut empty = Gpu::new(0, 100, 16384);
        let mut half = Gpu::new(1, 100, 16384);
        half.commit(50, 8192).unwrap();
        let r = req(10, 1024);
        let empty_score = Rater::BinPack.gpu_score(&empty, &r);
        let half_score = Rater::BinPack.gpu_score(&half, &r);
        assert!(half_score > empty_score, "{half_score} should beat {empty_score}");
        // sanity: commit doesn't get reused below, silence unused-mut warnings
        empty.commit(0, 0).unwrap();
    }

    #[test]
    fn spread_prefers_emptier_gpu() {
        let empty = Gpu::new(0, 100, 16384);
        let mut half = Gpu::new(1, 100, 16384);
        half.commit(50, 8192).unwrap();
        let r = req(10, 1024);
        let empty_score = Rater::Spread.gpu_score(&empty, &r);
        let half_score = Rater::Spread.gpu_score(&half, &r);
        assert!(empty_score > half_score);
    }

    #[test]
    fn pick_best_ties_break_to_lower_index() {
        let gpus = vec![Gpu::new(0, 100, 16384), Gpu::new(1, 100, 16384)];
        let refs: Vec<&Gpu> = gpus.iter().collect();
        let best = Rater::BinPack.pick_best(&refs, &req(10, 1024)).unwrap();
        assert_eq!(best.index, 0);
    }

    #[test]
    fn scores_never_exceed_contract_range() {
        let empty = Gpu::new(0, 100, 16384);
        let r = req(1, 1);
        for rater in [Rater::BinPack, Rater::Spread] {
            let s = rater.node_score(&[(&empty, &r), (&empty, &r), (&empty, &r)]);
            assert!((SCORE_MIN..=SCORE_MAX).contains(&s));
        }
    }

    #[test]
    fn load_aware_with_stale_metrics_equals_base_score() {
        let cache = MetricCache::new();
        let gpu = Gpu::new(0, 100, 16384);
        let r = req(10, 1024);
        let placements = [(&gpu, &r)];
        let base = Rater::BinPack.node_score(&placements);
        let aware = LoadAwareRater::new(Rater::BinPack, &cache, DEFAULT_ACTIVE_DURATION);
        assert_eq!(aware.node_score("node-a", &placements), base);
    }

    #[test]
    fn load_aware_penalises_busy_node() {
        let cache = MetricCache::new();
        cache.add_core_usage("node-a", 0, 90.0);
        cache.add_memory_usage("node-a", 0, 90.0);
        let gpu = Gpu::new(0, 100, 16384);
        let r = req(10, 1024);
        let placements = [(&gpu, &r)];
        let base = Rater::BinPack.node_score(&placements);
        let aware = LoadAwareRater::new(Rater::BinPack, &cache, DEFAULT_ACTIVE_DURATION);
        let loaded = aware.node_score("node-a", &placements);
        assert!(loaded <= base);
    }
}
