use std::collections::HashMap;

use k8s_openapi::api::core::v1::Node;

use crate::demand::Demand;
use crate::error::{DealerError, DealerResult};
use crate::gpu::Gpu;
use crate::plan::Plan;
use crate::rater::{Rater, SCORE_MAX, SCORE_MIN};

/// Node label/extended-resource keys used to size a node's GPU inventory
/// on first reference (spec.md §6 Node capacity contract).
pub const GPU_COUNT_LABEL: &str = "gpu.dealer/gpu-count";
pub const GPU_CORE_CAPACITY_LABEL: &str = "gpu.dealer/gpu-core-total";
pub const GPU_MEMORY_CAPACITY_LABEL: &str = "gpu.dealer/gpu-memory-mib";

/// The dealer's authoritative in-memory view of one node's GPUs and
/// commitments. Created lazily on first reference (see `Dealer`), never
/// destroyed during a process lifetime.
#[derive(Clone)]
pub struct NodeInfo {
    pub name: String,
    pub gpus: Vec<Gpu>,
    /// Tentative plans keyed by pod UID, pending Bind. Reentrant: a new
    /// `assume` for a UID already present here first reverts and replaces
    /// the prior attempt.
    tentative: HashMap<String, (Plan, Demand)>,
}

impl NodeInfo {
    pub fn new(name: String, gpus: Vec<Gpu>) -> Self {
        Self {
            name,
            gpus,
            tentative: HashMap::new(),
        }
    }

    /// Parse a node's GPU capacity from its labels (spec.md §6). A node
    /// with no GPU labels is seeded with zero GPUs — it simply never
    /// fits any GPU-bearing demand.
    pub fn from_node_object(node: &Node) -> DealerResult<NodeInfo> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| DealerError::Invariant("node object missing name".to_string()))?;

        let labels = node.metadata.labels.clone().unwrap_or_default();
        let gpu_count: usize = labels
            .get(GPU_COUNT_LABEL)
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| DealerError::Invariant(format!("node {name}: non-numeric {GPU_COUNT_LABEL}")))?
            .unwrap_or(0);
        let core_total: u32 = labels
            .get(GPU_CORE_CAPACITY_LABEL)
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| {
                DealerError::Invariant(format!("node {name}: non-numeric {GPU_CORE_CAPACITY_LABEL}"))
            })?
            .unwrap_or(100);
        let memory_total: u32 = labels
            .get(GPU_MEMORY_CAPACITY_LABEL)
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| {
                DealerError::Invariant(format!(
                    "node {name}: non-numeric {GPU_MEMORY_CAPACITY_LABEL}"
                ))
            })?
            .unwrap_or(0);

        let gpus = (0..gpu_count)
            .map(|i| Gpu::new(i, core_total, memory_total))
            .collect();

        Ok(NodeInfo::new(name, gpus))
    }

    fn clear_tentative(&mut self, pod_uid: &str) -> DealerResult<()> {
        if let Some((plan, demand)) = self.tentative.remove(pod_uid) {
            for (idx, req) in plan.gpu_indices.iter().zip(demand.requests.iter()) {
                self.gpus[*idx].revert(req.core_percent, req.memory_mib)?;
            }
        }
        Ok(())
    }

    /// Greedy per-container fit with whole-pod rollback on partial
    /// failure (spec.md §4.2). Each container's candidate set excludes
    /// GPUs already chosen earlier in the same pod — two containers of
    /// one pod never land on the same card (resolved Open Question, §9).
    ///
    /// On success, every chosen GPU's counters are left committed; the
    /// caller decides whether to keep them (Assume) or revert them
    /// (dry-run Score).
    fn fit(&mut self, demand: &Demand, rater: Rater) -> DealerResult<(Plan, i64)> {
        let mut chosen: Vec<usize> = Vec::with_capacity(demand.len());
        let mut score_sum: i64 = 0;

        for req in &demand.requests {
            let candidates: Vec<&Gpu> = self
                .gpus
                .iter()
                .filter(|g| !chosen.contains(&g.index) && g.fits(req.core_percent, req.memory_mib))
                .collect();

            let Some(best) = rater.pick_best(&candidates, req) else {
                let (bad_idx, reason) = self.describe_failure(&chosen, req);
                for (idx, prior_req) in chosen.iter().zip(demand.requests.iter()) {
                    self.gpus[*idx].revert(prior_req.core_percent, prior_req.memory_mib)?;
                }
                return Err(DealerError::InsufficientResource {
                    gpu_index: bad_idx,
                    reason,
                });
            };

            let idx = best.index;
            score_sum += rater.gpu_score(best, req);
            self.gpus[idx].commit(req.core_percent, req.memory_mib)?;
            chosen.push(idx);
        }

        let plan = Plan {
            gpu_indices: chosen,
        };
        Ok((plan, score_sum.clamp(SCORE_MIN, SCORE_MAX)))
    }

    /// Best-effort diagnosis of why no GPU could host `req`, for the
    /// human-readable filter rejection reason (spec.md §7).
    fn describe_failure(&self, chosen: &[usize], req: &crate::demand::ContainerRequest) -> (usize, String) {
        let candidate = self
            .gpus
            .iter()
            .filter(|g| !chosen.contains(&g.index))
            .max_by_key(|g| g.residual_core() as i64 + g.residual_memory() as i64);

        match candidate {
            Some(g) if g.residual_core() < req.core_percent => {
                (g.index, format!("gpu core insufficient on card {}", g.index))
            }
            Some(g) => (
                g.index,
                format!("gpu memory insufficient on card {}", g.index),
            ),
            None => (usize::MAX, "no gpu available on node".to_string()),
        }
    }

    /// Tentative placement pending Bind. Clears any previous tentative
    /// plan for this pod before retrying (reentrant).
    pub fn assume(&mut self, pod_uid: &str, demand: &Demand, rater: Rater) -> DealerResult<()> {
        self.clear_tentative(pod_uid)?;
        let before: Vec<(u32, u32)> = self.gpus.iter().map(|g| (g.committed_core(), g.committed_memory())).collect();
        match self.fit(demand, rater) {
            Ok((plan, _score)) => {
                self.tentative.insert(pod_uid.to_string(), (plan, demand.clone()));
                Ok(())
            }
            Err(err) => {
                debug_assert!(self.committed_matches(&before));
                Err(err)
            }
        }
    }

    fn committed_matches(&self, before: &[(u32, u32)]) -> bool {
        self.gpus
            .iter()
            .zip(before.iter())
            .all(|(g, (c, m))| g.committed_core() == *c && g.committed_memory() == *m)
    }

    /// Dry-run fit: computes the score without retaining any commitment.
    /// Returns `SCORE_MIN` if the demand doesn't fit.
    pub fn score(&mut self, demand: &Demand, rater: Rater) -> (i64, Option<Plan>) {
        match self.fit(demand, rater) {
            Ok((plan, score)) => {
                for (idx, req) in plan.gpu_indices.iter().zip(demand.requests.iter()) {
                    // Dry run: revert what fit() committed before returning.
                    self.gpus[*idx]
                        .revert(req.core_percent, req.memory_mib)
                        .expect("score dry-run revert must succeed, fit() just committed this exact amount");
                }
                (score, Some(plan))
            }
            Err(_) => (SCORE_MIN, None),
        }
    }

    /// Promotes the tentative plan for `pod_uid` to a bound plan. The
    /// commitment stays on the GPUs; only the *tentative* bookkeeping is
    /// dropped — from here on the Dealer's `PodMaps` entry is what lets a
    /// later `Release` find the committed amounts again.
    pub fn bind(&mut self, pod_uid: &str) -> DealerResult<Plan> {
        self.tentative
            .remove(pod_uid)
            .map(|(plan, _)| plan)
            .ok_or_else(|| {
                DealerError::Invariant(format!("bind called with no tentative plan for {pod_uid}"))
            })
    }

    /// Commits counters from an already-decided Plan (informer-driven
    /// reconciliation: seeding and `Dealer::allocate`).
    pub fn allocate(&mut self, plan: &Plan, demand: &Demand) -> DealerResult<()> {
        plan.validate_indices(self.gpus.len())?;
        if plan.len() != demand.len() {
            return Err(DealerError::Invariant(format!(
                "plan length {} != demand length {}",
                plan.len(),
                demand.len()
            )));
        }
        for (idx, req) in plan.gpu_indices.iter().zip(demand.requests.iter()) {
            self.gpus[*idx].commit(req.core_percent, req.memory_mib)?;
        }
        Ok(())
    }

    /// Reverse of allocate: subtracts counters.
    pub fn release(&mut self, plan: &Plan, demand: &Demand) -> DealerResult<()> {
        for (idx, req) in plan.gpu_indices.iter().zip(demand.requests.iter()) {
            self.gpus[*idx].revert(req.core_percent, req.memory_mib)?;
        }
        Ok(())
    }

    pub fn total_committed_core(&self) -> u32 {
        self.gpus.iter().map(|g| g.committed_core()).sum()
    }

    pub fn total_committed_memory(&self) -> u32 {
        self.gpus.iter().map(|g| g.committed_memory()).sum()
    }
}
