use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::demand::{Demand, GPU_ASSUME_LABEL};
use crate::error::{DealerError, DealerResult};
use crate::gpu::Gpu;
use crate::metrics::MetricCache;
use crate::node::NodeInfo;
use crate::plan::Plan;
use crate::rater::{LoadAwareRater, Rater, SCORE_MIN};
use crate::workerpool::{self, ASSUME_FANOUT_WIDTH};

/// What the dealer remembers about a pod it has committed resources to
/// (spec.md §3 `PodMaps`).
#[derive(Clone)]
struct PodRecord {
    node: String,
    plan: Plan,
    demand: Demand,
}

struct DealerState {
    /// node name -> authoritative in-memory inventory.
    nodes: HashMap<String, NodeInfo>,
    /// pod UID -> last-committed record.
    pod_maps: HashMap<String, PodRecord>,
    /// pod UIDs released but not yet forgotten (tombstone for idempotence).
    released: HashSet<String>,
}

impl DealerState {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            pod_maps: HashMap::new(),
            released: HashSet::new(),
        }
    }
}

/// Process-wide registry of nodes and known pods. Every public operation
/// takes the single process-wide lock on entry and releases it on exit —
/// the central design choice of this crate (spec.md §5): simplicity and
/// correctness over throughput. A later optimisation could shard the lock
/// by node; this implementation deliberately starts (and stays) with one.
pub struct Dealer {
    state: tokio::sync::Mutex<DealerState>,
    cluster: Arc<dyn ClusterApi>,
}

impl Dealer {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            state: tokio::sync::Mutex::new(DealerState::new()),
            cluster,
        }
    }

    /// Resolve `name`'s `NodeInfo`, seeding it from the cluster object on
    /// first reference. Because the whole operation runs under the single
    /// Dealer mutex (already held by the caller), two concurrent
    /// first-references to the same node cannot race each other — the
    /// mutex itself is the coalescing mechanism a more finely-sharded
    /// implementation would need a per-node `OnceCell` to recover.
    async fn ensure_node(&self, state: &mut DealerState, name: &str) -> DealerResult<()> {
        if state.nodes.contains_key(name) {
            return Ok(());
        }

        let node_obj = self.cluster.get_node(name).await?;
        let mut info = NodeInfo::from_node_object(&node_obj)?;

        let pods = self.cluster.list_pods_on_node(name).await.unwrap_or_default();
        let mut replayed = Vec::new();
        for pod in pods.into_iter().filter(is_gpu_assumed) {
            match replay_pod_onto_node(&mut info, &pod) {
                Ok(Some((uid, plan, demand))) => replayed.push((uid, plan, demand)),
                Ok(None) => {} // not a GPU pod, nothing to record
                Err(err) => {
                    let pod_name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
                    warn!(node = name, pod = pod_name, %err, "failed to replay pod during node seeding");
                }
            }
        }

        info!(node = name, gpus = info.gpus.len(), "seeded node");
        state.nodes.insert(name.to_string(), info);
        // Same bookkeeping Dealer::allocate uses: every replayed pod lands in PodMaps.
        for (uid, plan, demand) in replayed {
            state.pod_maps.insert(
                uid.clone(),
                PodRecord {
                    node: name.to_string(),
                    plan,
                    demand,
                },
            );
            state.released.remove(&uid);
        }
        Ok(())
    }

    /// Build candidate placements, dispatched over a bounded W=4 worker
    /// fan-out (spec.md §5). Node-resolution errors are per-node filter
    /// failures, never a global error.
    pub async fn assume(
        &self,
        node_names: &[String],
        pod: &Pod,
        rater: Rater,
    ) -> (Vec<bool>, Vec<Option<DealerError>>) {
        let mut oks = vec![false; node_names.len()];
        let mut errs: Vec<Option<DealerError>> = node_names.iter().map(|_| None).collect();

        let demand = match Demand::from_pod(pod) {
            Ok(d) => d,
            Err(DealerError::MalformedPod(msg)) => {
                for slot in errs.iter_mut() {
                    *slot = Some(DealerError::MalformedPod(msg.clone()));
                }
                return (oks, errs);
            }
            Err(other) => {
                for slot in errs.iter_mut() {
                    *slot = Some(DealerError::Invariant(other.to_string()));
                }
                return (oks, errs);
            }
        };

        let Some(pod_uid) = pod.metadata.uid.clone() else {
            for slot in errs.iter_mut() {
                *slot = Some(DealerError::MalformedPod("pod missing uid".to_string()));
            }
            return (oks, errs);
        };

        if demand.is_empty() {
            // Not a GPU pod — nothing for this dealer to fit.
            oks.iter_mut().for_each(|ok| *ok = true);
            return (oks, errs);
        }

        let mut state = self.state.lock().await;

        let mut ready: Vec<(usize, String, NodeInfo)> = Vec::new();
        for (i, name) in node_names.iter().enumerate() {
            match self.ensure_node(&mut state, name).await {
                Ok(()) => {
                    let info = state.nodes.remove(name).expect("just ensured");
                    ready.push((i, name.clone(), info));
                }
                Err(err) => errs[i] = Some(err),
            }
        }

        let results = workerpool::run_bounded(ready, ASSUME_FANOUT_WIDTH, |_idx, (i, name, mut info)| {
            let demand = demand.clone();
            let pod_uid = pod_uid.clone();
            async move {
                let result = info.assume(&pod_uid, &demand, rater);
                (i, name, info, result)
            }
        })
        .await;

        for (i, name, info, result) in results {
            state.nodes.insert(name, info);
            match result {
                Ok(()) => oks[i] = true,
                Err(err) => errs[i] = Some(err),
            }
        }

        (oks, errs)
    }

    /// Sequential per-node scoring; a missing/unresolvable node scores
    /// `SCORE_MIN` rather than erroring the whole request.
    pub async fn score(
        &self,
        node_names: &[String],
        pod: &Pod,
        rater: Rater,
        load_aware: Option<(&MetricCache, Duration)>,
    ) -> Vec<i64> {
        let demand = match Demand::from_pod(pod) {
            Ok(d) => d,
            Err(_) => return vec![SCORE_MIN; node_names.len()],
        };
        if demand.is_empty() {
            return vec![SCORE_MIN; node_names.len()];
        }

        let mut state = self.state.lock().await;
        let mut scores = Vec::with_capacity(node_names.len());

        for name in node_names {
            if self.ensure_node(&mut state, name).await.is_err() {
                scores.push(SCORE_MIN);
                continue;
            }
            let info = state.nodes.get_mut(name).expect("just ensured");
            let (base_score, plan) = info.score(&demand, rater);
            let score = match (plan, load_aware) {
                (Some(plan), Some((cache, active_duration))) => {
                    let placements: Vec<(&Gpu, &crate::demand::ContainerRequest)> = plan
                        .gpu_indices
                        .iter()
                        .zip(demand.requests.iter())
                        .map(|(&idx, req)| (&info.gpus[idx], req))
                        .collect();
                    LoadAwareRater::new(rater, cache, active_duration).node_score(name, &placements)
                }
                _ => base_score,
            };
            scores.push(score);
        }

        scores
    }

    /// Promotes a node's tentative plan to bound, writes the plan onto
    /// the pod's annotations, issues a Binding, and records the pod.
    ///
    /// Retries the pod-update exactly once on an optimistic-concurrency
    /// conflict; any other failure is surfaced to the caller (the
    /// upstream source swallows this — treated here as a bug, per
    /// spec.md §9).
    pub async fn bind(&self, node: &str, pod: &Pod) -> DealerResult<Plan> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| DealerError::MalformedPod("pod missing name".to_string()))?;
        let uid = pod
            .metadata
            .uid
            .clone()
            .ok_or_else(|| DealerError::MalformedPod("pod missing uid".to_string()))?;
        let demand = Demand::from_pod(pod)?;

        let mut state = self.state.lock().await;
        self.ensure_node(&mut state, node).await?;
        let info = state.nodes.get_mut(node).expect("just ensured");
        let plan = info.bind(&uid)?;
        drop(state);

        let annotation_value = plan.to_annotation();
        let patch_result = self
            .cluster
            .patch_pod_plan_annotation(&namespace, &name, &annotation_value)
            .await;
        match patch_result {
            Ok(_) => {}
            Err(DealerError::ConflictRetry) => {
                // retry exactly once
                self.cluster
                    .patch_pod_plan_annotation(&namespace, &name, &annotation_value)
                    .await?;
            }
            Err(err) => return Err(err),
        }

        self.cluster.create_binding(&namespace, &name, node).await?;

        let mut state = self.state.lock().await;
        state.pod_maps.insert(
            uid.clone(),
            PodRecord {
                node: node.to_string(),
                plan: plan.clone(),
                demand,
            },
        );
        state.released.remove(&uid);
        info!(pod = %name, node, plan = %annotation_value, "bound pod");

        Ok(plan)
    }

    /// Idempotent admission of an already-bound pod into in-memory
    /// accounting. No-op if the UID is already known.
    pub async fn allocate(&self, pod: &Pod) -> DealerResult<()> {
        let Some(uid) = pod.metadata.uid.clone() else {
            return Err(DealerError::MalformedPod("pod missing uid".to_string()));
        };

        let mut state = self.state.lock().await;
        if state.pod_maps.contains_key(&uid) {
            return Ok(());
        }

        let demand = Demand::from_pod(pod)?;
        if demand.is_empty() {
            return Ok(());
        }
        let plan = Plan::from_pod(pod, &demand)?;

        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .ok_or_else(|| DealerError::MalformedPod("pod missing spec.nodeName".to_string()))?;

        self.ensure_node(&mut state, &node).await?;
        let info = state.nodes.get_mut(&node).expect("just ensured");
        info.allocate(&plan, &demand)?;

        state.pod_maps.insert(
            uid.clone(),
            PodRecord {
                node,
                plan,
                demand,
            },
        );
        state.released.remove(&uid);
        Ok(())
    }

    /// Reverse of allocate. Absent UID is a no-op, not an error.
    pub async fn release(&self, pod: &Pod) -> DealerResult<()> {
        let Some(uid) = pod.metadata.uid.clone() else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        let Some(record) = state.pod_maps.remove(&uid) else {
            return Ok(());
        };

        if let Some(info) = state.nodes.get_mut(&record.node) {
            info.release(&record.plan, &record.demand)?;
        }
        state.released.insert(uid);
        Ok(())
    }

    /// Always succeeds, even for an unknown or never-released UID.
    pub async fn forget(&self, pod: &Pod) {
        let Some(uid) = pod.metadata.uid.clone() else {
            return;
        };
        let mut state = self.state.lock().await;
        state.pod_maps.remove(&uid);
        state.released.remove(&uid);
    }

    pub async fn known_pod(&self, uid: &str) -> bool {
        self.state.lock().await.pod_maps.contains_key(uid)
    }

    pub async fn pod_released(&self, uid: &str) -> bool {
        self.state.lock().await.released.contains(uid)
    }

    /// Read-only snapshot of node inventory, for diagnostics. Returns an
    /// owned copy taken while holding the lock — callers never observe a
    /// live, racily-mutating reference (resolves the §9 open question in
    /// favour of copying).
    pub async fn status(&self) -> BTreeMap<String, NodeInfo> {
        let state = self.state.lock().await;
        state
            .nodes
            .iter()
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect()
    }
}

fn is_gpu_assumed(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(GPU_ASSUME_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Commits `pod`'s plan onto `info` and returns the `(uid, plan, demand)`
/// the caller records into `PodMaps`. `Ok(None)` means the pod carried no
/// GPU demand (nothing to commit or record); `Ok(Some(_))` on success.
fn replay_pod_onto_node(
    info: &mut NodeInfo,
    pod: &Pod,
) -> DealerResult<Option<(String, Plan, Demand)>> {
    let demand = Demand::from_pod(pod)?;
    if demand.is_empty() {
        return Ok(None);
    }
    let plan = Plan::from_pod(pod, &demand)?;
    info.allocate(&plan, &demand)?;
    let uid = pod
        .metadata
        .uid
        .clone()
        .ok_or_else(|| DealerError::MalformedPod("pod missing uid".to_string()))?;
    Ok(Some((uid, plan, demand)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{FakeClusterApi, PatchBehavior};
    use crate::demand::{GPU_CORE_RESOURCE, GPU_MEMORY_RESOURCE};
    use crate::node::{GPU_CORE_CAPACITY_LABEL, GPU_COUNT_LABEL, GPU_MEMORY_CAPACITY_LABEL};
    use k8s_openapi::api::core::v1::{Container, Node, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn two_gpu_node_object(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([
                    (GPU_COUNT_LABEL.to_string(), "2".to_string()),
                    (GPU_CORE_CAPACITY_LABEL.to_string(), "100".to_string()),
                    (GPU_MEMORY_CAPACITY_LABEL.to_string(), "16384".to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn gpu_pod(uid: &str, name: &str, containers: Vec<(u32, u32)>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([(
                    GPU_ASSUME_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                containers: containers
                    .into_iter()
                    .enumerate()
                    .map(|(i, (core, mem))| Container {
                        name: format!("c{i}"),
                        resources: Some(ResourceRequirements {
                            requests: Some(BTreeMap::from([
                                (GPU_CORE_RESOURCE.into(), Quantity(core.to_string())),
                                (GPU_MEMORY_RESOURCE.into(), Quantity(mem.to_string())),
                            ])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn dealer_with_node() -> Dealer {
        let cluster = FakeClusterApi::new().with_node(two_gpu_node_object("n1"));
        Dealer::new(Arc::new(cluster))
    }

    #[tokio::test]
    async fn assume_seeds_node_lazily_and_fits() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        let (oks, errs) = dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;
        assert_eq!(oks, vec![true]);
        assert!(errs[0].is_none());
    }

    #[tokio::test]
    async fn assume_unknown_node_is_per_node_failure() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        let (oks, errs) = dealer
            .assume(&["nope".to_string()], &pod, Rater::BinPack)
            .await;
        assert_eq!(oks, vec![false]);
        assert!(matches!(errs[0], Some(DealerError::NodeUnknown(_))));
    }

    #[tokio::test]
    async fn assume_over_commit_leaves_totals_unchanged() {
        let dealer = dealer_with_node();
        let pod_a = gpu_pod("uid-1", "pod-a", vec![(95, 1024)]);
        dealer.assume(&["n1".to_string()], &pod_a, Rater::BinPack).await;
        dealer.bind("n1", &pod_a).await.unwrap();

        let pod_b = gpu_pod("uid-2", "pod-b", vec![(95, 1024)]);
        let (oks, _errs) = dealer.assume(&["n1".to_string()], &pod_b, Rater::BinPack).await;
        assert_eq!(oks, vec![true]); // fits on the other GPU
        dealer.bind("n1", &pod_b).await.unwrap();

        // Both GPUs now have only 5% core residual — a 10% request fits nowhere.
        let pod_c = gpu_pod("uid-3", "pod-c", vec![(10, 1)]);
        let (oks, errs) = dealer.assume(&["n1".to_string()], &pod_c, Rater::BinPack).await;
        assert_eq!(oks, vec![false]);
        assert!(matches!(
            errs[0],
            Some(DealerError::InsufficientResource { .. })
        ));

        let status = dealer.status().await;
        assert_eq!(status["n1"].total_committed_core(), 95 + 95);
    }

    #[tokio::test]
    async fn bind_writes_plan_and_creates_binding() {
        let cluster = Arc::new(FakeClusterApi::new().with_node(two_gpu_node_object("n1")));
        let dealer = Dealer::new(cluster.clone());
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;

        let plan = dealer.bind("n1", &pod).await.unwrap();
        assert_eq!(plan.gpu_indices, vec![0]);
        assert_eq!(cluster.bindings(), vec![("pod-a".to_string(), "n1".to_string())]);
        assert!(dealer.known_pod("uid-1").await);
    }

    // S6: optimistic retry on bind.
    #[tokio::test]
    async fn bind_retries_once_on_conflict_then_succeeds() {
        let cluster = Arc::new(
            FakeClusterApi::new()
                .with_node(two_gpu_node_object("n1"))
                .on_next_patch(PatchBehavior::ConflictThenSucceed),
        );
        let dealer = Dealer::new(cluster.clone());
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;

        let result = dealer.bind("n1", &pod).await;
        assert!(result.is_ok(), "bind should recover from one conflict: {result:?}");
        assert_eq!(cluster.patch_call_count(), 2);
    }

    #[tokio::test]
    async fn bind_surfaces_non_conflict_patch_failure() {
        let cluster = Arc::new(
            FakeClusterApi::new()
                .with_node(two_gpu_node_object("n1"))
                .on_next_patch(PatchBehavior::Fail("etcd unavailable".to_string())),
        );
        let dealer = Dealer::new(cluster.clone());
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;

        let err = dealer.bind("n1", &pod).await.unwrap_err();
        assert!(matches!(err, DealerError::BindIoFailure(_)));
        assert!(cluster.bindings().is_empty());
    }

    // S5: release round-trip.
    #[tokio::test]
    async fn release_then_forget_round_trip() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(60, 8192), (60, 8192)]);
        dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;
        dealer.bind("n1", &pod).await.unwrap();
        assert!(dealer.known_pod("uid-1").await);

        dealer.release(&pod).await.unwrap();
        assert!(!dealer.known_pod("uid-1").await);
        assert!(dealer.pod_released("uid-1").await);

        let status = dealer.status().await;
        let node = &status["n1"];
        assert_eq!(node.total_committed_core(), 0);
        assert_eq!(node.total_committed_memory(), 0);

        dealer.forget(&pod).await;
        assert!(!dealer.pod_released("uid-1").await);
        // forgetting again is a no-op, never errors
        dealer.forget(&pod).await;
    }

    #[tokio::test]
    async fn release_before_allocate_is_noop() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(10, 10)]);
        // never assumed/bound/allocated
        assert!(dealer.release(&pod).await.is_ok());
        assert!(!dealer.known_pod("uid-1").await);
    }

    #[tokio::test]
    async fn allocate_is_idempotent_on_uid() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        // annotate plan so allocate can reconstruct it directly (informer path).
        let mut pod = pod;
        pod.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(crate::demand::GPU_PLAN_ANNOTATION.to_string(), "0".to_string());

        dealer.allocate(&pod).await.unwrap();
        dealer.allocate(&pod).await.unwrap(); // no-op second time

        let status = dealer.status().await;
        assert_eq!(status["n1"].total_committed_core(), 30);
    }

    // Lazy seeding (spec.md §4.5): a node's first reference replays every
    // GPU_ASSUME_LABEL pod already scheduled on it, committing their plans
    // before the new pod is ever fit.
    #[tokio::test]
    async fn first_reference_seeds_node_from_already_scheduled_pods() {
        let mut existing = gpu_pod("uid-existing", "pod-existing", vec![(40, 2048)]);
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(crate::demand::GPU_PLAN_ANNOTATION.to_string(), "0".to_string());

        let cluster = FakeClusterApi::new()
            .with_node(two_gpu_node_object("n1"))
            .with_pods_on_node("n1", vec![existing]);
        let dealer = Dealer::new(Arc::new(cluster));

        // First reference to "n1" must seed from the cluster's existing pods
        // before fitting the new pod.
        let pod = gpu_pod("uid-new", "pod-new", vec![(30, 4096)]);
        let (oks, _errs) = dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;
        assert_eq!(oks, vec![true]);

        let status = dealer.status().await;
        // 40 from the replayed pod plus 30 tentatively assumed for the new one.
        assert_eq!(status["n1"].total_committed_core(), 40 + 30);
        // Seeding must record the replayed pod in PodMaps, not just commit
        // its GPU counters (spec.md §3 invariant 1).
        assert!(dealer.known_pod("uid-existing").await);
    }

    // A seeded pod's commitment must be releasable through the normal
    // Dealer::release path — if seeding only touched NodeInfo and skipped
    // PodMaps, this would silently no-op and leak the commitment forever.
    #[tokio::test]
    async fn release_reclaims_a_seeded_pods_commitment() {
        let mut existing = gpu_pod("uid-existing", "pod-existing", vec![(40, 2048)]);
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(crate::demand::GPU_PLAN_ANNOTATION.to_string(), "0".to_string());

        let cluster = FakeClusterApi::new()
            .with_node(two_gpu_node_object("n1"))
            .with_pods_on_node("n1", vec![existing.clone()]);
        let dealer = Dealer::new(Arc::new(cluster));

        let pod = gpu_pod("uid-new", "pod-new", vec![(1, 1)]);
        dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;
        assert!(dealer.known_pod("uid-existing").await);

        dealer.release(&existing).await.unwrap();
        assert!(!dealer.known_pod("uid-existing").await);
        assert!(dealer.pod_released("uid-existing").await);

        let status = dealer.status().await;
        assert_eq!(status["n1"].total_committed_core(), 1); // only the new pod's tentative commit remains
    }

    // A seeded pod must not double-commit if Dealer::allocate is later
    // called for the same UID (e.g. a redundant informer callback).
    #[tokio::test]
    async fn allocate_after_seeding_is_a_noop_not_a_double_commit() {
        let mut existing = gpu_pod("uid-existing", "pod-existing", vec![(40, 2048)]);
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(crate::demand::GPU_PLAN_ANNOTATION.to_string(), "0".to_string());

        let cluster = FakeClusterApi::new()
            .with_node(two_gpu_node_object("n1"))
            .with_pods_on_node("n1", vec![existing.clone()]);
        let dealer = Dealer::new(Arc::new(cluster));

        let warmup = gpu_pod("uid-warmup", "pod-warmup", vec![(1, 1)]);
        dealer.assume(&["n1".to_string()], &warmup, Rater::BinPack).await;

        dealer.allocate(&existing).await.unwrap();

        let status = dealer.status().await;
        assert_eq!(status["n1"].total_committed_core(), 40 + 1);
    }

    // A replay failure (e.g. a malformed plan annotation) is logged and
    // skipped, not fatal to the rest of seeding.
    #[tokio::test]
    async fn seeding_tolerates_one_bad_replay() {
        let mut bad = gpu_pod("uid-bad", "pod-bad", vec![(10, 10)]);
        // GPU_PLAN_ANNOTATION deliberately omitted -> MalformedPlan on replay.
        bad.metadata.annotations = None;

        let cluster = FakeClusterApi::new()
            .with_node(two_gpu_node_object("n1"))
            .with_pods_on_node("n1", vec![bad]);
        let dealer = Dealer::new(Arc::new(cluster));

        let pod = gpu_pod("uid-new", "pod-new", vec![(30, 4096)]);
        let (oks, errs) = dealer.assume(&["n1".to_string()], &pod, Rater::BinPack).await;
        assert_eq!(oks, vec![true]);
        assert!(errs[0].is_none());

        let status = dealer.status().await;
        assert_eq!(status["n1"].total_committed_core(), 30);
    }

    #[tokio::test]
    async fn score_missing_node_is_score_min() {
        let dealer = dealer_with_node();
        let pod = gpu_pod("uid-1", "pod-a", vec![(30, 4096)]);
        let scores = dealer
            .score(&["nope".to_string()], &pod, Rater::BinPack, None)
            .await;
        assert_eq!(scores, vec![SCORE_MIN]);
    }
}
