use k8s_openapi::api::core::v1::Pod;

use crate::error::{DealerError, DealerResult};

/// Label marking a pod as under this extender's management.
/// Only labelled pods are seeded/tracked (spec.md §6).
pub const GPU_ASSUME_LABEL: &str = "gpu.dealer/assume";

/// Resource names under `container.resources.requests` that encode the
/// per-container GPU demand.
pub const GPU_CORE_RESOURCE: &str = "gpu.dealer/core-percent";
pub const GPU_MEMORY_RESOURCE: &str = "gpu.dealer/memory-mib";

/// Annotation holding the comma-separated GPU indices chosen at bind time.
pub const GPU_PLAN_ANNOTATION: &str = "gpu.dealer/plan";

fn is_gpu_assumed(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(GPU_ASSUME_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// One container's GPU request: core share percentage (1..100) and memory
/// request in MiB (positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerRequest {
    pub core_percent: u32,
    pub memory_mib: u32,
}

/// The ordered per-container GPU requests of a single pod.
///
/// One container maps to exactly one GPU — fractional sharing across
/// containers is never multiplexed onto one card inside a single demand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Demand {
    pub requests: Vec<ContainerRequest>,
}

impl Demand {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Derive a Demand from a pod's container resource requests.
    ///
    /// A container is GPU-bearing iff it declares both a core-percent
    /// request in 1..=100 and a positive memory-MiB request. Zero
    /// GPU-bearing containers yields an empty Demand ("not a GPU pod" —
    /// ignored by callers, not an error). Out-of-range or unparseable
    /// values are `MalformedPod`.
    ///
    /// Only pods carrying `GPU_ASSUME_LABEL=true` are considered; others
    /// return an empty Demand regardless of their resource requests.
    pub fn from_pod(pod: &Pod) -> DealerResult<Demand> {
        if !is_gpu_assumed(pod) {
            return Ok(Demand::default());
        }

        let spec = match pod.spec.as_ref() {
            Some(s) => s,
            None => return Ok(Demand::default()),
        };

        let mut requests = Vec::new();
        for container in &spec.containers {
            let Some(resources) = container.resources.as_ref() else {
                continue;
            };
            let Some(reqs) = resources.requests.as_ref() else {
                continue;
            };
            let core = reqs.get(GPU_CORE_RESOURCE);
            let mem = reqs.get(GPU_MEMORY_RESOURCE);
            let (core, mem) = match (core, mem) {
                (Some(c), Some(m)) => (c, m),
                (None, None) => continue,
                _ => {
                    return Err(DealerError::MalformedPod(format!(
                        "container {} declares only one of {GPU_CORE_RESOURCE}/{GPU_MEMORY_RESOURCE}",
                        container.name
                    )));
                }
            };

            let core_percent: u32 = core.0.parse().map_err(|_| {
                DealerError::MalformedPod(format!(
                    "container {} has non-numeric {GPU_CORE_RESOURCE}: {}",
                    container.name, core.0
                ))
            })?;
            if !(1..=100).contains(&core_percent) {
                return Err(DealerError::MalformedPod(format!(
                    "container {} core-percent {core_percent} out of range 1..=100",
                    container.name
                )));
            }

            let memory_mib: u32 = mem.0.parse().map_err(|_| {
                DealerError::MalformedPod(format!(
                    "container {} has non-numeric {GPU_MEMORY_RESOURCE}: {}",
                    container.name, mem.0
                ))
            })?;
            if memory_mib == 0 {
                return Err(DealerError::MalformedPod(format!(
                    "container {} memory-mib must be positive",
                    container.name
                )));
            }

            requests.push(ContainerRequest {
                core_percent,
                memory_mib,
            });
        }

        Ok(Demand { requests })
    }
}
