use k8s_openapi::api::core::v1::Pod;

use crate::demand::{Demand, GPU_PLAN_ANNOTATION};
use crate::error::{DealerError, DealerResult};

/// The chosen GPU indices, one per container in the pod's container order.
///
/// Either produced by `NodeInfo::assume` from a `Demand`, or reconstructed
/// from a pod's annotations on replay/seeding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    pub gpu_indices: Vec<usize>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.gpu_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gpu_indices.is_empty()
    }

    pub fn to_annotation(&self) -> String {
        self.gpu_indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Reconstruct a Plan from a pod's `GPU_PLAN_ANNOTATION`, validated
    /// against the Demand derived from the same pod: the index count must
    /// match the container count exactly.
    ///
    /// Fails with `MalformedPlan` if the annotation is absent while a
    /// Demand is present, indices are non-numeric, or counts mismatch.
    pub fn from_pod(pod: &Pod, demand: &Demand) -> DealerResult<Plan> {
        let raw = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(GPU_PLAN_ANNOTATION))
            .ok_or_else(|| {
                DealerError::MalformedPlan(format!(
                    "pod {} missing {GPU_PLAN_ANNOTATION} annotation",
                    pod.metadata.name.as_deref().unwrap_or("<unnamed>")
                ))
            })?;

        if raw.trim().is_empty() {
            return Err(DealerError::MalformedPlan(format!(
                "pod {} has empty {GPU_PLAN_ANNOTATION} annotation",
                pod.metadata.name.as_deref().unwrap_or("<unnamed>")
            )));
        }

        let gpu_indices: Vec<usize> = raw
            .split(',')
            .map(|s| {
                s.trim().parse::<usize>().map_err(|_| {
                    DealerError::MalformedPlan(format!("non-numeric gpu index: {s}"))
                })
            })
            .collect::<DealerResult<_>>()?;

        if gpu_indices.len() != demand.len() {
            return Err(DealerError::MalformedPlan(format!(
                "plan has {} indices but demand has {} containers",
                gpu_indices.len(),
                demand.len()
            )));
        }

        Ok(Plan { gpu_indices })
    }

    /// Validate that every index names a GPU that exists on a node with
    /// `gpu_count` cards. Called by `NodeInfo` before accepting a plan —
    /// keeps the "each index is a valid GPU on the target node" invariant
    /// enforced at a single seam.
    pub fn validate_indices(&self, gpu_count: usize) -> DealerResult<()> {
        for &idx in &self.gpu_indices {
            if idx >= gpu_count {
                return Err(DealerError::MalformedPlan(format!(
                    "gpu index {idx} out of range (node has {gpu_count} gpus)"
                )));
            }
        }
        Ok(())
    }
}
