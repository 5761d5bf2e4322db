use thiserror::Error;

/// The dealer's error taxonomy.
///
/// `NodeUnknown`, `InsufficientResource`, `MalformedPod` and `MalformedPlan`
/// are per-node/per-pod filter-time failures — callers fold them into a
/// rejection reason rather than aborting a whole filter/prioritize request.
/// `ConflictRetry` is recovered internally by `Dealer::bind` and should
/// never reach a caller. `BindIoFailure` and `Invariant` are terminal.
#[derive(Debug, Error)]
pub enum DealerError {
    #[error("node {0} not present in cluster cache")]
    NodeUnknown(String),

    #[error("gpu {gpu_index} insufficient on node: {reason}")]
    InsufficientResource { gpu_index: usize, reason: String },

    #[error("pod annotations/labels unparseable: {0}")]
    MalformedPod(String),

    #[error("plan annotation unparseable: {0}")]
    MalformedPlan(String),

    /// Recovered internally by retrying the pod update exactly once.
    #[error("optimistic concurrency conflict updating pod")]
    ConflictRetry,

    #[error("bind failed: {0}")]
    BindIoFailure(String),

    /// A committed > total or plan-length mismatch. Programmer error — fail loud.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

pub type DealerResult<T> = Result<T, DealerError>;
