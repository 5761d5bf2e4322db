//! Thin axum HTTP surface over the scheduler extender wire contract
//! (spec.md §6): `/filter`, `/prioritize`, `/bind`. Every handler
//! deserialises its request, calls straight into `Dealer`, and
//! serialises the result — no fit/score decision lives here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::dealer::Dealer;
use crate::metrics::MetricCache;
use crate::rater::{DEFAULT_ACTIVE_DURATION, Rater};

pub struct AppState {
    pub dealer: Dealer,
    pub rater: Rater,
    pub metrics: Option<Arc<MetricCache>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/filter", post(filter))
        .route("/prioritize", post(prioritize))
        .route("/bind", post(bind))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Standard Kubernetes scheduler-extender filter request: the pod plus
/// the candidate node names already passed earlier filter stages.
#[derive(Debug, Deserialize)]
pub struct ExtenderArgs {
    pub pod: Pod,
    #[serde(rename = "NodeNames")]
    pub node_names: Vec<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct ExtenderFilterResult {
    #[serde(rename = "NodeNames")]
    pub node_names: Vec<String>,
    #[serde(rename = "FailedNodes")]
    pub failed_nodes: HashMap<String, String>,
    #[serde(rename = "Error")]
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HostPriority {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Score")]
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExtenderBindingArgs {
    #[serde(rename = "PodName")]
    pub pod_name: String,
    #[serde(rename = "PodNamespace")]
    pub pod_namespace: String,
    #[serde(rename = "Node")]
    pub node: String,
    /// The scheduler's real extender wire shape carries only
    /// name/namespace/uid for Bind; this façade additionally wants the
    /// full pod object so `Dealer::bind` can read its demand straight
    /// off it without a round-trip read against the cluster.
    pub pod: Pod,
}

#[derive(Debug, Serialize, Default)]
pub struct ExtenderBindingResult {
    #[serde(rename = "Error")]
    pub error: String,
}

async fn filter(
    State(state): State<Arc<AppState>>,
    Json(args): Json<ExtenderArgs>,
) -> (StatusCode, Json<ExtenderFilterResult>) {
    let (oks, errs) = state
        .dealer
        .assume(&args.node_names, &args.pod, state.rater)
        .await;

    let mut node_names = Vec::new();
    let mut failed_nodes = HashMap::new();
    for ((name, ok), err) in args.node_names.iter().zip(oks).zip(errs) {
        if ok {
            node_names.push(name.clone());
        } else {
            let reason = err.map(|e| e.to_string()).unwrap_or_else(|| "rejected".to_string());
            failed_nodes.insert(name.clone(), reason);
        }
    }

    (
        StatusCode::OK,
        Json(ExtenderFilterResult {
            node_names,
            failed_nodes,
            error: String::new(),
        }),
    )
}

async fn prioritize(
    State(state): State<Arc<AppState>>,
    Json(args): Json<ExtenderArgs>,
) -> (StatusCode, Json<Vec<HostPriority>>) {
    let load_aware = state
        .metrics
        .as_deref()
        .map(|cache| (cache, DEFAULT_ACTIVE_DURATION));
    let scores = state
        .dealer
        .score(&args.node_names, &args.pod, state.rater, load_aware)
        .await;

    let priorities = args
        .node_names
        .into_iter()
        .zip(scores)
        .map(|(host, score)| HostPriority { host, score })
        .collect();

    (StatusCode::OK, Json(priorities))
}

async fn bind(
    State(state): State<Arc<AppState>>,
    Json(args): Json<ExtenderBindingArgs>,
) -> (StatusCode, Json<ExtenderBindingResult>) {
    match state.dealer.bind(&args.node, &args.pod).await {
        Ok(plan) => {
            info!(pod = %args.pod_name, node = %args.node, plan = %plan.to_annotation(), "bound");
            (StatusCode::OK, Json(ExtenderBindingResult::default()))
        }
        Err(err) => {
            error!(pod = %args.pod_name, node = %args.node, %err, "bind failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExtenderBindingResult {
                    error: err.to_string(),
                }),
            )
        }
    }
}

/// Builds the shared application state from config and collaborators.
/// Separated from `router` so tests can construct one against a
/// `FakeClusterApi` without going through env/CLI parsing.
pub fn build_state(
    dealer: Dealer,
    config: &Config,
    metrics: Option<Arc<MetricCache>>,
) -> Arc<AppState> {
    Arc::new(AppState {
        dealer,
        rater: config.rater(),
        metrics,
    })
}
