use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

/// Which series a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Core,
    Memory,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    at: SystemTime,
}

/// A metrics source the refresher pulls from. Abstracts the Prometheus
/// HTTP query contract (spec.md §6) so the cache and rater never depend
/// directly on a wire format.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    /// Query every known (node, card) pair's current core% and mem%.
    /// Returns `(node, card_index, core_pct, mem_pct)` tuples; a source
    /// that has nothing for a pair simply omits it.
    async fn query_all(&self) -> anyhow::Result<Vec<(String, usize, f64, f64)>>;
}

/// Per-(node, card) latest core%/mem% samples with their timestamps.
///
/// Owns its own mutex, independent of the Dealer's — the rater acquires
/// this lock only when consulting load, and never while holding the
/// Dealer lock's callers' locks nested the other way (Dealer → Metric,
/// never Metric → Dealer).
#[derive(Default)]
pub struct MetricCache {
    state: Mutex<HashMap<(String, usize), (Option<Sample>, Option<Sample>)>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_core_usage(&self, node: &str, card: usize, value: f64) {
        self.update(node, card, MetricKind::Core, value);
    }

    pub fn add_memory_usage(&self, node: &str, card: usize, value: f64) {
        self.update(node, card, MetricKind::Memory, value);
    }

    fn update(&self, node: &str, card: usize, kind: MetricKind, value: f64) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entry((node.to_string(), card))
            .or_insert((None, None));
        let sample = Sample {
            value,
            at: SystemTime::now(),
        };
        match kind {
            MetricKind::Core => entry.0 = Some(sample),
            MetricKind::Memory => entry.1 = Some(sample),
        }
    }

    /// Raw read — fresh iff the sample's age is within `active_duration`.
    /// Missing or stale samples return `(false, 0.0)`: callers must treat
    /// `fresh = false` as "no load adjustment", never as a rejection.
    pub fn get_usage(&self, node: &str, kind: MetricKind, card: usize, active_duration: Duration) -> (bool, f64) {
        let state = self.state.lock().unwrap();
        let Some((core, memory)) = state.get(&(node.to_string(), card)) else {
            return (false, 0.0);
        };
        let sample = match kind {
            MetricKind::Core => core,
            MetricKind::Memory => memory,
        };
        match sample {
            Some(s) => match s.at.elapsed() {
                Ok(age) if age <= active_duration => (true, s.value),
                _ => (false, 0.0),
            },
            None => (false, 0.0),
        }
    }

    /// Pulls fresh samples from `source` and feeds them into the cache.
    /// Intended to be driven by a periodic background task; a query
    /// failure is logged and leaves the existing cache untouched (stale
    /// samples simply age out on next read).
    pub async fn refresh(&self, source: &dyn MetricsSource) {
        match source.query_all().await {
            Ok(samples) => {
                for (node, card, core_pct, mem_pct) in samples {
                    self.add_core_usage(&node, card, core_pct);
                    self.add_memory_usage(&node, card, mem_pct);
                }
                debug!("metric cache refreshed");
            }
            Err(err) => warn!(%err, "metric cache refresh failed"),
        }
    }

    /// Runs `refresh` on a fixed interval until cancelled. Spawned from
    /// `main`, not from the library — the cache itself has no opinion on
    /// task lifetimes.
    pub async fn refresh_loop(&self, source: &dyn MetricsSource, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.refresh(source).await;
        }
    }
}

/// Queries a Prometheus-compatible HTTP endpoint for per-(node,card) core
/// and memory utilisation series (spec.md §6 Metrics contract).
pub struct PrometheusMetricsSource {
    base_url: String,
    client: reqwest::Client,
}

impl PrometheusMetricsSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn instant_query(&self, expr: &str) -> anyhow::Result<PromResponse> {
        let url = format!("{}/api/v1/query", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(url)
            .query(&[("query", expr)])
            .send()
            .await?
            .error_for_status()?
            .json::<PromResponse>()
            .await?;
        Ok(resp)
    }
}

#[derive(serde::Deserialize)]
struct PromResponse {
    data: PromData,
}

#[derive(serde::Deserialize)]
struct PromData {
    result: Vec<PromResult>,
}

#[derive(serde::Deserialize)]
struct PromResult {
    metric: HashMap<String, String>,
    // [timestamp, "value"]
    value: (f64, String),
}

#[async_trait::async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn query_all(&self) -> anyhow::Result<Vec<(String, usize, f64, f64)>> {
        let core = self.instant_query("gpu_core_utilization_percent").await?;
        let mem = self.instant_query("gpu_memory_utilization_percent").await?;

        let mut by_key: HashMap<(String, usize), (f64, f64)> = HashMap::new();
        for r in core.data.result {
            if let Some((node, card)) = extract_labels(&r.metric) {
                let v: f64 = r.value.1.parse().unwrap_or(0.0);
                by_key.entry((node, card)).or_insert((0.0, 0.0)).0 = v;
            }
        }
        for r in mem.data.result {
            if let Some((node, card)) = extract_labels(&r.metric) {
                let v: f64 = r.value.1.parse().unwrap_or(0.0);
                by_key.entry((node, card)).or_insert((0.0, 0.0)).1 = v;
            }
        }

        Ok(by_key
            .into_iter()
            .map(|((node, card), (c, m))| (node, card, c, m))
            .collect())
    }
}

fn extract_labels(metric: &HashMap<String, String>) -> Option<(String, usize)> {
    let node = metric.get("node")?.clone();
    let card: usize = metric.get("card")?.parse().ok()?;
    Some((node, card))
}
