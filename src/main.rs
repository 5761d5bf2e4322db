use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::info;

use gpu_dealer::cluster::KubeClusterApi;
use gpu_dealer::config::Config;
use gpu_dealer::dealer::Dealer;
use gpu_dealer::http::{build_state, router};
use gpu_dealer::metrics::{MetricCache, PrometheusMetricsSource};

const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()
        .expect("invalid environment configuration")
        .apply_policy_file()
        .expect("failed to load POLICY_CONFIG_PATH");

    let client = kube::Client::try_default()
        .await
        .expect("failed to build kube client from environment");
    let cluster = Arc::new(KubeClusterApi::new(client));
    let dealer = Dealer::new(cluster);

    let mut refresh_handle = None;
    let metrics = if config.load_aware() {
        let cache = Arc::new(MetricCache::new());
        let source = PrometheusMetricsSource::new(
            config
                .prometheus_url
                .clone()
                .expect("load_aware() guarantees prometheus_url is set"),
        );
        let refresh_cache = cache.clone();
        refresh_handle = Some(tokio::spawn(async move {
            refresh_cache
                .refresh_loop(&source, METRICS_REFRESH_INTERVAL)
                .await;
        }));
        Some(cache)
    } else {
        None
    };

    let state = build_state(dealer, &config, metrics);

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    info!(%addr, priority = %config.priority, load_aware = config.load_aware(), "starting gpu-dealer extender");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {addr}: {err}"));

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                tracing::error!(%err, "server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    if let Some(handle) = refresh_handle {
        handle.abort();
    }
}
