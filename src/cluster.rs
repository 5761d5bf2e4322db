use k8s_openapi::api::core::v1::{Node, Pod};

use crate::error::{DealerError, DealerResult};

/// The handful of cluster-API operations the dealer needs, abstracted
/// behind a trait so the core can be driven by a real `kube::Client` or
/// a deterministic fake in tests — grounded on the teacher's `Provider`
/// enum-of-collaborators split between a `kube`-backed and an in-memory
/// implementation.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_node(&self, name: &str) -> DealerResult<Node>;

    /// Pods currently scheduled (`spec.node_name == node`) used to seed a
    /// `NodeInfo` the first time a node is referenced.
    async fn list_pods_on_node(&self, node: &str) -> DealerResult<Vec<Pod>>;

    /// Writes `annotation_value` under `GPU_PLAN_ANNOTATION` on the named
    /// pod. Implementations must surface an optimistic-concurrency
    /// conflict as `DealerError::ConflictRetry` so `Dealer::bind` can
    /// retry exactly once.
    async fn patch_pod_plan_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation_value: &str,
    ) -> DealerResult<Pod>;

    /// Issues a `Binding` of the pod to `node`.
    async fn create_binding(&self, namespace: &str, pod_name: &str, node: &str) -> DealerResult<()>;
}

/// `kube::Client`-backed implementation.
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_node(&self, name: &str) -> DealerResult<Node> {
        let nodes: kube::Api<Node> = kube::Api::all(self.client.clone());
        nodes.get(name).await.map_err(DealerError::from)
    }

    async fn list_pods_on_node(&self, node: &str) -> DealerResult<Vec<Pod>> {
        let pods: kube::Api<Pod> = kube::Api::all(self.client.clone());
        let lp = kube::api::ListParams::default().fields(&format!("spec.nodeName={node}"));
        Ok(pods.list(&lp).await?.items)
    }

    async fn patch_pod_plan_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation_value: &str,
    ) -> DealerResult<Pod> {
        use kube::api::{Patch, PatchParams};

        let pods: kube::Api<Pod> = kube::Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    crate::demand::GPU_PLAN_ANNOTATION: annotation_value,
                }
            }
        });
        match pods
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(pod) => Ok(pod),
            Err(kube::Error::Api(err)) if is_conflict(&err) => Err(DealerError::ConflictRetry),
            Err(err) => Err(DealerError::from(err)),
        }
    }

    async fn create_binding(&self, namespace: &str, pod_name: &str, node: &str) -> DealerResult<()> {
        // The Kubernetes `Binding` write is a subresource POST with no
        // typed client support in k8s-openapi/kube for arbitrary request
        // bodies; issue it as a raw request through the shared client.
        let binding = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Binding",
            "metadata": { "name": pod_name },
            "target": {
                "apiVersion": "v1",
                "kind": "Node",
                "name": node,
            }
        });
        let body = serde_json::to_vec(&binding).map_err(|e| DealerError::BindIoFailure(e.to_string()))?;
        let req = http::Request::builder()
            .method("POST")
            .uri(format!("/api/v1/namespaces/{namespace}/pods/{pod_name}/binding"))
            .header("content-type", "application/json")
            .body(body)
            .map_err(|e| DealerError::BindIoFailure(e.to_string()))?;
        self.client
            .request::<serde_json::Value>(req)
            .await
            .map_err(|e| DealerError::BindIoFailure(e.to_string()))?;
        Ok(())
    }
}

fn is_conflict(err: &kube::error::ErrorResponse) -> bool {
    err.code == 409 || err.message.contains("object has been modified")
}

/// Deterministic, in-memory `ClusterApi` for tests — grounded on the
/// teacher's `FakeProvider` (queued behaviors, call logging,
/// `Arc<Mutex<_>>` interior state), generalised from "cloud node
/// lifecycle" to "cluster reads/writes".
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum PatchBehavior {
        Succeed,
        ConflictThenSucceed,
        Fail(String),
    }

    struct FakeState {
        nodes: std::collections::HashMap<String, Node>,
        pods_by_node: std::collections::HashMap<String, Vec<Pod>>,
        patch_behaviors: VecDeque<PatchBehavior>,
        default_patch: PatchBehavior,
        bindings: Vec<(String, String)>,
        patch_calls: usize,
    }

    /// Test double for `ClusterApi`. `on_next_patch` queues one-shot
    /// behaviors consumed in order, falling back to `default_patch` once
    /// drained — same pattern as the teacher's `FakeProvider`.
    pub struct FakeClusterApi {
        state: Mutex<FakeState>,
    }

    impl FakeClusterApi {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(FakeState {
                    nodes: Default::default(),
                    pods_by_node: Default::default(),
                    patch_behaviors: VecDeque::new(),
                    default_patch: PatchBehavior::Succeed,
                    bindings: Vec::new(),
                    patch_calls: 0,
                }),
            }
        }

        pub fn with_node(self, node: Node) -> Self {
            let name = node.metadata.name.clone().unwrap();
            self.state.lock().unwrap().nodes.insert(name, node);
            self
        }

        pub fn with_pods_on_node(self, node: &str, pods: Vec<Pod>) -> Self {
            self.state
                .lock()
                .unwrap()
                .pods_by_node
                .insert(node.to_string(), pods);
            self
        }

        pub fn on_next_patch(self, behavior: PatchBehavior) -> Self {
            self.state.lock().unwrap().patch_behaviors.push_back(behavior);
            self
        }

        pub fn bindings(&self) -> Vec<(String, String)> {
            self.state.lock().unwrap().bindings.clone()
        }

        pub fn patch_call_count(&self) -> usize {
            self.state.lock().unwrap().patch_calls
        }
    }

    impl Default for FakeClusterApi {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl ClusterApi for FakeClusterApi {
        async fn get_node(&self, name: &str) -> DealerResult<Node> {
            self.state
                .lock()
                .unwrap()
                .nodes
                .get(name)
                .cloned()
                .ok_or_else(|| DealerError::NodeUnknown(name.to_string()))
        }

        async fn list_pods_on_node(&self, node: &str) -> DealerResult<Vec<Pod>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .pods_by_node
                .get(node)
                .cloned()
                .unwrap_or_default())
        }

        async fn patch_pod_plan_annotation(
            &self,
            _namespace: &str,
            name: &str,
            annotation_value: &str,
        ) -> DealerResult<Pod> {
            let behavior = {
                let mut state = self.state.lock().unwrap();
                state.patch_calls += 1;
                state
                    .patch_behaviors
                    .pop_front()
                    .unwrap_or_else(|| state.default_patch.clone())
            };

            match behavior {
                PatchBehavior::Succeed => Ok(patched_pod(name, annotation_value)),
                PatchBehavior::ConflictThenSucceed => {
                    // requeue Succeed for the retry the caller is expected to make
                    self.state
                        .lock()
                        .unwrap()
                        .patch_behaviors
                        .push_front(PatchBehavior::Succeed);
                    Err(DealerError::ConflictRetry)
                }
                PatchBehavior::Fail(msg) => Err(DealerError::BindIoFailure(msg)),
            }
        }

        async fn create_binding(&self, _namespace: &str, pod_name: &str, node: &str) -> DealerResult<()> {
            self.state
                .lock()
                .unwrap()
                .bindings
                .push((pod_name.to_string(), node.to_string()));
            Ok(())
        }
    }

    fn patched_pod(name: &str, annotation_value: &str) -> Pod {
        use kube::api::ObjectMeta;
        use std::collections::BTreeMap;
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(BTreeMap::from([(
                    crate::demand::GPU_PLAN_ANNOTATION.to_string(),
                    annotation_value.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
