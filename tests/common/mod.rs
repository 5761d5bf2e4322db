use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Node, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;

use gpu_dealer::demand::{GPU_ASSUME_LABEL, GPU_CORE_RESOURCE, GPU_MEMORY_RESOURCE};
use gpu_dealer::node::{GPU_CORE_CAPACITY_LABEL, GPU_COUNT_LABEL, GPU_MEMORY_CAPACITY_LABEL};

pub fn gpu_node(name: &str, gpu_count: usize, core_total: u32, memory_mib: u32) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(BTreeMap::from([
                (GPU_COUNT_LABEL.to_string(), gpu_count.to_string()),
                (GPU_CORE_CAPACITY_LABEL.to_string(), core_total.to_string()),
                (GPU_MEMORY_CAPACITY_LABEL.to_string(), memory_mib.to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn gpu_pod(uid: &str, name: &str, node: &str, containers: &[(u32, u32)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            uid: Some(uid.into()),
            name: Some(name.into()),
            namespace: Some("default".into()),
            labels: Some(BTreeMap::from([(
                GPU_ASSUME_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.into()),
            containers: containers
                .iter()
                .enumerate()
                .map(|(i, &(core, mem))| Container {
                    name: format!("c{i}"),
                    image: Some("busybox".into()),
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
