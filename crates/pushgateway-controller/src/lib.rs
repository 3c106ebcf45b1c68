//! Pushgateway controller
//!
//! Keeps the Deployment, Service and ServiceMonitor of every Pushgateway in
//! line with its spec, and binds the ServiceMonitor to a Prometheus instance
//! by satisfying that instance's `serviceMonitorSelector`.

#![deny(missing_docs)]

pub mod child;
pub mod controller;
pub mod kube_client;
pub mod outcome;
pub mod prometheus;

pub use child::{ChildKind, ChildResource};
pub use controller::{desired_status, error_policy, reconcile, reconcile_pass, Context};
pub use kube_client::{status_merge_patch, PushgatewayKubeClient, PushgatewayKubeClientImpl};
pub use outcome::{ChildAction, ReconcileOutcome};
pub use prometheus::{resolve_prometheus, ResolvedPrometheus};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;
    use pushgateway_common::crd::{Prometheus, PrometheusSpec, Pushgateway, PushgatewaySpec};

    pub fn pushgateway(name: &str, namespace: &str) -> Pushgateway {
        Pushgateway {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(format!("uid-{}", name)),
                ..Default::default()
            },
            spec: PushgatewaySpec::default(),
            status: None,
        }
    }

    /// A Prometheus selecting ServiceMonitors by `release=<release>`
    pub fn prometheus(name: &str, namespace: &str, release: Option<&str>) -> Prometheus {
        let mut prometheus = Prometheus::new(
            name,
            PrometheusSpec {
                service_monitor_selector: release.map(|r| LabelSelector {
                    match_labels: Some(BTreeMap::from([("release".to_string(), r.to_string())])),
                    ..Default::default()
                }),
            },
        );
        prometheus.metadata.namespace = Some(namespace.to_string());
        prometheus
    }
}
