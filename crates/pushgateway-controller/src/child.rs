//! Child resources managed for each Pushgateway
//!
//! The three child kinds share one reconcile loop. [`ChildKind`] picks the
//! builder and the name; [`ChildResource`] carries the built or observed object
//! and knows how to compare and merge it.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use pushgateway_common::crd::{Pushgateway, PushgatewayStatus, ServiceMonitor};
use pushgateway_common::kube_utils::{is_subset_of, merge_metadata};
use pushgateway_common::{Error, ResourceDefaults, Result};
use pushgateway_resources::{
    build_deployment, build_service, build_service_monitor, deployment_name,
    service_monitor_name, service_name,
};

/// Kind of a managed child, in reconcile order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// The Deployment running the Pushgateway
    Workload,
    /// The headless Service
    Network,
    /// The ServiceMonitor
    ScrapeTarget,
}

impl ChildKind {
    /// Every kind, in the order a pass reconciles them
    pub const ALL: [ChildKind; 3] = [Self::Workload, Self::Network, Self::ScrapeTarget];

    /// Kubernetes kind name
    pub fn kind_name(self) -> &'static str {
        match self {
            Self::Workload => "Deployment",
            Self::Network => "Service",
            Self::ScrapeTarget => "ServiceMonitor",
        }
    }

    /// Name of the child object for a given instance
    pub fn object_name(self, instance: &str) -> String {
        match self {
            Self::Workload => deployment_name(instance),
            Self::Network => service_name(instance),
            Self::ScrapeTarget => service_monitor_name(instance),
        }
    }

    /// Build the desired object of this kind
    pub fn build(
        self,
        pgw: &Pushgateway,
        status: &PushgatewayStatus,
        defaults: &ResourceDefaults,
    ) -> ChildResource {
        match self {
            Self::Workload => ChildResource::Workload(build_deployment(pgw, status, defaults)),
            Self::Network => ChildResource::Network(build_service(pgw, defaults)),
            Self::ScrapeTarget => {
                ChildResource::ScrapeTarget(build_service_monitor(pgw, status, defaults))
            }
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// A child object of one of the managed kinds
#[derive(Clone, Debug, PartialEq)]
pub enum ChildResource {
    /// Deployment
    Workload(Deployment),
    /// Service
    Network(Service),
    /// ServiceMonitor
    ScrapeTarget(ServiceMonitor),
}

impl ChildResource {
    /// Kind of this object
    pub fn kind(&self) -> ChildKind {
        match self {
            Self::Workload(_) => ChildKind::Workload,
            Self::Network(_) => ChildKind::Network,
            Self::ScrapeTarget(_) => ChildKind::ScrapeTarget,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Workload(d) => &d.metadata,
            Self::Network(s) => &s.metadata,
            Self::ScrapeTarget(sm) => &sm.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Workload(d) => &mut d.metadata,
            Self::Network(s) => &mut s.metadata,
            Self::ScrapeTarget(sm) => &mut sm.metadata,
        }
    }

    /// Object name (empty if unset)
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Check whether the observed object already has this desired shape
    ///
    /// Only the spec is compared. Deployment and Service specs only need to
    /// contain every field the builder sets, since the API server fills in
    /// defaults. ServiceMonitor specs must be equal.
    ///
    /// Labels are not compared, so a ServiceMonitor whose only change is the
    /// label set for a Prometheus bound after it was created counts as in
    /// sync. The new labels go out with the next replace, which happens on
    /// the first pass where its spec differs.
    pub fn in_sync_with(&self, observed: &ChildResource) -> Result<bool> {
        match (self, observed) {
            (Self::Workload(want), Self::Workload(have)) => {
                is_subset_of(&want.spec, &have.spec, ChildKind::Workload.kind_name())
            }
            (Self::Network(want), Self::Network(have)) => {
                is_subset_of(&want.spec, &have.spec, ChildKind::Network.kind_name())
            }
            (Self::ScrapeTarget(want), Self::ScrapeTarget(have)) => Ok(want.spec == have.spec),
            _ => Err(Error::serialization_for_kind(
                self.kind().kind_name(),
                format!("cannot compare with a {}", observed.kind()),
            )),
        }
    }

    /// Carry the observed version token, labels and annotations forward
    pub fn merge_forward(&mut self, observed: &ChildResource) {
        merge_metadata(self.metadata_mut(), observed.metadata());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pushgateway;
    use std::collections::BTreeMap;

    fn desired(kind: ChildKind) -> ChildResource {
        let mut pgw = pushgateway("a", "ns");
        pgw.spec.replicas = Some(2);
        kind.build(&pgw, &PushgatewayStatus::default(), &ResourceDefaults::default())
    }

    #[test]
    fn kinds_share_the_instance_suffix() {
        for kind in ChildKind::ALL {
            assert_eq!(kind.object_name("a"), "a-pushgateway");
            assert_eq!(desired(kind).name(), "a-pushgateway");
            assert_eq!(desired(kind).kind(), kind);
        }
    }

    #[test]
    fn server_defaulted_deployment_is_in_sync() {
        let want = desired(ChildKind::Workload);
        let mut live = want.clone();
        if let ChildResource::Workload(d) = &mut live {
            let spec = d.spec.as_mut().unwrap();
            spec.revision_history_limit = Some(10);
            spec.progress_deadline_seconds = Some(600);
            let pod = spec.template.spec.as_mut().unwrap();
            pod.dns_policy = Some("ClusterFirst".to_string());
            pod.containers[0].image_pull_policy = Some("Always".to_string());
            d.metadata.resource_version = Some("12".to_string());
        }

        assert!(want.in_sync_with(&live).unwrap());
    }

    #[test]
    fn replica_drift_is_detected() {
        let want = desired(ChildKind::Workload);
        let mut live = want.clone();
        if let ChildResource::Workload(d) = &mut live {
            d.spec.as_mut().unwrap().replicas = Some(1);
        }

        assert!(!want.in_sync_with(&live).unwrap());
    }

    #[test]
    fn service_monitor_requires_exact_spec() {
        let want = desired(ChildKind::ScrapeTarget);
        let mut live = want.clone();
        assert!(want.in_sync_with(&live).unwrap());

        if let ChildResource::ScrapeTarget(sm) = &mut live {
            sm.spec.endpoints[0].interval = Some("30s".to_string());
        }
        assert!(!want.in_sync_with(&live).unwrap());
    }

    #[test]
    fn metadata_differences_do_not_count_as_drift() {
        let want = desired(ChildKind::Network);
        let mut live = want.clone();
        if let ChildResource::Network(s) = &mut live {
            s.metadata.annotations = Some(BTreeMap::from([(
                "kubectl.kubernetes.io/last-applied-configuration".to_string(),
                "{}".to_string(),
            )]));
        }
        assert!(want.in_sync_with(&live).unwrap());
    }

    #[test]
    fn label_only_service_monitor_change_is_in_sync() {
        let mut want = desired(ChildKind::ScrapeTarget);
        let live = want.clone();
        if let ChildResource::ScrapeTarget(sm) = &mut want {
            sm.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("release".to_string(), "kube-prometheus".to_string());
        }

        assert!(want.in_sync_with(&live).unwrap());
    }

    #[test]
    fn mismatched_kinds_cannot_be_compared() {
        let err = desired(ChildKind::Workload)
            .in_sync_with(&desired(ChildKind::Network))
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn merge_forward_keeps_version_and_unmanaged_annotation() {
        let mut want = desired(ChildKind::Workload);
        let mut live = want.clone();
        if let ChildResource::Workload(d) = &mut live {
            d.metadata.resource_version = Some("99".to_string());
            d.metadata.annotations = Some(BTreeMap::from([(
                "deployment.kubernetes.io/revision".to_string(),
                "4".to_string(),
            )]));
        }

        want.merge_forward(&live);

        let meta = want.metadata();
        assert_eq!(meta.resource_version.as_deref(), Some("99"));
        assert_eq!(
            meta.annotations
                .as_ref()
                .and_then(|a| a.get("deployment.kubernetes.io/revision"))
                .map(String::as_str),
            Some("4")
        );
    }
}
