//! Values shared by every builder: effective settings, labels, names, and
//! ownership.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use pushgateway_common::crd::{Pushgateway, PushgatewayStatus};
use pushgateway_common::{
    merge_labels, LabelSet, ResourceDefaults, DEPLOYMENT_SUFFIX, LABEL_INSTANCE, LABEL_ROLE,
    LABEL_ROLE_PUSHGATEWAY, SERVICE_MONITOR_SUFFIX, SERVICE_SUFFIX,
};

/// Deployment name for a Pushgateway
pub fn deployment_name(instance: &str) -> String {
    format!("{}{}", instance, DEPLOYMENT_SUFFIX)
}

/// Service name for a Pushgateway
pub fn service_name(instance: &str) -> String {
    format!("{}{}", instance, SERVICE_SUFFIX)
}

/// ServiceMonitor name for a Pushgateway
pub fn service_monitor_name(instance: &str) -> String {
    format!("{}{}", instance, SERVICE_MONITOR_SUFFIX)
}

/// Image the Deployment should run
///
/// `spec.image` if non-empty, else the image recorded in status, else the
/// operator default.
pub fn effective_image(
    pgw: &Pushgateway,
    status: &PushgatewayStatus,
    defaults: &ResourceDefaults,
) -> String {
    [pgw.spec.image.as_deref(), status.image.as_deref()]
        .into_iter()
        .flatten()
        .find(|image| !image.is_empty())
        .unwrap_or(&defaults.image)
        .to_string()
}

/// Port the Pushgateway listens on
pub fn effective_port(pgw: &Pushgateway, defaults: &ResourceDefaults) -> i32 {
    pgw.spec
        .port
        .filter(|port| *port > 0)
        .unwrap_or(defaults.port)
}

/// Path metrics are pushed to and exposed on
pub fn effective_telemetry_path(pgw: &Pushgateway, defaults: &ResourceDefaults) -> String {
    pgw.spec
        .telemetry_path
        .as_deref()
        .filter(|path| !path.is_empty())
        .unwrap_or(&defaults.telemetry_path)
        .to_string()
}

/// Replica count, never below 1
pub fn effective_replicas(pgw: &Pushgateway) -> i32 {
    pgw.spec.replicas.filter(|r| *r > 0).unwrap_or(1)
}

/// Labels used in selectors; stable for the lifetime of the instance
pub fn selector_labels(pgw: &Pushgateway) -> LabelSet {
    LabelSet::from([
        (LABEL_ROLE.to_string(), LABEL_ROLE_PUSHGATEWAY.to_string()),
        (LABEL_INSTANCE.to_string(), pgw.name_any()),
    ])
}

/// Labels put on managed objects: the selector labels with the instance's
/// own labels on top
pub fn instance_labels(pgw: &Pushgateway) -> LabelSet {
    merge_labels([&selector_labels(pgw), pgw.labels()])
}

/// Labels for objects something else selects (pod template, Service)
///
/// Same as [`instance_labels`] except the selector labels are put back on
/// top, so an instance label that shadows `role` cannot detach pods from
/// their Deployment or the Service from its ServiceMonitor.
pub fn selectable_labels(pgw: &Pushgateway) -> LabelSet {
    merge_labels([&instance_labels(pgw), &selector_labels(pgw)])
}

/// Controller back-reference to the owning Pushgateway
///
/// `None` for an instance that was never persisted (no uid), which only
/// happens in tests.
pub fn owner_references(pgw: &Pushgateway) -> Option<Vec<OwnerReference>> {
    pgw.controller_owner_ref(&()).map(|owner| vec![owner])
}

/// Metadata for a managed child object
pub fn child_metadata(pgw: &Pushgateway, name: String, labels: LabelSet) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: pgw.namespace(),
        labels: Some(labels),
        owner_references: owner_references(pgw),
        ..Default::default()
    }
}

/// Where batch workloads push their metrics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushTarget {
    /// Service fronting the Pushgateway
    pub service_name: String,
    /// Service port
    pub port: i32,
    /// Telemetry path
    pub telemetry_path: String,
}

impl PushTarget {
    /// Push target of a Pushgateway instance
    pub fn for_pushgateway(pgw: &Pushgateway, defaults: &ResourceDefaults) -> Self {
        Self {
            service_name: service_name(&pgw.name_any()),
            port: effective_port(pgw, defaults),
            telemetry_path: effective_telemetry_path(pgw, defaults),
        }
    }

    /// Push URL for a job: `http://<service>:<port><path>/job/<job>`
    pub fn push_url(&self, job: &str) -> String {
        format!(
            "http://{}:{}{}/job/{}",
            self.service_name, self.port, self.telemetry_path, job
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pushgateway;

    #[test]
    fn defaults_apply_when_spec_is_empty() {
        let pgw = pushgateway("a", "ns");
        let defaults = ResourceDefaults::default();
        let status = PushgatewayStatus::default();

        assert_eq!(effective_image(&pgw, &status, &defaults), "prom/pushgateway");
        assert_eq!(effective_port(&pgw, &defaults), 9091);
        assert_eq!(effective_telemetry_path(&pgw, &defaults), "/metrics");
        assert_eq!(effective_replicas(&pgw), 1);
    }

    #[test]
    fn image_falls_back_through_status_to_default() {
        let mut pgw = pushgateway("a", "ns");
        let defaults = ResourceDefaults::with_image("registry.local/pgw");
        let status = PushgatewayStatus {
            image: Some("prom/pushgateway:v1.8.0".to_string()),
            ..Default::default()
        };

        assert_eq!(effective_image(&pgw, &status, &defaults), "prom/pushgateway:v1.8.0");

        pgw.spec.image = Some(String::new());
        assert_eq!(effective_image(&pgw, &status, &defaults), "prom/pushgateway:v1.8.0");

        pgw.spec.image = Some("prom/pushgateway:v1.9.0".to_string());
        assert_eq!(effective_image(&pgw, &status, &defaults), "prom/pushgateway:v1.9.0");

        assert_eq!(
            effective_image(&pushgateway("a", "ns"), &PushgatewayStatus::default(), &defaults),
            "registry.local/pgw"
        );
    }

    #[test]
    fn non_positive_port_and_replicas_use_defaults() {
        let mut pgw = pushgateway("a", "ns");
        pgw.spec.port = Some(0);
        pgw.spec.replicas = Some(-3);
        assert_eq!(effective_port(&pgw, &ResourceDefaults::default()), 9091);
        assert_eq!(effective_replicas(&pgw), 1);
    }

    #[test]
    fn instance_labels_take_precedence_over_role_labels() {
        let mut pgw = pushgateway("a", "ns");
        pgw.metadata.labels = Some(
            [("team", "infra"), ("role", "edge-gateway")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );

        let labels = instance_labels(&pgw);
        assert_eq!(labels.get("role").map(String::as_str), Some("edge-gateway"));
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(
            labels.get("app.kubernetes.io/instance").map(String::as_str),
            Some("a")
        );
        assert_eq!(
            selector_labels(&pgw).get("role").map(String::as_str),
            Some("pushgateway")
        );
    }

    #[test]
    fn selected_objects_keep_matching_their_selectors() {
        let mut pgw = pushgateway("a", "ns");
        pgw.metadata.labels = Some(LabelSet::from([
            ("team".to_string(), "infra".to_string()),
            ("role".to_string(), "edge-gateway".to_string()),
        ]));

        let labels = selectable_labels(&pgw);
        assert_eq!(labels.get("role").map(String::as_str), Some("pushgateway"));
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn child_objects_are_owned_by_the_instance() {
        let pgw = pushgateway("a", "ns");
        let meta = child_metadata(&pgw, deployment_name("a"), selector_labels(&pgw));
        let owners = meta.owner_references.unwrap();

        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Pushgateway");
        assert_eq!(owners[0].name, "a");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn push_url_includes_path_and_job_name() {
        let mut pgw = pushgateway("metrics", "batch");
        pgw.spec.port = Some(9092);
        pgw.spec.telemetry_path = Some("/push".to_string());

        let target = PushTarget::for_pushgateway(&pgw, &ResourceDefaults::default());
        assert_eq!(
            target.push_url("nightly-report"),
            "http://metrics-pushgateway:9092/push/job/nightly-report"
        );
    }
}
