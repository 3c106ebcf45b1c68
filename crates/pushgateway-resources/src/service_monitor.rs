//! ServiceMonitor that lets a Prometheus instance scrape the Pushgateway
//!
//! The monitor's own labels are solved against the bound Prometheus'
//! `serviceMonitorSelector` so the Prometheus discovers it without any
//! configuration on its side. Its `spec.selector` still targets the Service by
//! the plain selector labels.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use tracing::warn;

use pushgateway_common::crd::{
    Endpoint, Pushgateway, PushgatewayStatus, ServiceMonitor, ServiceMonitorSpec,
};
use pushgateway_common::kube_utils::instance_key;
use pushgateway_common::labels::merge_under;
use pushgateway_common::selector::{solve, SelectorExpression};
use pushgateway_common::{
    merge_labels, LabelSet, ResourceDefaults, PORT_NAME, PROMETHEUS_NOT_FOUND,
};

use crate::shared::{
    child_metadata, effective_telemetry_path, instance_labels, selector_labels,
    service_monitor_name,
};

/// Scheme the Pushgateway is always scraped with
pub const SCRAPE_SCHEME: &str = "http";

/// Labels that make the monitor discoverable by the bound Prometheus
///
/// Falls back to the instance labels when no Prometheus is bound or its
/// selector cannot be interpreted.
pub fn discoverable_labels(pgw: &Pushgateway, status: &PushgatewayStatus) -> LabelSet {
    let base = instance_labels(pgw);

    let selector = match (&status.prometheus, &status.prometheus_service_monitor_selector) {
        (Some(prometheus), Some(selector)) if prometheus != PROMETHEUS_NOT_FOUND => selector,
        _ => return base,
    };

    let expression = match SelectorExpression::try_from(selector) {
        Ok(expression) => expression,
        Err(e) => {
            warn!(
                instance = %instance_key(pgw),
                error = %e,
                "Ignoring unusable serviceMonitorSelector"
            );
            return base;
        }
    };

    let solution = solve(&base, &expression);
    if !solution.is_satisfied() {
        warn!(
            instance = %instance_key(pgw),
            unsatisfied = ?solution.unsatisfied,
            "ServiceMonitor labels may not match the Prometheus selector"
        );
    }
    solution.labels
}

/// The scrape endpoint, starting from the override if one is given
///
/// Port, scheme, path, honorLabels and honorTimestamps are always set here.
pub fn scrape_endpoint(pgw: &Pushgateway, defaults: &ResourceDefaults) -> Endpoint {
    let mut endpoint = pgw
        .spec
        .service_monitor_overrides
        .as_ref()
        .and_then(|o| o.endpoint_overrides.clone())
        .unwrap_or_default();

    endpoint.port = Some(PORT_NAME.to_string());
    endpoint.scheme = Some(SCRAPE_SCHEME.to_string());
    endpoint.path = Some(effective_telemetry_path(pgw, defaults));
    endpoint.honor_labels = true;
    endpoint.honor_timestamps = Some(true);
    endpoint
}

/// Build the desired ServiceMonitor
pub fn build_service_monitor(
    pgw: &Pushgateway,
    status: &PushgatewayStatus,
    defaults: &ResourceDefaults,
) -> ServiceMonitor {
    let mut metadata = child_metadata(
        pgw,
        service_monitor_name(&pgw.name_any()),
        discoverable_labels(pgw, status),
    );

    if let Some(overrides) = pgw
        .spec
        .service_monitor_overrides
        .as_ref()
        .and_then(|o| o.metadata_overrides.as_ref())
    {
        let generated = metadata.labels.take().unwrap_or_default();
        metadata.labels = Some(merge_labels([&generated, &overrides.labels]));
        metadata.annotations = merge_under(
            Some(overrides.annotations.clone()),
            metadata.annotations.as_ref(),
        );
    }

    ServiceMonitor {
        metadata,
        spec: ServiceMonitorSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(pgw)),
                ..Default::default()
            },
            endpoints: vec![scrape_endpoint(pgw, defaults)],
            ..Default::default()
        },
    }
}
