//! Resolving the Prometheus instance a Pushgateway is bound to

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use tracing::{debug, warn};

use pushgateway_common::crd::{Prometheus, Pushgateway};
use pushgateway_common::kube_utils::{instance_key, with_timeout};
use pushgateway_common::{Error, Result};

use crate::kube_client::PushgatewayKubeClient;

/// The Prometheus a Pushgateway reports to
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPrometheus {
    /// `namespace/name`
    pub identity: String,
    /// Its `serviceMonitorSelector`
    pub service_monitor_selector: Option<LabelSelector>,
}

impl From<&Prometheus> for ResolvedPrometheus {
    fn from(prometheus: &Prometheus) -> Self {
        Self {
            identity: instance_key(prometheus),
            service_monitor_selector: prometheus.spec.service_monitor_selector.clone(),
        }
    }
}

/// Find the Prometheus for `pgw`
///
/// An explicit link must resolve; a missing target is a retryable error. With
/// no link, exactly one Prometheus in the Pushgateway's namespace is used and
/// anything else resolves to `None`.
pub async fn resolve_prometheus(
    pgw: &Pushgateway,
    kube: &dyn PushgatewayKubeClient,
    timeout: Duration,
) -> Result<Option<ResolvedPrometheus>> {
    let key = instance_key(pgw);
    let own_namespace = pgw.namespace().unwrap_or_default();

    pgw.spec.validate().map_err(|e| match e {
        Error::Validation { message, .. } => Error::validation_for(&key, message),
        e => e,
    })?;

    if let Some(link) = &pgw.spec.prometheus {
        let namespace = link
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&own_namespace);

        let found = with_timeout(
            timeout,
            "get Prometheus",
            kube.get_prometheus(&link.name, namespace),
        )
        .await?;

        return match found {
            Some(prometheus) => Ok(Some(ResolvedPrometheus::from(&prometheus))),
            None => Err(Error::dependency_not_found(
                "Prometheus",
                format!("{}/{}", namespace, link.name),
            )),
        };
    }

    let listed = with_timeout(
        timeout,
        "list Prometheus",
        kube.list_prometheuses(&own_namespace),
    )
    .await;

    let candidates = match listed {
        Ok(items) => items,
        Err(e) if e.is_not_found() => {
            debug!(instance = %key, "Prometheus CRD not installed");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match candidates.as_slice() {
        [prometheus] => Ok(Some(ResolvedPrometheus::from(prometheus))),
        [] => {
            warn!(
                instance = %key,
                namespace = %own_namespace,
                "No Prometheus found in namespace, ServiceMonitor labels will not be propagated"
            );
            Ok(None)
        }
        many => {
            warn!(
                instance = %key,
                namespace = %own_namespace,
                count = many.len(),
                "Several Prometheus instances in namespace and none selected, set spec.prometheus"
            );
            Ok(None)
        }
    }
}
