//! Pushgateway CRD types
//!
//! A `Pushgateway` describes one managed Prometheus Pushgateway: the
//! Deployment running it, the headless Service in front of it, and the
//! ServiceMonitor that lets a Prometheus instance scrape it.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::service_monitor::Endpoint;
use crate::Error;

// =============================================================================
// Logging
// =============================================================================

/// Log level passed to the Pushgateway process
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log format passed to the Pushgateway process
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// logfmt key=value lines
    Logfmt,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logfmt => write!(f, "logfmt"),
            Self::Json => write!(f, "json"),
        }
    }
}

// =============================================================================
// Links and overrides
// =============================================================================

/// Prometheus instance that should scrape this Pushgateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusRef {
    /// Prometheus name
    pub name: String,

    /// Prometheus namespace; defaults to the Pushgateway's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Labels and annotations added to generated metadata
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataOverride {
    /// Extra labels; win over generated ones
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Adjustments to the generated ServiceMonitor
///
/// Port, path, scheme, honorLabels and honorTimestamps of the endpoint are
/// always set by the operator, whatever the override says.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorOverride {
    /// Metadata merged into the generated metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_overrides: Option<MetadataOverride>,

    /// Endpoint used in place of the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_overrides: Option<Endpoint>,
}

// =============================================================================
// CRD
// =============================================================================

/// Desired state of a Prometheus Pushgateway
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1alpha1",
    kind = "Pushgateway",
    plural = "pushgateways",
    shortname = "pgw",
    derive = "PartialEq",
    namespaced,
    status = "PushgatewayStatus",
    printcolumn = r#"{"name":"Prometheus","type":"string","jsonPath":".status.prometheus"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PushgatewaySpec {
    /// Image override; falls back to the operator's default image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Prometheus to bind to; when absent the single Prometheus in the
    /// Pushgateway's namespace is used, if there is exactly one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusRef>,

    /// Replica count (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Enable the admin API (`--web.enable-admin-api`)
    #[serde(default, rename = "enableAdminAPI")]
    pub enable_admin_api: bool,

    /// Enable lifecycle endpoints (`--web.enable-lifecycle`)
    #[serde(default)]
    pub enable_lifecycle: bool,

    /// Listen port (default 9091)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Path to push and expose metrics on (default `/metrics`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_path: Option<String>,

    /// Pushgateway log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Pushgateway log format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Adjustments to the generated ServiceMonitor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_overrides: Option<ServiceMonitorOverride>,
}

impl PushgatewaySpec {
    /// Check invariants the schema cannot express
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(prometheus) = &self.prometheus {
            if prometheus.name.trim().is_empty() {
                return Err(Error::validation("Prometheus name cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Observed state of a Pushgateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushgatewayStatus {
    /// `namespace/name` of the bound Prometheus, or `N/A`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<String>,

    /// ServiceMonitor selector propagated from the bound Prometheus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_service_monitor_selector: Option<LabelSelector>,

    /// Image the Deployment runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn empty_prometheus_name_is_rejected() {
        let spec = PushgatewaySpec {
            prometheus: Some(PrometheusRef {
                name: "  ".to_string(),
                namespace: None,
            }),
            ..Default::default()
        };
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("Prometheus name cannot be empty"));

        assert!(PushgatewaySpec::default().validate().is_ok());
    }

    #[test]
    fn spec_uses_pushgateway_field_names() {
        let spec: PushgatewaySpec = serde_json::from_value(serde_json::json!({
            "enableAdminAPI": true,
            "enableLifecycle": true,
            "telemetryPath": "/push",
            "logLevel": "debug",
            "logFormat": "json",
            "prometheus": {"name": "k8s", "namespace": "monitoring"},
            "serviceMonitorOverrides": {
                "metadataOverrides": {"labels": {"team": "infra"}},
                "endpointOverrides": {"interval": "15s"}
            }
        }))
        .unwrap();

        assert!(spec.enable_admin_api);
        assert!(spec.enable_lifecycle);
        assert_eq!(spec.telemetry_path.as_deref(), Some("/push"));
        assert_eq!(spec.log_level, Some(LogLevel::Debug));
        assert_eq!(spec.log_format, Some(LogFormat::Json));
        let overrides = spec.service_monitor_overrides.unwrap();
        assert_eq!(
            overrides.metadata_overrides.unwrap().labels.get("team").map(String::as_str),
            Some("infra")
        );
        assert_eq!(
            overrides.endpoint_overrides.unwrap().interval.as_deref(),
            Some("15s")
        );
    }

    #[test]
    fn crd_is_namespaced_under_monitoring_group() {
        let crd = Pushgateway::crd();
        assert_eq!(crd.spec.group, "monitoring.coreos.com");
        assert_eq!(crd.spec.names.kind, "Pushgateway");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.versions[0].name, "v1alpha1");
    }

    #[test]
    fn log_options_render_as_process_flags() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogFormat::Logfmt.to_string(), "logfmt");
    }
}
