//! ServiceMonitor (monitoring.coreos.com/v1)
//!
//! Only the subset of the prometheus-operator schema the Pushgateway operator
//! writes or accepts as an override is modelled.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Scrape configuration for a set of Services
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    plural = "servicemonitors",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Service label whose value becomes the `job` label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,

    /// Services to scrape
    pub selector: LabelSelector,

    /// Scrape endpoints on the selected Services
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Namespaces to look for Services in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
}

/// Namespaces a ServiceMonitor selects Services from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Select every namespace
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub any: bool,

    /// Explicit namespace list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

/// A single scrape endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Name of the Service port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// HTTP path to scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// HTTP scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Optional HTTP URL parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,

    /// Scrape interval (e.g. `30s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Scrape timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// Keep labels from the scraped data on collision
    #[serde(default)]
    pub honor_labels: bool,

    /// Keep timestamps from the scraped data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honor_timestamps: Option<bool>,

    /// File holding the bearer token for the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,

    /// Follow HTTP 3xx redirects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,

    /// Allow HTTP/2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_http2: Option<bool>,

    /// Proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Relabelling applied to targets before scraping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabelings: Vec<RelabelConfig>,

    /// Relabelling applied to samples before ingestion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_relabelings: Vec<RelabelConfig>,
}

/// Prometheus relabel rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelabelConfig {
    /// Labels whose values are concatenated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,

    /// Separator placed between concatenated values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,

    /// Label the result is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,

    /// Regex matched against the concatenated value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Modulus for `hashmod`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u64>,

    /// Replacement value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    /// Relabel action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}
