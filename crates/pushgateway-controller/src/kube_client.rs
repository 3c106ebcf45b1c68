//! Cluster Store access for the Pushgateway controller
//!
//! The reconcile logic only talks to [`PushgatewayKubeClient`], so tests can
//! swap in a mock or an in-memory store.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use pushgateway_common::crd::{Prometheus, Pushgateway, PushgatewayStatus, ServiceMonitor};
use pushgateway_common::{Result, FIELD_MANAGER};

use crate::child::{ChildKind, ChildResource};

/// Operations the Pushgateway controller performs against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PushgatewayKubeClient: Send + Sync {
    /// Get a Pushgateway; `None` if it does not exist
    async fn get_pushgateway(&self, name: &str, namespace: &str) -> Result<Option<Pushgateway>>;

    /// Merge-patch the status sub-resource of a Pushgateway
    async fn patch_pushgateway_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PushgatewayStatus,
    ) -> Result<()>;

    /// Get a Prometheus; `None` if it does not exist
    async fn get_prometheus(&self, name: &str, namespace: &str) -> Result<Option<Prometheus>>;

    /// List Prometheus instances in a namespace
    async fn list_prometheuses(&self, namespace: &str) -> Result<Vec<Prometheus>>;

    /// Get a child object; `None` if it does not exist
    async fn get_child(
        &self,
        kind: ChildKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ChildResource>>;

    /// Create a child object
    async fn create_child(&self, child: &ChildResource) -> Result<()>;

    /// Replace a child object; fails with 409 if its version token is stale
    async fn replace_child(&self, child: &ChildResource) -> Result<()>;
}

/// Merge-patch body for a status write
///
/// Every status field is spelled out, with `null` for the unset ones: a
/// JSON merge patch leaves absent keys untouched, so skipping `None` would
/// leave a stale selector behind once the Prometheus goes away.
pub fn status_merge_patch(status: &PushgatewayStatus) -> serde_json::Value {
    let PushgatewayStatus {
        prometheus,
        prometheus_service_monitor_selector,
        image,
    } = status;

    serde_json::json!({
        "status": {
            "prometheus": prometheus,
            "prometheusServiceMonitorSelector": prometheus_service_monitor_selector,
            "image": image,
        }
    })
}

/// Real Kubernetes client implementation
pub struct PushgatewayKubeClientImpl {
    client: Client,
}

impl PushgatewayKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, name: &str, namespace: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let namespace = obj.meta().namespace.as_deref().unwrap_or_default();
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await?;
        Ok(())
    }

    async fn replace<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let meta = obj.meta();
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), obj)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PushgatewayKubeClient for PushgatewayKubeClientImpl {
    async fn get_pushgateway(&self, name: &str, namespace: &str) -> Result<Option<Pushgateway>> {
        self.get_opt(name, namespace).await
    }

    async fn patch_pushgateway_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PushgatewayStatus,
    ) -> Result<()> {
        let api: Api<Pushgateway> = self.api(namespace);
        let status_patch = status_merge_patch(status);

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_prometheus(&self, name: &str, namespace: &str) -> Result<Option<Prometheus>> {
        self.get_opt(name, namespace).await
    }

    async fn list_prometheuses(&self, namespace: &str) -> Result<Vec<Prometheus>> {
        let api: Api<Prometheus> = self.api(namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_child(
        &self,
        kind: ChildKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ChildResource>> {
        Ok(match kind {
            ChildKind::Workload => self
                .get_opt::<Deployment>(name, namespace)
                .await?
                .map(ChildResource::Workload),
            ChildKind::Network => self
                .get_opt::<Service>(name, namespace)
                .await?
                .map(ChildResource::Network),
            ChildKind::ScrapeTarget => self
                .get_opt::<ServiceMonitor>(name, namespace)
                .await?
                .map(ChildResource::ScrapeTarget),
        })
    }

    async fn create_child(&self, child: &ChildResource) -> Result<()> {
        match child {
            ChildResource::Workload(d) => self.create(d).await,
            ChildResource::Network(s) => self.create(s).await,
            ChildResource::ScrapeTarget(sm) => self.create(sm).await,
        }
    }

    async fn replace_child(&self, child: &ChildResource) -> Result<()> {
        match child {
            ChildResource::Workload(d) => self.replace(d).await,
            ChildResource::Network(s) => self.replace(s).await,
            ChildResource::ScrapeTarget(sm) => self.replace(sm).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use serde_json::{json, Value};

    #[test]
    fn unset_status_fields_are_sent_as_null() {
        let status = PushgatewayStatus {
            prometheus: Some("N/A".to_string()),
            prometheus_service_monitor_selector: None,
            image: Some("prom/pushgateway:v1.9.0".to_string()),
        };

        let patch = status_merge_patch(&status);
        assert_eq!(
            patch,
            json!({
                "status": {
                    "prometheus": "N/A",
                    "prometheusServiceMonitorSelector": null,
                    "image": "prom/pushgateway:v1.9.0",
                }
            })
        );
        assert_eq!(patch["status"].get("prometheusServiceMonitorSelector"), Some(&Value::Null));
    }

    #[test]
    fn bound_selector_is_sent_in_wire_form() {
        let status = PushgatewayStatus {
            prometheus: Some("monitoring/k8s".to_string()),
            prometheus_service_monitor_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
                ..Default::default()
            }),
            image: None,
        };

        let patch = status_merge_patch(&status);
        assert_eq!(
            patch["status"]["prometheusServiceMonitorSelector"],
            json!({ "matchLabels": { "team": "a" } })
        );
        assert_eq!(patch["status"]["image"], Value::Null);
    }
}
