//! CRD installation using server-side apply

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use pushgateway_common::crd::Pushgateway;
use pushgateway_common::FIELD_MANAGER;

/// Pushgateway CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&Pushgateway::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}

/// Install or update the Pushgateway CRD
///
/// Prometheus and ServiceMonitor belong to the Prometheus operator and are
/// never installed from here.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = Pushgateway::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();

    tracing::info!("Installing {} CRD...", name);
    crds.patch(&name, &params, &Patch::Apply(&crd))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;

    tracing::info!("Pushgateway CRD installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_yaml_describes_the_pushgateway_kind() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("name: pushgateways.monitoring.coreos.com"));
        assert!(yaml.contains("kind: Pushgateway"));
        assert!(yaml.contains("scope: Namespaced"));
    }
}
