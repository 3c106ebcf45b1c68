//! Deployment running the Pushgateway process

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use pushgateway_common::crd::{Pushgateway, PushgatewayStatus};
use pushgateway_common::{
    ResourceDefaults, CONTAINER_NAME, ENABLE_ADMIN_API_ARG, ENABLE_LIFECYCLE_ARG,
    LISTEN_ADDRESS_ARG, LOG_FORMAT_ARG, LOG_LEVEL_ARG, PORT_NAME, TELEMETRY_PATH_ARG,
};

use crate::shared::{
    child_metadata, deployment_name, effective_image, effective_port, effective_replicas,
    instance_labels, selectable_labels, selector_labels,
};

/// Pushgateway command-line arguments
///
/// The order is fixed; reordering would make every pass see drift.
pub fn pushgateway_args(pgw: &Pushgateway, port: i32) -> Vec<String> {
    let spec = &pgw.spec;
    let mut args = vec![format!("{}:{}", LISTEN_ADDRESS_ARG, port)];

    if let Some(path) = spec.telemetry_path.as_deref().filter(|p| !p.is_empty()) {
        args.push(format!("{}{}", TELEMETRY_PATH_ARG, path));
    }
    if spec.enable_admin_api {
        args.push(ENABLE_ADMIN_API_ARG.to_string());
    }
    if spec.enable_lifecycle {
        args.push(ENABLE_LIFECYCLE_ARG.to_string());
    }
    if let Some(level) = spec.log_level {
        args.push(format!("{}{}", LOG_LEVEL_ARG, level));
    }
    if let Some(format) = spec.log_format {
        args.push(format!("{}{}", LOG_FORMAT_ARG, format));
    }

    args
}

/// Build the desired Deployment
pub fn build_deployment(
    pgw: &Pushgateway,
    status: &PushgatewayStatus,
    defaults: &ResourceDefaults,
) -> Deployment {
    let port = effective_port(pgw, defaults);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(effective_image(pgw, status, defaults)),
        args: Some(pushgateway_args(pgw, port)),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: child_metadata(pgw, deployment_name(&pgw.name_any()), instance_labels(pgw)),
        spec: Some(DeploymentSpec {
            replicas: Some(effective_replicas(pgw)),
            selector: LabelSelector {
                match_labels: Some(selector_labels(pgw)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selectable_labels(pgw)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
