//! Headless Service in front of the Pushgateway pods

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use pushgateway_common::crd::Pushgateway;
use pushgateway_common::{ResourceDefaults, PORT_NAME};

use crate::shared::{
    child_metadata, effective_port, selectable_labels, selector_labels, service_name,
};

/// Build the desired Service
pub fn build_service(pgw: &Pushgateway, defaults: &ResourceDefaults) -> Service {
    Service {
        metadata: child_metadata(pgw, service_name(&pgw.name_any()), selectable_labels(pgw)),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(pgw)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: effective_port(pgw, defaults),
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
