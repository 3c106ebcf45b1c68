//! Desired-state builders for Pushgateway child resources
//!
//! Every builder is a pure function of the Pushgateway, the status computed
//! for the current pass, and the operator's [`ResourceDefaults`]. Calling a
//! builder twice with the same inputs yields the same object, which is what
//! keeps reconciliation free of update churn.
//!
//! [`ResourceDefaults`]: pushgateway_common::ResourceDefaults

#![deny(missing_docs)]

mod deployment;
mod service;
mod service_monitor;
mod shared;

pub use deployment::{build_deployment, pushgateway_args};
pub use service::build_service;
pub use service_monitor::{build_service_monitor, discoverable_labels, scrape_endpoint};
pub use shared::{
    deployment_name, effective_image, effective_port, effective_replicas,
    effective_telemetry_path, instance_labels, owner_references, selectable_labels,
    selector_labels, service_monitor_name, service_name, PushTarget,
};
