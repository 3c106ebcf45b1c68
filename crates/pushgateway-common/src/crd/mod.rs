//! Custom Resource Definitions used by the Pushgateway operator
//!
//! `Pushgateway` is owned by this operator. `Prometheus` and `ServiceMonitor`
//! belong to prometheus-operator and are modelled only as far as needed.

mod prometheus;
mod pushgateway;
mod service_monitor;

pub use prometheus::{Prometheus, PrometheusSpec};
pub use pushgateway::{
    LogFormat, LogLevel, MetadataOverride, PrometheusRef, Pushgateway, PushgatewaySpec,
    PushgatewayStatus, ServiceMonitorOverride,
};
pub use service_monitor::{
    Endpoint, NamespaceSelector, RelabelConfig, ServiceMonitor, ServiceMonitorSpec,
};
