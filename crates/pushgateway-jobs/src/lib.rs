//! Pushgateway address injection for batch workloads
//!
//! Jobs and CronJobs labelled `inject-pushgateway` get a `PUSHGATEWAY`
//! environment variable pointing at the Pushgateway in their namespace.

#![deny(missing_docs)]

pub mod controller;
pub mod inject;

pub use controller::{
    error_policy, reconcile_cron_job, reconcile_job, JobContext, JobKubeClient, JobKubeClientImpl,
};
pub use inject::{inject, BatchWorkload, WorkloadKind};
