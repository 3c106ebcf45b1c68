//! Controller runner - builds the controller futures the binary drives
//!
//! Each `build_*` function returns boxed futures so `main` can decide which
//! controllers to run and join them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use pushgateway_common::crd::{Pushgateway, ServiceMonitor};
use pushgateway_common::{ControllerConfig, InjectionConfig, ResourceDefaults, INJECT_LABEL};
use pushgateway_controller::{error_policy, reconcile, Context};
use pushgateway_jobs::{
    error_policy as injection_error_policy, reconcile_cron_job, reconcile_job, JobContext,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Api for all namespaces, or just one when the operator is scoped
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the Pushgateway controller
///
/// Changes to owned Deployments, Services and ServiceMonitors trigger the
/// owning Pushgateway, so drift is corrected without waiting for a resync.
pub fn build_pushgateway_controller(
    client: Client,
    namespace: Option<&str>,
    defaults: ResourceDefaults,
    config: ControllerConfig,
) -> ControllerFuture {
    let ctx = Arc::new(Context::from_client(client.clone(), defaults, config));
    let pushgateways: Api<Pushgateway> = scoped_api(&client, namespace);

    tracing::info!("- Pushgateway controller");

    Box::pin(
        Controller::new(pushgateways, watcher_config())
            .owns(scoped_api::<Deployment>(&client, namespace), watcher_config())
            .owns(scoped_api::<Service>(&client, namespace), watcher_config())
            .owns(scoped_api::<ServiceMonitor>(&client, namespace), watcher_config())
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Pushgateway")),
    )
}

/// Build the Job and CronJob injection controllers
///
/// Only workloads carrying the opt-in label are watched.
pub fn build_injection_controllers(
    client: Client,
    namespace: Option<&str>,
    defaults: ResourceDefaults,
    config: InjectionConfig,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(JobContext::from_client(client.clone(), defaults, config));
    let labelled = || watcher_config().labels(INJECT_LABEL);

    tracing::info!("- Job injection controller");
    let jobs = Controller::new(scoped_api::<Job>(&client, namespace), labelled())
        .shutdown_on_signal()
        .run(reconcile_job, injection_error_policy::<Job>, ctx.clone())
        .for_each(log_reconcile_result("Job"));

    tracing::info!("- CronJob injection controller");
    let cron_jobs = Controller::new(scoped_api::<CronJob>(&client, namespace), labelled())
        .shutdown_on_signal()
        .run(reconcile_cron_job, injection_error_policy::<CronJob>, ctx)
        .for_each(log_reconcile_result("CronJob"));

    vec![Box::pin(jobs), Box::pin(cron_jobs)]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
