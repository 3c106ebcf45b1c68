//! Pushgateway reconciliation
//!
//! One pass:
//! 1. Re-fetch the Pushgateway (gone or terminating: nothing to do)
//! 2. Resolve the bound Prometheus
//! 3. Write status if it changed (best effort)
//! 4. Create or update the Deployment, Service and ServiceMonitor in order
//! 5. Merge the per-kind results into the next requeue

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use pushgateway_common::crd::{Pushgateway, PushgatewayStatus};
use pushgateway_common::kube_utils::{instance_key, with_timeout};
use pushgateway_common::{ControllerConfig, Error, ResourceDefaults, Result, PROMETHEUS_NOT_FOUND};
use pushgateway_resources::effective_image;

use crate::child::ChildKind;
use crate::kube_client::{PushgatewayKubeClient, PushgatewayKubeClientImpl};
use crate::outcome::{ChildAction, ReconcileOutcome};
use crate::prometheus::{resolve_prometheus, ResolvedPrometheus};

/// Shared state for the Pushgateway controller
pub struct Context {
    /// Cluster Store access
    pub kube: Arc<dyn PushgatewayKubeClient>,
    /// Builder defaults
    pub defaults: ResourceDefaults,
    /// Timeouts and requeue delays
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn PushgatewayKubeClient>,
        defaults: ResourceDefaults,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            defaults,
            config,
        }
    }

    /// Create a context backed by a real Kubernetes client
    pub fn from_client(client: Client, defaults: ResourceDefaults, config: ControllerConfig) -> Self {
        Self::new(
            Arc::new(PushgatewayKubeClientImpl::new(client)),
            defaults,
            config,
        )
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn PushgatewayKubeClient>) -> Self {
        Self::new(kube, ResourceDefaults::default(), ControllerConfig::default())
    }

    /// Run one Cluster Store call under the configured timeout, tagging any
    /// failure with the instance and the step
    async fn call<T, F>(&self, key: &str, step: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        with_timeout(self.config.api_timeout, step, call)
            .await
            .map_err(|e| e.in_step(key, step))
    }
}

/// Reconcile a Pushgateway
#[instrument(skip(pgw, ctx), fields(pushgateway = %instance_key(pgw.as_ref())))]
pub async fn reconcile(pgw: Arc<Pushgateway>, ctx: Arc<Context>) -> Result<Action> {
    let name = pgw.name_any();
    let key = instance_key(pgw.as_ref());
    let namespace = pgw
        .namespace()
        .ok_or_else(|| Error::validation_for(&key, "Pushgateway must be namespaced"))?;

    let current = ctx
        .call(&key, "get Pushgateway", ctx.kube.get_pushgateway(&name, &namespace))
        .await?;

    let current = match current {
        Some(p) if p.metadata.deletion_timestamp.is_none() => p,
        Some(_) => {
            debug!("Pushgateway is being deleted, children are garbage collected");
            return Ok(Action::await_change());
        }
        None => {
            debug!("Pushgateway no longer exists");
            return Ok(Action::await_change());
        }
    };

    let outcome = reconcile_pass(&current, &ctx).await?;
    Ok(outcome.into_action(&ctx.config))
}

/// Run one pass for an existing Pushgateway
pub async fn reconcile_pass(pgw: &Pushgateway, ctx: &Context) -> Result<ReconcileOutcome> {
    let key = instance_key(pgw);
    let resolved = resolve_prometheus(pgw, ctx.kube.as_ref(), ctx.config.api_timeout)
        .await
        .map_err(|e| match e {
            Error::Validation { .. } => e,
            e => e.in_step(&key, "resolve Prometheus"),
        })?;

    let status = desired_status(pgw, resolved.as_ref(), &ctx.defaults);
    write_status_if_changed(pgw, &status, ctx).await;

    let mut outcome = ReconcileOutcome::default();
    for kind in ChildKind::ALL {
        let action = reconcile_child(kind, pgw, &status, ctx).await?;
        outcome = outcome.merge(action.outcome());
    }

    debug!(requeue = outcome.requeue, "Pass complete");
    Ok(outcome)
}

/// Bring one child in line with its desired shape
async fn reconcile_child(
    kind: ChildKind,
    pgw: &Pushgateway,
    status: &PushgatewayStatus,
    ctx: &Context,
) -> Result<ChildAction> {
    let key = instance_key(pgw);
    let namespace = pgw.namespace().unwrap_or_default();
    let mut desired = kind.build(pgw, status, &ctx.defaults);
    let name = desired.name().to_string();

    let observed = ctx
        .call(
            &key,
            &format!("get {}", kind),
            ctx.kube.get_child(kind, &name, &namespace),
        )
        .await?;

    let Some(observed) = observed else {
        ctx.call(&key, &format!("create {}", kind), ctx.kube.create_child(&desired))
            .await?;
        info!(kind = %kind, name = %name, "Created");
        return Ok(ChildAction::Created);
    };

    if desired
        .in_sync_with(&observed)
        .map_err(|e| e.in_step(&key, format!("compare {}", kind)))?
    {
        debug!(kind = %kind, name = %name, "In sync");
        return Ok(ChildAction::InSync);
    }

    desired.merge_forward(&observed);
    ctx.call(&key, &format!("update {}", kind), ctx.kube.replace_child(&desired))
        .await?;
    info!(kind = %kind, name = %name, "Updated drifted object");
    Ok(ChildAction::Updated)
}

/// Status for this pass
///
/// The effective image is resolved against the previous status so that an
/// instance keeps its image when the operator default changes.
pub fn desired_status(
    pgw: &Pushgateway,
    resolved: Option<&ResolvedPrometheus>,
    defaults: &ResourceDefaults,
) -> PushgatewayStatus {
    let previous = pgw.status.clone().unwrap_or_default();
    PushgatewayStatus {
        prometheus: Some(
            resolved
                .map(|p| p.identity.clone())
                .unwrap_or_else(|| PROMETHEUS_NOT_FOUND.to_string()),
        ),
        prometheus_service_monitor_selector: resolved
            .and_then(|p| p.service_monitor_selector.clone()),
        image: Some(effective_image(pgw, &previous, defaults)),
    }
}

/// Patch status when it differs; failures are logged, never returned
async fn write_status_if_changed(pgw: &Pushgateway, status: &PushgatewayStatus, ctx: &Context) {
    if pgw.status.as_ref() == Some(status) {
        return;
    }

    let key = instance_key(pgw);
    let name = pgw.name_any();
    let namespace = pgw.namespace().unwrap_or_default();
    match ctx
        .call(
            &key,
            "patch status",
            ctx.kube.patch_pushgateway_status(&name, &namespace, status),
        )
        .await
    {
        Ok(()) => debug!(prometheus = ?status.prometheus, "Status updated"),
        Err(e) => warn!(error = %e, "Failed to update Pushgateway status"),
    }
}

/// Error policy for the Pushgateway controller
///
/// Retryable errors requeue after 30 seconds; the rest wait for a spec change.
pub fn error_policy(pgw: Arc<Pushgateway>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        pushgateway = %instance_key(pgw.as_ref()),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}
