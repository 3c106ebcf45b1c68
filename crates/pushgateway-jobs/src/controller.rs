//! Job and CronJob injection controller
//!
//! Workloads labelled for injection get the push address of the single
//! Pushgateway in their namespace. Pod templates are immutable on Jobs, so a
//! changed workload is deleted and created again; the create is retried while
//! the old object is still being removed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, instrument};

use pushgateway_common::crd::Pushgateway;
use pushgateway_common::kube_utils::with_timeout;
use pushgateway_common::retry::retry_while;
use pushgateway_common::{Error, InjectionConfig, ResourceDefaults, Result};
use pushgateway_resources::PushTarget;

use crate::inject::{inject, BatchWorkload, WorkloadKind};

/// Cluster Store operations the injection controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobKubeClient: Send + Sync {
    /// List Pushgateways in a namespace
    async fn list_pushgateways(&self, namespace: &str) -> Result<Vec<Pushgateway>>;

    /// Get a Job or CronJob; `None` if it does not exist
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BatchWorkload>>;

    /// Delete a workload with background propagation
    async fn delete_workload(&self, workload: &BatchWorkload) -> Result<()>;

    /// Create a workload
    async fn create_workload(&self, workload: &BatchWorkload) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct JobKubeClientImpl {
    client: Client,
}

impl JobKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn not_found_as_none<K>(result: std::result::Result<K, kube::Error>) -> Result<Option<K>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl JobKubeClient for JobKubeClientImpl {
    async fn list_pushgateways(&self, namespace: &str) -> Result<Vec<Pushgateway>> {
        let api: Api<Pushgateway> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BatchWorkload>> {
        Ok(match kind {
            WorkloadKind::Job => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                not_found_as_none(api.get(name).await)?.map(BatchWorkload::Job)
            }
            WorkloadKind::CronJob => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
                not_found_as_none(api.get(name).await)?.map(BatchWorkload::CronJob)
            }
        })
    }

    async fn delete_workload(&self, workload: &BatchWorkload) -> Result<()> {
        let params = DeleteParams::background();
        match workload {
            BatchWorkload::Job(_) => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), workload.namespace());
                api.delete(workload.name(), &params).await?;
            }
            BatchWorkload::CronJob(_) => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), workload.namespace());
                api.delete(workload.name(), &params).await?;
            }
        }
        Ok(())
    }

    async fn create_workload(&self, workload: &BatchWorkload) -> Result<()> {
        let params = PostParams::default();
        match workload {
            BatchWorkload::Job(job) => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), workload.namespace());
                api.create(&params, job).await?;
            }
            BatchWorkload::CronJob(cron_job) => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), workload.namespace());
                api.create(&params, cron_job).await?;
            }
        }
        Ok(())
    }
}

/// Shared state for the injection controllers
pub struct JobContext {
    /// Cluster Store access
    pub kube: Arc<dyn JobKubeClient>,
    /// Defaults used to derive a Pushgateway's Service port and path
    pub defaults: ResourceDefaults,
    /// Timeouts and the recreate retry policy
    pub config: InjectionConfig,
}

impl JobContext {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn JobKubeClient>,
        defaults: ResourceDefaults,
        config: InjectionConfig,
    ) -> Self {
        Self {
            kube,
            defaults,
            config,
        }
    }

    /// Create a context backed by a real Kubernetes client
    pub fn from_client(client: Client, defaults: ResourceDefaults, config: InjectionConfig) -> Self {
        Self::new(Arc::new(JobKubeClientImpl::new(client)), defaults, config)
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn JobKubeClient>) -> Self {
        Self::new(kube, ResourceDefaults::default(), InjectionConfig::default())
    }
}

/// Reconcile a Job
#[instrument(skip(job, ctx), fields(workload = %job.name_any()))]
pub async fn reconcile_job(job: Arc<Job>, ctx: Arc<JobContext>) -> Result<Action> {
    reconcile_workload(WorkloadKind::Job, job.as_ref(), &ctx).await
}

/// Reconcile a CronJob
#[instrument(skip(cron_job, ctx), fields(workload = %cron_job.name_any()))]
pub async fn reconcile_cron_job(cron_job: Arc<CronJob>, ctx: Arc<JobContext>) -> Result<Action> {
    reconcile_workload(WorkloadKind::CronJob, cron_job.as_ref(), &ctx).await
}

async fn reconcile_workload<K: ResourceExt>(
    kind: WorkloadKind,
    obj: &K,
    ctx: &JobContext,
) -> Result<Action> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let key = format!("{}/{}", namespace, name);
    let timeout = ctx.config.api_timeout;

    let current = with_timeout(
        timeout,
        "get workload",
        ctx.kube.get_workload(kind, &name, &namespace),
    )
    .await
    .map_err(|e| e.in_step(&key, format!("get {}", kind)))?;

    let Some(workload) = current else {
        debug!("{} no longer exists", kind);
        return Ok(Action::await_change());
    };
    if !workload.is_injectable() {
        debug!("{} is not labelled for injection", kind);
        return Ok(Action::await_change());
    }

    let target = resolve_push_target(&workload, ctx).await?;
    let (patched, changed) = inject(&workload, &target);
    if !changed {
        debug!("{} already carries the push address", kind);
        return Ok(Action::await_change());
    }

    with_timeout(
        timeout,
        "delete workload",
        ctx.kube.delete_workload(&workload),
    )
    .await
    .map_err(|e| e.in_step(&key, format!("delete {}", kind)))?;

    recreate(&patched, ctx).await?;

    info!(kind = %kind, workload = %key, "Injected push address");
    Ok(Action::await_change())
}

/// The Pushgateway a workload pushes to: the only one in its namespace
async fn resolve_push_target(workload: &BatchWorkload, ctx: &JobContext) -> Result<PushTarget> {
    let key = workload.key();
    let namespace = workload.namespace();
    let pushgateways = with_timeout(
        ctx.config.api_timeout,
        "list Pushgateways",
        ctx.kube.list_pushgateways(namespace),
    )
    .await
    .map_err(|e| e.in_step(&key, "list Pushgateways"))?;

    match pushgateways.as_slice() {
        [pgw] => Ok(PushTarget::for_pushgateway(pgw, &ctx.defaults)),
        [] => Err(Error::injection(
            &key,
            format!("no Pushgateway found in namespace {}", namespace),
        )),
        _ => Err(Error::injection(
            &key,
            format!("more than one Pushgateway found in namespace {}", namespace),
        )),
    }
}

/// Create `patched`, waiting out the deletion of its predecessor
async fn recreate(patched: &BatchWorkload, ctx: &JobContext) -> Result<()> {
    let key = patched.key();
    let retry = &ctx.config.recreate_retry;
    let operation = format!("create {}", patched.kind());

    let created = retry_while(
        retry,
        &operation,
        || with_timeout(ctx.config.api_timeout, &operation, ctx.kube.create_workload(patched)),
        Error::is_already_exists,
    )
    .await;

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => Err(Error::injection(
            &key,
            format!(
                "previous {} still exists after {} create attempts",
                patched.kind(),
                retry.max_attempts
            ),
        )),
        Err(e) => Err(e.in_step(&key, operation)),
    }
}

/// Error policy for the injection controllers
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, _ctx: Arc<JobContext>) -> Action {
    error!(
        ?error,
        workload = %obj.name_any(),
        namespace = ?obj.namespace(),
        retryable = error.is_retryable(),
        "injection failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use kube::api::ObjectMeta;
    use pushgateway_common::crd::PushgatewaySpec;
    use pushgateway_common::error::api_error;
    use pushgateway_common::{INJECT_LABEL, PUSHGATEWAY_ENV_VAR};

    fn labelled_job(name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some("12".to_string()),
                labels: Some(BTreeMap::from([(INJECT_LABEL.to_string(), "true".to_string())])),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".to_string(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn pushgateway(name: &str) -> Pushgateway {
        let mut pgw = Pushgateway::new(
            name,
            PushgatewaySpec {
                port: Some(9200),
                ..Default::default()
            },
        );
        pgw.metadata.namespace = Some("ns".to_string());
        pgw
    }

    fn mock_with(job: Job, pushgateways: Vec<Pushgateway>) -> MockJobKubeClient {
        let mut mock = MockJobKubeClient::new();
        mock.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(BatchWorkload::Job(job.clone()))));
        mock.expect_list_pushgateways()
            .returning(move |_| Ok(pushgateways.clone()));
        mock
    }

    fn push_address(workload: &BatchWorkload) -> Option<String> {
        workload.containers()[0]
            .env
            .iter()
            .flatten()
            .find(|v| v.name == PUSHGATEWAY_ENV_VAR)
            .and_then(|v| v.value.clone())
    }

    #[tokio::test]
    async fn story_labelled_job_is_recreated_with_push_address() {
        let job = labelled_job("backup");
        let mut mock = mock_with(job.clone(), vec![pushgateway("pgw")]);
        mock.expect_delete_workload().times(1).returning(|w| {
            assert_eq!(w.metadata().resource_version.as_deref(), Some("12"));
            Ok(())
        });
        mock.expect_create_workload().times(1).returning(|w| {
            assert_eq!(
                push_address(w).as_deref(),
                Some("http://pgw-pushgateway:9200/metrics/job/backup")
            );
            assert_eq!(w.metadata().resource_version.as_deref(), None);
            Ok(())
        });

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let action = reconcile_job(Arc::new(job), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_already_injected_job_is_left_alone() {
        let job = labelled_job("backup");
        let target = PushTarget::for_pushgateway(&pushgateway("pgw"), &ResourceDefaults::default());
        let (BatchWorkload::Job(injected), true) = inject(&BatchWorkload::Job(job), &target) else {
            panic!("expected the first injection to change the Job");
        };

        // no delete or create expectations: any mutation panics
        let mock = mock_with(injected.clone(), vec![pushgateway("pgw")]);
        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));

        let action = reconcile_job(Arc::new(injected), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_unlabelled_job_is_ignored() {
        let mut job = labelled_job("backup");
        job.metadata.labels = None;

        let mut mock = MockJobKubeClient::new();
        let fetched = job.clone();
        mock.expect_get_workload()
            .returning(move |_, _, _| Ok(Some(BatchWorkload::Job(fetched.clone()))));

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let action = reconcile_job(Arc::new(job), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_deleted_job_is_a_no_op() {
        let mut mock = MockJobKubeClient::new();
        mock.expect_get_workload().returning(|_, _, _| Ok(None));

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let action = reconcile_job(Arc::new(labelled_job("gone")), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn story_namespace_without_pushgateway_is_reported() {
        let job = labelled_job("backup");
        let mock = mock_with(job.clone(), vec![]);
        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));

        let err = reconcile_job(Arc::new(job), ctx.clone()).await.unwrap_err();
        assert!(err.to_string().contains("no Pushgateway found in namespace ns"));
        assert!(err.is_retryable());

        let action = error_policy(Arc::new(labelled_job("backup")), &err, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn story_ambiguous_pushgateway_is_reported() {
        let job = labelled_job("backup");
        let mock = mock_with(job.clone(), vec![pushgateway("a"), pushgateway("b")]);
        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));

        let err = reconcile_job(Arc::new(job), ctx).await.unwrap_err();
        assert!(err.to_string().contains("more than one Pushgateway"));
    }

    #[tokio::test(start_paused = true)]
    async fn story_create_waits_for_previous_deletion() {
        let job = labelled_job("backup");
        let mut mock = mock_with(job.clone(), vec![pushgateway("pgw")]);
        mock.expect_delete_workload().times(1).returning(|_| Ok(()));

        let mut seq = mockall::Sequence::new();
        mock.expect_create_workload()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(api_error(409, "AlreadyExists", "job is terminating").into()));
        mock.expect_create_workload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let start = tokio::time::Instant::now();
        let action = reconcile_job(Arc::new(job), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn story_recreate_gives_up_after_bounded_attempts() {
        let job = labelled_job("backup");
        let mut mock = mock_with(job.clone(), vec![pushgateway("pgw")]);
        mock.expect_delete_workload().times(1).returning(|_| Ok(()));
        mock.expect_create_workload()
            .times(7)
            .returning(|_| Err(api_error(409, "AlreadyExists", "job is terminating").into()));

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let start = tokio::time::Instant::now();
        let err = reconcile_job(Arc::new(job), ctx).await.unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert!(matches!(err, Error::Injection { .. }));
        assert!(err.to_string().contains("still exists after 7 create attempts"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn story_other_create_errors_are_not_retried() {
        let job = labelled_job("backup");
        let mut mock = mock_with(job.clone(), vec![pushgateway("pgw")]);
        mock.expect_delete_workload().returning(|_| Ok(()));
        mock.expect_create_workload()
            .times(1)
            .returning(|_| Err(api_error(422, "Invalid", "spec.template: invalid").into()));

        let ctx = Arc::new(JobContext::for_testing(Arc::new(mock)));
        let err = reconcile_job(Arc::new(job), ctx.clone()).await.unwrap_err();

        assert!(err.to_string().starts_with("ns/backup: create Job failed"));
        assert!(!err.is_retryable());
        assert_eq!(
            error_policy(Arc::new(labelled_job("backup")), &err, ctx),
            Action::await_change()
        );
    }
}
