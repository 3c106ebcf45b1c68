//! Push address injection into Job and CronJob pod templates
//!
//! Injection is a pure transformation. The controller decides whether to act
//! on the result; re-running [`inject`] on a workload it already patched
//! returns `changed == false`.

use k8s_openapi::api::batch::v1::{CronJob, Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodTemplateSpec};
use kube::api::ObjectMeta;

use pushgateway_common::{GENERATED_JOB_LABELS, INJECT_LABEL, PUSHGATEWAY_ENV_VAR};
use pushgateway_resources::PushTarget;

/// Which batch kind a workload is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// `batch/v1` Job
    Job,
    /// `batch/v1` CronJob
    CronJob,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Job => write!(f, "Job"),
            WorkloadKind::CronJob => write!(f, "CronJob"),
        }
    }
}

/// A Job or CronJob, handled uniformly
#[derive(Clone, Debug, PartialEq)]
pub enum BatchWorkload {
    /// A Job
    Job(Job),
    /// A CronJob
    CronJob(CronJob),
}

impl From<Job> for BatchWorkload {
    fn from(job: Job) -> Self {
        BatchWorkload::Job(job)
    }
}

impl From<CronJob> for BatchWorkload {
    fn from(cron_job: CronJob) -> Self {
        BatchWorkload::CronJob(cron_job)
    }
}

impl BatchWorkload {
    /// Kind of this workload
    pub fn kind(&self) -> WorkloadKind {
        match self {
            BatchWorkload::Job(_) => WorkloadKind::Job,
            BatchWorkload::CronJob(_) => WorkloadKind::CronJob,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            BatchWorkload::Job(j) => &j.metadata,
            BatchWorkload::CronJob(c) => &c.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            BatchWorkload::Job(j) => &mut j.metadata,
            BatchWorkload::CronJob(c) => &mut c.metadata,
        }
    }

    /// Object name; also the push job identifier
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    /// Whether the workload opted in to injection (presence of the label, any value)
    pub fn is_injectable(&self) -> bool {
        self.metadata()
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(INJECT_LABEL))
    }

    fn job_spec(&self) -> Option<&JobSpec> {
        match self {
            BatchWorkload::Job(j) => j.spec.as_ref(),
            BatchWorkload::CronJob(c) => c.spec.as_ref()?.job_template.spec.as_ref(),
        }
    }

    fn job_spec_mut(&mut self) -> Option<&mut JobSpec> {
        match self {
            BatchWorkload::Job(j) => j.spec.as_mut(),
            BatchWorkload::CronJob(c) => c.spec.as_mut()?.job_template.spec.as_mut(),
        }
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.job_spec_mut().map(|spec| &mut spec.template)
    }

    /// Containers of the pod template
    pub fn containers(&self) -> &[Container] {
        self.job_spec()
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| pod.containers.as_slice())
            .unwrap_or_default()
    }

    fn containers_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.pod_template_mut()
            .and_then(|template| template.spec.as_mut())
            .into_iter()
            .flat_map(|pod| pod.containers.iter_mut())
    }

    /// Drop the fields the API server generated for this object, so the
    /// workload can be created again under the same name
    fn clear_generated_identity(&mut self) {
        let meta = self.metadata_mut();
        meta.resource_version = None;
        meta.uid = None;
        meta.creation_timestamp = None;
        meta.managed_fields = None;

        match self {
            BatchWorkload::Job(job) => job.status = None,
            BatchWorkload::CronJob(cron_job) => {
                if let Some(spec) = cron_job.spec.as_mut() {
                    strip_generated_labels(spec.job_template.metadata.as_mut());
                }
            }
        }

        if let Some(spec) = self.job_spec_mut() {
            spec.selector = None;
            strip_generated_labels(spec.template.metadata.as_mut());
        }
    }
}

fn strip_generated_labels(meta: Option<&mut ObjectMeta>) {
    if let Some(labels) = meta.and_then(|m| m.labels.as_mut()) {
        for label in GENERATED_JOB_LABELS {
            labels.remove(*label);
        }
    }
}

fn has_push_address(container: &Container, url: &str) -> bool {
    container.env.as_ref().is_some_and(|env| {
        env.iter()
            .any(|var| var.name == PUSHGATEWAY_ENV_VAR && var.value.as_deref() == Some(url))
    })
}

/// Make every container of `workload` carry the push address for `target`
///
/// Containers that already have the exact variable are left alone. When any
/// container was changed, the returned workload also has its generated
/// identity cleared, ready for delete-then-create.
pub fn inject(workload: &BatchWorkload, target: &PushTarget) -> (BatchWorkload, bool) {
    let url = target.push_url(workload.name());
    let mut patched = workload.clone();
    let mut changed = false;

    for container in patched.containers_mut() {
        if has_push_address(container, &url) {
            continue;
        }
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: PUSHGATEWAY_ENV_VAR.to_string(),
            value: Some(url.clone()),
            ..Default::default()
        });
        changed = true;
    }

    if changed {
        patched.clear_generated_identity();
    }
    (patched, changed)
}
