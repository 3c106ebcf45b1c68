//! Shared Kubernetes utilities
//!
//! Helpers for diffing desired against observed objects, carrying metadata
//! forward on update, and bounding Cluster Store calls in time.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;

use crate::labels::merge_under;
use crate::{Error, Result};

/// `namespace/name` key used in logs, errors, and status
pub fn instance_key<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Carry the observed version token, labels, and annotations into `desired`
///
/// Desired labels and annotations win on key collision; anything else the
/// observed object carries is preserved so unmanaged metadata survives updates.
pub fn merge_metadata(desired: &mut ObjectMeta, observed: &ObjectMeta) {
    desired.resource_version = observed.resource_version.clone();
    desired.labels = merge_under(desired.labels.take(), observed.labels.as_ref());
    desired.annotations = merge_under(desired.annotations.take(), observed.annotations.as_ref());
}

/// Check that every field set in `desired` has the same value in `observed`
///
/// Objects in `observed` may carry extra keys (server-side defaulting).
/// Arrays must have the same length and match element-wise. A `null` in
/// `desired` constrains nothing.
pub fn json_is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Null, _) => true,
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            match have.get(key) {
                Some(live) => json_is_subset(value, live),
                None => value.is_null(),
            }
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len()
                && want
                    .iter()
                    .zip(have.iter())
                    .all(|(value, live)| json_is_subset(value, live))
        }
        (want, have) => want == have,
    }
}

/// Serialize both sides and compare with [`json_is_subset`]
pub fn is_subset_of<T: Serialize>(desired: &T, observed: &T, kind: &str) -> Result<bool> {
    let want = serde_json::to_value(desired)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    let have = serde_json::to_value(observed)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    Ok(json_is_subset(&want, &have))
}

/// Run a Cluster Store call with a time limit
///
/// Expiry drops the call and reports a retryable [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn map(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn merge_metadata_keeps_version_and_unmanaged_annotations() {
        let mut desired = ObjectMeta {
            name: Some("a-pushgateway".into()),
            labels: map(&[("role", "pushgateway")]),
            annotations: map(&[("owner", "operator")]),
            ..Default::default()
        };
        let observed = ObjectMeta {
            name: Some("a-pushgateway".into()),
            resource_version: Some("4711".into()),
            labels: map(&[("role", "stale"), ("team", "infra")]),
            annotations: map(&[("owner", "someone"), ("deployment.kubernetes.io/revision", "3")]),
            ..Default::default()
        };

        merge_metadata(&mut desired, &observed);

        assert_eq!(desired.resource_version.as_deref(), Some("4711"));
        assert_eq!(desired.labels, map(&[("role", "pushgateway"), ("team", "infra")]));
        assert_eq!(
            desired.annotations,
            map(&[("owner", "operator"), ("deployment.kubernetes.io/revision", "3")])
        );
    }

    #[test]
    fn subset_ignores_server_defaults() {
        let desired = json!({"replicas": 2, "template": {"spec": {"containers": [{"name": "pushgateway"}]}}});
        let observed = json!({
            "replicas": 2,
            "revisionHistoryLimit": 10,
            "template": {"spec": {
                "containers": [{"name": "pushgateway", "imagePullPolicy": "Always"}],
                "dnsPolicy": "ClusterFirst"
            }}
        });
        assert!(json_is_subset(&desired, &observed));
    }

    #[test]
    fn subset_detects_drift() {
        let desired = json!({"replicas": 2});
        assert!(!json_is_subset(&desired, &json!({"replicas": 1})));
        assert!(!json_is_subset(&desired, &json!({})));
    }

    #[test]
    fn subset_requires_equal_array_lengths() {
        let desired = json!({"args": ["--web.listen-address=:9091"]});
        let observed = json!({"args": ["--web.listen-address=:9091", "--web.enable-lifecycle"]});
        assert!(!json_is_subset(&desired, &observed));
        assert!(!json_is_subset(&observed, &desired));
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_retryable_timeout() {
        let result: Result<()> = with_timeout(Duration::from_secs(10), "get Deployment", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("get Deployment"));
    }

    #[tokio::test]
    async fn with_timeout_passes_results_through() {
        let ok: Result<u8> = with_timeout(Duration::from_secs(1), "op", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u8> = with_timeout(Duration::from_secs(1), "op", async {
            Err(Error::validation("bad"))
        })
        .await;
        assert!(matches!(err, Err(Error::Validation { .. })));
    }
}
