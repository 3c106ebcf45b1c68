//! Label selector satisfaction
//!
//! A Prometheus instance discovers ServiceMonitors through its
//! `serviceMonitorSelector`. The operator never asks the owner of that selector
//! to list our monitor; instead it computes labels for the monitor that are
//! guaranteed (or, for `NotIn`, very nearly guaranteed) to match.
//!
//! Requirements are applied in order: equality matches first, then the
//! set-based requirements as they appear in `matchExpressions`. After solving,
//! every requirement is checked against the result and the ones that still
//! fail are returned as soft failures.

use std::collections::BTreeSet;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::labels::LabelSet;
use crate::Error;

/// Upper bound on witness regeneration for a `NotIn` requirement
pub const NOT_IN_MAX_ATTEMPTS: usize = 100;

/// Witness used for `Exists` requirements
pub const EXISTS_WITNESS: &str = "true";

/// A set-based selector requirement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Value must be one of `values` (non-empty)
    In {
        /// Label key
        key: String,
        /// Allowed values
        values: Vec<String>,
    },
    /// Key must be present with a value outside `values` (non-empty)
    NotIn {
        /// Label key
        key: String,
        /// Forbidden values
        values: Vec<String>,
    },
    /// Key must be present
    Exists {
        /// Label key
        key: String,
    },
    /// Key must be absent
    DoesNotExist {
        /// Label key
        key: String,
    },
}

impl Requirement {
    /// Key the requirement constrains
    pub fn key(&self) -> &str {
        match self {
            Self::In { key, .. }
            | Self::NotIn { key, .. }
            | Self::Exists { key }
            | Self::DoesNotExist { key } => key,
        }
    }

    /// Check the requirement against a label set
    pub fn matches(&self, labels: &LabelSet) -> bool {
        match self {
            Self::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn { key, values } => labels.get(key).is_some_and(|v| !values.contains(v)),
            Self::Exists { key } => labels.contains_key(key),
            Self::DoesNotExist { key } => !labels.contains_key(key),
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In { key, values } => write!(f, "{} in ({})", key, values.join(",")),
            Self::NotIn { key, values } => write!(f, "{} notin ({})", key, values.join(",")),
            Self::Exists { key } => write!(f, "{}", key),
            Self::DoesNotExist { key } => write!(f, "!{}", key),
        }
    }
}

/// A conjunction of equality matches and set-based requirements
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectorExpression {
    /// Exact `key=value` matches, in order
    pub match_labels: Vec<(String, String)>,
    /// Set-based requirements, in order
    pub requirements: Vec<Requirement>,
}

impl SelectorExpression {
    /// Add an equality match
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.push((key.into(), value.into()));
        self
    }

    /// Add a set-based requirement
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Check whether a label set satisfies every part of the expression
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.unsatisfied(labels).is_empty()
    }

    /// Describe every part of the expression `labels` fails
    pub fn unsatisfied(&self, labels: &LabelSet) -> Vec<String> {
        let mut failures: Vec<String> = self
            .match_labels
            .iter()
            .filter(|(k, v)| labels.get(k) != Some(v))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        failures.extend(
            self.requirements
                .iter()
                .filter(|r| !r.matches(labels))
                .map(ToString::to_string),
        );
        failures
    }
}

impl TryFrom<&LabelSelector> for SelectorExpression {
    type Error = Error;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let match_labels = selector
            .match_labels
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut requirements = Vec::new();
        for exp in selector.match_expressions.iter().flatten() {
            let key = exp.key.clone();
            let values = exp.values.clone().unwrap_or_default();
            let requirement = match exp.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(Error::validation(format!(
                        "selector requirement on '{}' with operator {} has no values",
                        key, exp.operator
                    )));
                }
                "In" => Requirement::In { key, values },
                "NotIn" => Requirement::NotIn { key, values },
                "Exists" => Requirement::Exists { key },
                "DoesNotExist" => Requirement::DoesNotExist { key },
                other => {
                    return Err(Error::validation(format!(
                        "unknown selector operator '{}' on key '{}'",
                        other, key
                    )));
                }
            };
            requirements.push(requirement);
        }

        Ok(Self {
            match_labels,
            requirements,
        })
    }
}

/// Source of synthesized values for `NotIn` requirements
pub trait WitnessSource {
    /// Produce a candidate value; `attempt` starts at 0 for each requirement
    fn next_witness(&mut self, attempt: usize) -> String;
}

/// Timestamp-based witnesses (`2006-01-02-15-04-05-000000` layout)
///
/// Retries within the same microsecond get an attempt suffix so that two
/// consecutive candidates are never identical.
#[derive(Clone, Debug, Default)]
pub struct TimestampWitness;

impl WitnessSource for TimestampWitness {
    fn next_witness(&mut self, attempt: usize) -> String {
        let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S-%6f").to_string();
        if attempt == 0 {
            stamp
        } else {
            format!("{}-{}", stamp, attempt)
        }
    }
}

/// Result of solving a selector against a base label set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    /// Labels that should be applied to the target object
    pub labels: LabelSet,
    /// Parts of the selector the labels still fail to satisfy
    pub unsatisfied: Vec<String>,
}

impl Solution {
    /// True when every requirement is met
    pub fn is_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }
}

/// Solve `selector` against `base` using timestamp witnesses
pub fn solve(base: &LabelSet, selector: &SelectorExpression) -> Solution {
    solve_with(base, selector, &mut TimestampWitness)
}

/// Solve `selector` against `base` with an explicit witness source
pub fn solve_with(
    base: &LabelSet,
    selector: &SelectorExpression,
    witness: &mut dyn WitnessSource,
) -> Solution {
    let mut labels = base.clone();

    // First equality match on a key wins; later contradictory ones surface
    // as unsatisfied below.
    let mut pinned = BTreeSet::new();
    for (key, value) in &selector.match_labels {
        if pinned.insert(key.as_str()) {
            labels.insert(key.clone(), value.clone());
        }
    }

    for requirement in &selector.requirements {
        match requirement {
            Requirement::In { key, values } => {
                if !labels.contains_key(key) {
                    if let Some(first) = values.first() {
                        labels.insert(key.clone(), first.clone());
                    }
                }
            }
            Requirement::NotIn { key, values } => {
                let mut attempt = 0;
                if !labels.contains_key(key) {
                    labels.insert(key.clone(), witness.next_witness(attempt));
                    attempt += 1;
                }
                while attempt < NOT_IN_MAX_ATTEMPTS
                    && labels.get(key).is_some_and(|v| values.contains(v))
                {
                    labels.insert(key.clone(), witness.next_witness(attempt));
                    attempt += 1;
                }
            }
            Requirement::Exists { key } => {
                labels
                    .entry(key.clone())
                    .or_insert_with(|| EXISTS_WITNESS.to_string());
            }
            Requirement::DoesNotExist { key } => {
                labels.remove(key);
            }
        }
    }

    let unsatisfied = selector.unsatisfied(&labels);
    Solution {
        labels,
        unsatisfied,
    }
}
