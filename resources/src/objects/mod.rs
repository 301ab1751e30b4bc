use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::Display;

pub mod config_map;
pub mod job;
pub mod lease;
pub mod metrics;
pub mod object_reference;
pub mod quantity;
pub mod scaled_job;
pub mod scaled_object;
pub mod secret;
pub mod trigger;
pub mod trigger_auth;
pub mod workload;

use object_reference::ObjectReference;

/// Annotation pausing autoscaling of a target, value `"true"` pauses it.
pub const PAUSED_ANNOTATION: &str = "autoscaling.rkeda.io/paused";
/// Optional replica count pinned while the target is paused.
pub const PAUSED_REPLICAS_ANNOTATION: &str = "autoscaling.rkeda.io/paused-replicas";
/// Selector label the adapter extracts the target name from.
pub const SCALED_OBJECT_NAME_LABEL: &str = "scaledobject.rkeda.io/name";
/// Label on dispatched job executions pointing back to the owning target.
pub const SCALED_JOB_NAME_LABEL: &str = "scaledjob.rkeda.io/name";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Monotonic revision of the spec, bumped by the API server on change.
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub owner_references: Vec<ObjectReference>,
}

impl Metadata {
    pub fn annotation(&self, key: &str) -> Option<&String> {
        self.annotations.get(key)
    }
}

/// Behavior common to every declarative object observed via watch.
pub trait Object:
    Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn kind(&self) -> &'static str;
    fn plural() -> &'static str;
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn cluster_scoped() -> bool {
        false
    }

    fn name(&self) -> &String {
        &self.metadata().name
    }

    fn namespace(&self) -> &String {
        &self.metadata().namespace
    }

    /// Store key, also the REST path of the object.
    fn uri(&self) -> String {
        if Self::cluster_scoped() {
            format!("/api/v1/{}/{}", Self::plural(), self.name())
        } else {
            format!(
                "/api/v1/namespaces/{}/{}/{}",
                self.namespace(),
                Self::plural(),
                self.name()
            )
        }
    }
}

/// REST path of an object of type `T` without an instance at hand.
pub fn uri_of<T: Object>(namespace: &str, name: &str) -> String {
    if T::cluster_scoped() {
        format!("/api/v1/{}/{}", T::plural(), name)
    } else {
        format!("/api/v1/namespaces/{}/{}/{}", namespace, T::plural(), name)
    }
}

/// Collection path used for listing and creation.
pub fn list_path<T: Object>(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !T::cluster_scoped() => {
            format!("/api/v1/namespaces/{}/{}", ns, T::plural())
        },
        _ => format!("/api/v1/{}", T::plural()),
    }
}

/// Path of the websocket watch feed for `T`.
pub fn watch_path<T: Object>(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !T::cluster_scoped() => {
            format!("/api/v1/watch/namespaces/{}/{}", ns, T::plural())
        },
        _ => format!("/api/v1/watch/{}", T::plural()),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Labels(pub HashMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Labels(HashMap::new())
    }

    pub fn insert(&mut self, key: &str, value: &str) -> &mut Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    /// A selector matches when every one of its pairs is present.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .0
            .iter()
            .all(|(k, v)| self.0.get(k).map_or(false, |value| value == v))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Display)]
pub enum ConditionType {
    /// The target is well-formed and its scalers are built.
    Ready,
    /// At least one trigger reports activity.
    Active,
    /// Fallback replica counts are being served.
    Fallback,
    /// Autoscaling of the target is paused.
    Paused,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: NaiveDateTime,
}

impl Condition {
    pub fn new(type_: ConditionType, status: bool, reason: Option<String>) -> Self {
        Condition {
            type_,
            status,
            reason,
            message: None,
            last_transition_time: chrono::Local::now().naive_utc(),
        }
    }
}

/// Replace or append a condition, keeping the previous transition time
/// when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                return;
            }
            *existing = condition;
        },
        None => conditions.push(condition),
    }
}

pub fn get_condition(conditions: &[Condition], type_: &ConditionType) -> Option<bool> {
    conditions
        .iter()
        .find(|c| &c.type_ == type_)
        .map(|c| c.status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_subset() {
        let mut labels = Labels::new();
        labels.insert("app", "worker").insert("tier", "backend");
        let mut selector = Labels::new();
        selector.insert("app", "worker");
        assert!(labels.matches(&selector));

        selector.insert("tier", "frontend");
        assert!(!labels.matches(&selector));
    }

    #[test]
    fn set_condition_keeps_transition_time_on_no_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(ConditionType::Ready, true, None),
        );
        let first = conditions[0].last_transition_time;
        set_condition(
            &mut conditions,
            Condition::new(ConditionType::Ready, true, Some("again".to_string())),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);
    }
}
