//! Pod snapshot model consumed by the status resolver.
//!
//! Snapshots are plain owned values: the mapping layer builds one per pod,
//! the resolver only ever borrows it.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_INITIALIZED: &str = "Initialized";
pub const CONDITION_POD_SCHEDULED: &str = "PodScheduled";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        }
    }

    /// Parse the API string form. Anything unrecognised yields `None`.
    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "Pending" => Some(Phase::Pending),
            "Running" => Some(Phase::Running),
            "Succeeded" => Some(Phase::Succeeded),
            "Failed" => Some(Phase::Failed),
            "Unknown" => Some(Phase::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Parse the API string form; unrecognised values are treated as `Unknown`.
    pub fn parse(s: &str) -> ConditionStatus {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodCondition {
    pub kind: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PodCondition {
    pub fn new(kind: impl Into<String>, status: ConditionStatus) -> Self {
        Self { kind: kind.into(), status, reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
    Other(String),
}

impl RestartPolicy {
    pub fn parse(s: &str) -> RestartPolicy {
        if s == "Always" { RestartPolicy::Always } else { RestartPolicy::Other(s.to_string()) }
    }
}

/// Declared init container, as far as the resolver cares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InitContainerSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

impl InitContainerSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), restart_policy: None }
    }

    /// Long-lived init container that keeps running next to the main containers.
    pub fn sidecar(name: impl Into<String>) -> Self {
        Self { name: name.into(), restart_policy: Some(RestartPolicy::Always) }
    }

    pub fn is_restartable(&self) -> bool {
        matches!(self.restart_policy, Some(RestartPolicy::Always))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
    },
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Terminated {
        reason: Option<String>,
        exit_code: i32,
        signal: Option<i32>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    /// Startup probe result as reported by the runtime, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    /// `None` when the runtime reported no state at all.
    #[serde(default)]
    pub state: Option<ContainerState>,
}

impl ContainerStatus {
    pub fn waiting(reason: &str) -> Self {
        let reason = if reason.is_empty() { None } else { Some(reason.to_string()) };
        Self { state: Some(ContainerState::Waiting { reason }), ..Self::default() }
    }

    pub fn running(started_at: Option<DateTime<Utc>>) -> Self {
        Self { state: Some(ContainerState::Running { started_at }), ..Self::default() }
    }

    pub fn terminated(reason: &str, exit_code: i32) -> Self {
        let reason = if reason.is_empty() { None } else { Some(reason.to_string()) };
        Self {
            state: Some(ContainerState::Terminated { reason, exit_code, signal: None, started_at: None, finished_at: None }),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn started(mut self, started: bool) -> Self {
        self.started = Some(started);
        self
    }

    /// Set the signal on a terminated state. No-op for other states.
    pub fn with_signal(mut self, sig: i32) -> Self {
        if let Some(ContainerState::Terminated { signal, .. }) = self.state.as_mut() {
            *signal = Some(sig);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PodSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub phase: Phase,
    /// Orchestrator-provided reason, empty when none was set.
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
    #[serde(default)]
    pub init_containers: Vec<InitContainerSpec>,
    #[serde(default)]
    pub init_container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodSnapshot {
    pub fn new(phase: Phase) -> Self {
        Self { phase, ..Self::default() }
    }

    pub fn named(mut self, namespace: Option<&str>, name: &str) -> Self {
        self.namespace = namespace.map(|s| s.to_string());
        self.name = name.to_string();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_deletion(mut self, ts: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(ts);
        self
    }

    pub fn with_condition(mut self, cond: PodCondition) -> Self {
        self.conditions.push(cond);
        self
    }

    pub fn with_ready(self, status: ConditionStatus) -> Self {
        self.with_condition(PodCondition::new(CONDITION_READY, status))
    }

    pub fn with_init_containers(mut self, specs: Vec<InitContainerSpec>) -> Self {
        self.init_containers = specs;
        self
    }

    pub fn with_init_statuses(mut self, statuses: Vec<ContainerStatus>) -> Self {
        self.init_container_statuses = statuses;
        self
    }

    pub fn with_container_statuses(mut self, statuses: Vec<ContainerStatus>) -> Self {
        self.container_statuses = statuses;
        self
    }

    /// First condition of the given type, if reported.
    pub fn condition(&self, kind: &str) -> Option<&PodCondition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Status of the `Ready` condition; `None` when the pod reports no such condition.
    pub fn ready_status(&self) -> Option<ConditionStatus> {
        self.condition(CONDITION_READY).map(|c| c.status)
    }

    /// `namespace/name` or just `name` for display.
    pub fn key(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_api_strings() {
        assert_eq!(Phase::parse("Running"), Some(Phase::Running));
        assert_eq!(Phase::parse("running"), None);
        assert_eq!(Phase::Succeeded.to_string(), "Succeeded");
    }

    #[test]
    fn condition_status_defaults_to_unknown() {
        assert_eq!(ConditionStatus::parse("True"), ConditionStatus::True);
        assert_eq!(ConditionStatus::parse(""), ConditionStatus::Unknown);
    }

    #[test]
    fn ready_status_reads_first_ready_condition() {
        let pod = PodSnapshot::new(Phase::Running)
            .with_condition(PodCondition::new(CONDITION_INITIALIZED, ConditionStatus::True))
            .with_ready(ConditionStatus::False)
            .with_ready(ConditionStatus::True);
        assert_eq!(pod.ready_status(), Some(ConditionStatus::False));
        assert_eq!(PodSnapshot::new(Phase::Running).ready_status(), None);
    }

    #[test]
    fn empty_reasons_become_none() {
        let st = ContainerStatus::terminated("", 137).with_signal(9);
        match st.state {
            Some(ContainerState::Terminated { reason, signal, exit_code, .. }) => {
                assert!(reason.is_none());
                assert_eq!(signal, Some(9));
                assert_eq!(exit_code, 137);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn key_includes_namespace_when_present() {
        assert_eq!(PodSnapshot::default().named(Some("prod"), "web-0").key(), "prod/web-0");
        assert_eq!(PodSnapshot::default().named(None, "web-0").key(), "web-0");
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let pod = PodSnapshot::new(Phase::Pending)
            .with_init_containers(vec![InitContainerSpec::sidecar("proxy")])
            .with_init_statuses(vec![ContainerStatus::waiting("PodInitializing").named("proxy")]);
        let v = serde_json::to_value(&pod).unwrap();
        assert_eq!(v["phase"], "Pending");
        assert_eq!(v["init_containers"][0]["restart_policy"], "Always");
        let st = v["init_container_statuses"][0].as_object().unwrap();
        let mut keys: Vec<_> = st.keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["name", "ready", "state"]);
        let back: PodSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(back, pod);
    }
}
