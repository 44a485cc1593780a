//! Podline kubehub – maps Kubernetes Pod objects and manifests into resolver snapshots

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1 as corev1;
use podline_core::{
    ConditionStatus, ContainerState, ContainerStatus, InitContainerSpec, Phase, PodCondition, PodSnapshot, RestartPolicy,
    SnapshotError,
};
use serde::Deserialize;
use tracing::{debug, warn};

const POD_API_VERSION: &str = "v1";
const POD_KIND: &str = "Pod";

/// Build a snapshot from a typed Pod. Absent optional fields become empty defaults.
pub fn snapshot_from_pod(pod: &corev1::Pod) -> Result<PodSnapshot, SnapshotError> {
    let meta = &pod.metadata;
    let status = pod.status.as_ref();
    let name = meta.name.clone().unwrap_or_default();

    let phase = match status.and_then(|s| s.phase.as_deref()) {
        None | Some("") => Phase::default(),
        Some(raw) => Phase::parse(raw).unwrap_or_else(|| {
            debug!(pod = %name, phase = %raw, "unrecognised pod phase; treating as Unknown");
            Phase::Unknown
        }),
    };

    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| {
            cs.iter()
                .map(|c| PodCondition { kind: c.type_.clone(), status: ConditionStatus::parse(&c.status), reason: c.reason.clone() })
                .collect()
        })
        .unwrap_or_default();

    let init_containers = pod
        .spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .map(|ics| {
            ics.iter()
                .map(|c| InitContainerSpec { name: c.name.clone(), restart_policy: c.restart_policy.as_deref().map(RestartPolicy::parse) })
                .collect()
        })
        .unwrap_or_default();

    Ok(PodSnapshot {
        name,
        namespace: meta.namespace.clone(),
        phase,
        reason: status.and_then(|s| s.reason.clone()).unwrap_or_default(),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        conditions,
        init_containers,
        init_container_statuses: container_statuses(status.and_then(|s| s.init_container_statuses.as_deref()))?,
        container_statuses: container_statuses(status.and_then(|s| s.container_statuses.as_deref()))?,
    })
}

fn container_statuses(raw: Option<&[corev1::ContainerStatus]>) -> Result<Vec<ContainerStatus>, SnapshotError> {
    raw.unwrap_or_default().iter().map(container_status).collect()
}

fn container_status(cs: &corev1::ContainerStatus) -> Result<ContainerStatus, SnapshotError> {
    let state = match cs.state.as_ref() {
        Some(s) => container_state(&cs.name, s)?,
        None => None,
    };
    Ok(ContainerStatus {
        name: cs.name.clone(),
        ready: cs.ready,
        started: cs.started,
        state,
    })
}

fn container_state(container: &str, s: &corev1::ContainerState) -> Result<Option<ContainerState>, SnapshotError> {
    let count = [s.waiting.is_some(), s.running.is_some(), s.terminated.is_some()].iter().filter(|set| **set).count();
    if count > 1 {
        return Err(SnapshotError::AmbiguousState { container: container.to_string(), count });
    }
    if let Some(w) = &s.waiting {
        return Ok(Some(ContainerState::Waiting { reason: w.reason.clone() }));
    }
    if let Some(r) = &s.running {
        return Ok(Some(ContainerState::Running { started_at: r.started_at.as_ref().map(|t| t.0) }));
    }
    if let Some(t) = &s.terminated {
        return Ok(Some(ContainerState::Terminated {
            reason: t.reason.clone(),
            exit_code: t.exit_code,
            signal: t.signal,
            started_at: t.started_at.as_ref().map(|ts| ts.0),
            finished_at: t.finished_at.as_ref().map(|ts| ts.0),
        }));
    }
    Ok(None)
}

fn kind_of(v: &serde_json::Value) -> Option<&str> {
    v.get("kind").and_then(|k| k.as_str())
}

/// Build a snapshot from a raw Pod object. `apiVersion`/`kind` may be omitted.
pub fn snapshot_from_value(mut v: serde_json::Value) -> Result<PodSnapshot, SnapshotError> {
    match kind_of(&v) {
        None | Some(POD_KIND) => {}
        Some(other) => return Err(SnapshotError::UnexpectedKind { kind: other.to_string() }),
    }
    if let Some(obj) = v.as_object_mut() {
        obj.entry("apiVersion").or_insert_with(|| serde_json::Value::String(POD_API_VERSION.to_string()));
        obj.entry("kind").or_insert_with(|| serde_json::Value::String(POD_KIND.to_string()));
    }
    let pod: corev1::Pod = serde_json::from_value(v)?;
    snapshot_from_pod(&pod)
}

fn is_list(v: &serde_json::Value) -> bool {
    matches!(kind_of(v), Some(k) if k.ends_with("List"))
}

fn collect_pods(v: serde_json::Value, doc: usize, out: &mut Vec<PodSnapshot>) -> Result<()> {
    if v.is_null() {
        return Ok(());
    }
    if is_list(&v) {
        let items = match v {
            serde_json::Value::Object(mut obj) => obj.remove("items").unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        };
        let items = match items {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Null => Vec::new(),
            _ => anyhow::bail!("document {}: list items must be an array", doc),
        };
        debug!(doc, count = items.len(), "expanding list");
        for (i, item) in items.into_iter().enumerate() {
            let snap = snapshot_from_value(item).with_context(|| format!("document {}: items[{}]", doc, i))?;
            out.push(snap);
        }
        return Ok(());
    }
    let snap = snapshot_from_value(v).with_context(|| format!("document {}", doc))?;
    out.push(snap);
    Ok(())
}

/// Parse JSON or (multi-document) YAML manifest text into snapshots.
/// `List`/`PodList` wrappers are expanded; empty YAML documents are skipped.
pub fn load_manifests(text: &str) -> Result<Vec<PodSnapshot>> {
    let mut out = Vec::new();
    // strict JSON first; flow-style YAML such as `{kind: Pod}` falls through
    let json = if text.trim_start().starts_with('{') {
        serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| debug!(error = %e, "not strict JSON; parsing as YAML"))
            .ok()
    } else {
        None
    };
    if let Some(v) = json {
        collect_pods(v, 0, &mut out)?;
    } else {
        for (doc, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let v = serde_json::Value::deserialize(de).with_context(|| format!("parsing YAML document {}", doc))?;
            collect_pods(v, doc, &mut out)?;
        }
    }
    if out.is_empty() {
        warn!("manifest contained no pods");
    }
    debug!(pods = out.len(), "loaded manifests");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use podline_core::resolve;

    fn status(name: &str, ready: bool, state: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "image": "busybox",
            "imageID": "",
            "ready": ready,
            "restartCount": 0,
            "state": state,
        })
    }

    fn pod(status_body: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web-0", "namespace": "prod" },
            "spec": {
                "initContainers": [ { "name": "mesh", "restartPolicy": "Always" }, { "name": "migrate" } ],
                "containers": [ { "name": "app" } ],
            },
            "status": status_body,
        })
    }

    #[test]
    fn maps_full_pod_object() {
        let v = pod(serde_json::json!({
            "phase": "Pending",
            "conditions": [ { "type": "Ready", "status": "False" } ],
            "initContainerStatuses": [
                status("mesh", true, serde_json::json!({ "running": { "startedAt": "2024-05-01T10:00:00Z" } })),
                status("migrate", false, serde_json::json!({ "terminated": { "exitCode": 1, "reason": "Error" } })),
            ],
            "containerStatuses": [
                status("app", false, serde_json::json!({ "waiting": { "reason": "PodInitializing" } })),
            ],
        }));
        let snap = snapshot_from_value(v).unwrap();
        assert_eq!(snap.key(), "prod/web-0");
        assert_eq!(snap.phase, Phase::Pending);
        assert_eq!(snap.ready_status(), Some(ConditionStatus::False));
        assert!(snap.init_containers[0].is_restartable());
        assert!(!snap.init_containers[1].is_restartable());
        assert_eq!(snap.init_container_statuses.len(), 2);
        assert!(matches!(
            snap.init_container_statuses[0].state,
            Some(ContainerState::Running { started_at: Some(_) })
        ));
        assert_eq!(resolve(&snap), "Init:Error");
    }

    #[test]
    fn missing_status_defaults_to_pending() {
        let v = serde_json::json!({ "metadata": { "name": "bare" }, "spec": { "containers": [ { "name": "app" } ] } });
        let snap = snapshot_from_value(v).unwrap();
        assert_eq!(snap.phase, Phase::Pending);
        assert!(snap.reason.is_empty());
        assert!(snap.conditions.is_empty());
        assert!(snap.container_statuses.is_empty());
        assert_eq!(resolve(&snap), "Pending");
    }

    #[test]
    fn unknown_phase_maps_to_unknown() {
        let v = pod(serde_json::json!({ "phase": "Exploded" }));
        assert_eq!(snapshot_from_value(v).unwrap().phase, Phase::Unknown);
    }

    #[test]
    fn deletion_timestamp_is_carried_over() {
        let mut v = pod(serde_json::json!({
            "phase": "Running",
            "conditions": [ { "type": "Ready", "status": "Unknown" } ],
        }));
        v["metadata"]["deletionTimestamp"] = serde_json::json!("2024-05-01T10:00:00Z");
        let snap = snapshot_from_value(v).unwrap();
        assert!(snap.deletion_timestamp.is_some());
        assert_eq!(resolve(&snap), "Unknown");
    }

    #[test]
    fn ambiguous_container_state_is_rejected() {
        let v = pod(serde_json::json!({
            "phase": "Running",
            "containerStatuses": [
                status("app", false, serde_json::json!({
                    "waiting": { "reason": "CrashLoopBackOff" },
                    "terminated": { "exitCode": 1 },
                })),
            ],
        }));
        let err = snapshot_from_value(v).unwrap_err();
        assert!(matches!(err, SnapshotError::AmbiguousState { ref container, count: 2 } if container == "app"), "err={}", err);
    }

    #[test]
    fn missing_container_state_is_kept_as_none() {
        let mut st = status("app", false, serde_json::Value::Null);
        st.as_object_mut().unwrap().remove("state");
        let v = pod(serde_json::json!({ "phase": "Running", "containerStatuses": [ st ] }));
        let snap = snapshot_from_value(v).unwrap();
        assert_eq!(snap.container_statuses[0].state, None);
        assert_eq!(resolve(&snap), "Running");
    }

    #[test]
    fn other_kinds_are_rejected() {
        let v = serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } });
        let err = snapshot_from_value(v).unwrap_err();
        assert!(err.to_string().contains("ConfigMap"), "err={}", err);
    }

    #[test]
    fn loads_multi_document_yaml_with_lists() {
        let yaml = r#"
apiVersion: v1
kind: Pod
metadata:
  name: a
spec:
  containers: [{ name: app }]
status:
  phase: Running
  reason: SomeReason
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Pod
    metadata: { name: b }
    spec: { containers: [{ name: app }] }
    status: { phase: Failed, reason: Evicted }
  - metadata: { name: c }
    spec: { containers: [{ name: app }] }
    status: { phase: Succeeded }
"#;
        let snaps = load_manifests(yaml).unwrap();
        let got: Vec<_> = snaps.iter().map(|s| (s.name.as_str(), resolve(s))).collect();
        assert_eq!(got, vec![("a", "SomeReason".to_string()), ("b", "Evicted".to_string()), ("c", "Succeeded".to_string())]);
    }

    #[test]
    fn loads_json_pod_list() {
        let json = serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "items": [ pod(serde_json::json!({ "phase": "Running" })) ],
        })
        .to_string();
        let snaps = load_manifests(&json).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].name, "web-0");
    }

    #[test]
    fn bad_item_reports_its_position() {
        let yaml = "kind: List\nitems:\n  - kind: Service\n    metadata: { name: s }\n";
        let err = load_manifests(yaml).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("items[0]"), "msg={}", msg);
        assert!(msg.contains("Service"), "msg={}", msg);
    }

    #[test]
    fn loads_flow_style_yaml_that_looks_like_json() {
        let snaps = load_manifests("{kind: Pod, metadata: {name: a}, spec: {containers: [{name: app}]}}").unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].name, "a");
        assert_eq!(resolve(&snaps[0]), "Pending");
    }

    #[test]
    fn malformed_braced_text_reports_yaml_error() {
        let err = load_manifests("{kind: Pod").unwrap_err();
        assert!(err.to_string().contains("parsing YAML document 0"), "err={:#}", err);
    }
}
