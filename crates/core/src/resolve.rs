//! Pod status resolver.
//!
//! The STATUS label is picked by an ordered rule table. Every rule reads a
//! precomputed `PodView` and either yields a label or passes; the first
//! rule that yields wins. `RULES` lists them from highest to lowest priority.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::model::{ConditionStatus, ContainerState, ContainerStatus, PodSnapshot, CONDITION_INITIALIZED, CONDITION_POD_SCHEDULED};

pub const REASON_COMPLETED: &str = "Completed";
pub const REASON_POD_INITIALIZING: &str = "PodInitializing";
pub const REASON_SCHEDULING_GATED: &str = "SchedulingGated";

pub const STATUS_TERMINATING: &str = "Terminating";
pub const STATUS_UNKNOWN: &str = "Unknown";
pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_NOT_READY: &str = "NotReady";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuleId {
    /// Pod is marked for deletion: `Terminating`, or `Unknown` when the node is unreachable.
    Deletion,
    /// A `Completed` label while a ready container still runs.
    RunningDespiteCompleted,
    /// First main container that is waiting with a reason or has terminated.
    MainContainers,
    /// First init container that keeps the pod from initializing.
    InitContainers,
    /// Pod reason, else phase.
    Baseline,
}

/// Rules in evaluation order. `Baseline` always yields, so the table is total.
pub const RULES: [RuleId; 5] = [
    RuleId::Deletion,
    RuleId::RunningDespiteCompleted,
    RuleId::MainContainers,
    RuleId::InitContainers,
    RuleId::Baseline,
];

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::Deletion => "deletion",
            RuleId::RunningDespiteCompleted => "running-despite-completed",
            RuleId::MainContainers => "main-containers",
            RuleId::InitContainers => "init-containers",
            RuleId::Baseline => "baseline",
        }
    }

    fn apply(&self, view: &PodView<'_>) -> Option<String> {
        match self {
            RuleId::Deletion => {
                view.pod.deletion_timestamp?;
                let label = if view.ready == Some(ConditionStatus::Unknown) { STATUS_UNKNOWN } else { STATUS_TERMINATING };
                Some(label.to_string())
            }
            RuleId::RunningDespiteCompleted => {
                if !view.main_gate_open || !view.has_running_ready { return None; }
                if view.fallback_label() != REASON_COMPLETED { return None; }
                match view.ready {
                    Some(ConditionStatus::True) => Some(STATUS_RUNNING.to_string()),
                    // lost contact with the node; keep what the containers said
                    Some(ConditionStatus::Unknown) => None,
                    _ => Some(STATUS_NOT_READY.to_string()),
                }
            }
            RuleId::MainContainers => view.main_label().map(str::to_string),
            RuleId::InitContainers => view.init_blocking.clone(),
            RuleId::Baseline => Some(view.baseline.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub status: String,
    pub rule: RuleId,
}

/// Everything the rules need, computed once per snapshot.
#[derive(Debug)]
struct PodView<'a> {
    pod: &'a PodSnapshot,
    ready: Option<ConditionStatus>,
    baseline: String,
    /// Label of the init container that blocks initialization, if any.
    init_blocking: Option<String>,
    /// Main containers are consulted only once init is out of the way.
    main_gate_open: bool,
    main_reason: Option<String>,
    has_running_ready: bool,
}

impl<'a> PodView<'a> {
    fn new(pod: &'a PodSnapshot) -> Self {
        let init_blocking = scan_init(pod);
        let initialized = pod.condition(CONDITION_INITIALIZED).map(|c| c.status) == Some(ConditionStatus::True);
        let has_running_ready = pod
            .container_statuses
            .iter()
            .any(|c| c.ready && matches!(c.state, Some(ContainerState::Running { .. })));
        Self {
            pod,
            ready: pod.ready_status(),
            baseline: baseline(pod),
            main_gate_open: init_blocking.is_none() || initialized,
            init_blocking,
            main_reason: scan_main(pod),
            has_running_ready,
        }
    }

    fn main_label(&self) -> Option<&str> {
        if self.main_gate_open { self.main_reason.as_deref() } else { None }
    }

    /// Label the container/phase rules would produce on their own.
    fn fallback_label(&self) -> &str {
        self.main_label()
            .or(self.init_blocking.as_deref())
            .unwrap_or(self.baseline.as_str())
    }
}

/// Compute the STATUS label for a pod.
pub fn resolve(pod: &PodSnapshot) -> String {
    explain(pod).status
}

/// Like [`resolve`] but also reports which rule decided.
pub fn explain(pod: &PodSnapshot) -> Resolution {
    let view = PodView::new(pod);
    for rule in RULES.iter() {
        if let Some(status) = rule.apply(&view) {
            return Resolution { status, rule: *rule };
        }
    }
    // unreachable in practice: Baseline always yields
    Resolution { status: view.baseline, rule: RuleId::Baseline }
}

fn baseline(pod: &PodSnapshot) -> String {
    let gated = pod
        .conditions
        .iter()
        .any(|c| c.kind == CONDITION_POD_SCHEDULED && c.reason.as_deref() == Some(REASON_SCHEDULING_GATED));
    if gated {
        REASON_SCHEDULING_GATED.to_string()
    } else if !pod.reason.is_empty() {
        pod.reason.clone()
    } else {
        pod.phase.as_str().to_string()
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|r| !r.is_empty())
}

fn terminated_label(reason: Option<&str>, signal: Option<i32>, exit_code: i32) -> String {
    match (reason, signal) {
        (Some(r), _) => r.to_string(),
        (None, Some(sig)) if sig != 0 => format!("Signal:{}", sig),
        _ => format!("ExitCode:{}", exit_code),
    }
}

/// A restartable sidecar counts as up once its startup probe passed. Runtimes
/// that do not report `started` are judged by the presence of a start time.
fn sidecar_started(status: &ContainerStatus) -> bool {
    match status.started {
        Some(started) => started,
        None => matches!(status.state, Some(ContainerState::Running { started_at: Some(_) })),
    }
}

fn scan_init(pod: &PodSnapshot) -> Option<String> {
    let total = pod.init_containers.len().max(pod.init_container_statuses.len());
    let mut completed = 0usize;
    for (i, status) in pod.init_container_statuses.iter().enumerate() {
        // statuses without a matching spec entry have no declared policy
        let restartable = pod.init_containers.get(i).map(|s| s.is_restartable()).unwrap_or(false);
        match &status.state {
            Some(ContainerState::Terminated { reason, exit_code, signal, .. }) => {
                let reason = non_empty(reason);
                let succeeded = *exit_code == 0 && reason.map_or(true, |r| r == REASON_COMPLETED);
                if !succeeded {
                    return Some(format!("Init:{}", terminated_label(reason, *signal, *exit_code)));
                }
                if !restartable {
                    completed += 1;
                    continue;
                }
            }
            Some(ContainerState::Waiting { reason }) => {
                if let Some(r) = non_empty(reason).filter(|r| *r != REASON_POD_INITIALIZING) {
                    return Some(format!("Init:{}", r));
                }
            }
            Some(ContainerState::Running { .. }) if restartable && sidecar_started(status) => continue,
            _ => {}
        }
        return Some(format!("Init:{}/{}", completed, total));
    }
    None
}

/// First main container, in list order, with something to report.
fn scan_main(pod: &PodSnapshot) -> Option<String> {
    pod.container_statuses.iter().find_map(|c| match &c.state {
        Some(ContainerState::Waiting { reason }) => non_empty(reason).map(str::to_string),
        Some(ContainerState::Terminated { reason, exit_code, signal, .. }) => {
            let reason = non_empty(reason);
            // clean exit without a reason does not outrank the pod's own label
            if reason.is_none() && *exit_code == 0 && signal.unwrap_or(0) == 0 { return None; }
            Some(terminated_label(reason, *signal, *exit_code))
        }
        _ => None,
    })
}
