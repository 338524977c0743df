//! Lifecycle preview for planned instance changes

use crate::lifecycle::DesiredState;
use crate::status::{INSTANCE_UP, is_running, is_stopped};
use serde::{Deserialize, Serialize};

/// Power-state operation an apply would perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOperation {
    Start,
    Stop,
    Reboot,
    Rebuild,
}

impl std::fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleOperation::Start => write!(f, "start"),
            LifecycleOperation::Stop => write!(f, "stop"),
            LifecycleOperation::Reboot => write!(f, "reboot"),
            LifecycleOperation::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// What a planned change will do to the instance's power state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePlan {
    /// Status known before the change, if any
    pub current_status: Option<String>,

    pub desired_state: Option<DesiredState>,

    /// Operations in execution order
    pub operations: Vec<LifecycleOperation>,
}

impl LifecyclePlan {
    pub fn has_operation(&self, operation: LifecycleOperation) -> bool {
        self.operations.contains(&operation)
    }

    /// Human-readable preview
    pub fn summary(&self) -> String {
        let current = self.current_status.as_deref().unwrap_or("(unknown)");
        let desired = self
            .desired_state
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(not set)".to_string());
        let operations: Vec<String> = self.operations.iter().map(|o| o.to_string()).collect();

        format!(
            "Instance lifecycle information:\n  Current status: {}\n  Desired status: {}\n  Operations to perform: [{}]",
            current,
            desired,
            operations.join(", ")
        )
    }
}

/// Preview lifecycle operations.
///
/// `current_status` is the last known raw status; a new instance is assumed
/// to come up as `UP`. Returns `None` when nothing worth reporting happens:
/// no operations, or a status that already matches without a rebuild.
pub fn plan_lifecycle(
    current_status: Option<&str>,
    desired: Option<DesiredState>,
    image_changed: bool,
    is_new: bool,
) -> Option<LifecyclePlan> {
    let current = if is_new {
        Some(INSTANCE_UP)
    } else {
        current_status.filter(|s| !s.is_empty())
    };

    let already_matches = match (desired, current) {
        (Some(DesiredState::Running), Some(status)) => is_running(status),
        (Some(DesiredState::Stopped), Some(status)) => is_stopped(status),
        _ => false,
    };

    let mut operations = Vec::new();
    match desired {
        Some(DesiredState::Running) => {
            if !is_new && current.is_some_and(|s| !is_running(s)) {
                operations.push(LifecycleOperation::Start);
            }
        }
        Some(DesiredState::Stopped) => {
            if is_new || current.is_some_and(is_running) {
                operations.push(LifecycleOperation::Stop);
            }
        }
        Some(DesiredState::Reboot) => {
            if !is_new && current.is_some_and(is_running) {
                operations.push(LifecycleOperation::Reboot);
            }
        }
        None => {}
    }

    let rebuild = !is_new && image_changed;
    if rebuild {
        operations.push(LifecycleOperation::Rebuild);
    }

    if operations.is_empty() || (already_matches && !rebuild) {
        return None;
    }

    Some(LifecyclePlan {
        current_status: current.map(str::to_string),
        desired_state: desired,
        operations,
    })
}
