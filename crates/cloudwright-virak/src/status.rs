//! Raw status strings and their normalization
//!
//! The API spells the same state several ways. Every comparison against a
//! raw status goes through the functions here.

use cloudwright_cloud::{InstanceLifecycleState, VolumeLifecycleState};

pub const INSTANCE_RUNNING: &str = "Running";
/// The only status that counts as ready after create or rebuild
pub const INSTANCE_UP: &str = "UP";
pub const INSTANCE_STOPPED: &str = "Stopped";
pub const INSTANCE_STOPPED_UPPER: &str = "STOPPED";
pub const INSTANCE_DOWN: &str = "DOWN";

pub const VOLUME_ALLOCATED: &str = "ALLOCATED";
pub const VOLUME_ATTACHING: &str = "ATTACHING";
pub const VOLUME_ATTACHED: &str = "ATTACHED";

pub fn normalize_instance_status(status: &str) -> InstanceLifecycleState {
    match status {
        INSTANCE_RUNNING | INSTANCE_UP => InstanceLifecycleState::Running,
        INSTANCE_STOPPED | INSTANCE_STOPPED_UPPER | INSTANCE_DOWN => InstanceLifecycleState::Stopped,
        _ => InstanceLifecycleState::Transitional,
    }
}

pub fn is_running(status: &str) -> bool {
    normalize_instance_status(status) == InstanceLifecycleState::Running
}

pub fn is_stopped(status: &str) -> bool {
    normalize_instance_status(status) == InstanceLifecycleState::Stopped
}

/// Running or stopped, i.e. not in the middle of a transition
pub fn is_stable(status: &str) -> bool {
    normalize_instance_status(status) != InstanceLifecycleState::Transitional
}

/// Exact ready status expected after create or rebuild
pub fn is_ready(status: &str) -> bool {
    status == INSTANCE_UP
}

pub fn normalize_volume_status(status: &str) -> VolumeLifecycleState {
    match status {
        VOLUME_ALLOCATED => VolumeLifecycleState::Allocated,
        VOLUME_ATTACHING => VolumeLifecycleState::Attaching,
        VOLUME_ATTACHED => VolumeLifecycleState::Attached,
        _ => VolumeLifecycleState::Other,
    }
}
