//! Cloudwright Cloud Core
//!
//! Provider-neutral building blocks for reconciling resources against an
//! eventually consistent control plane: create calls are accepted
//! asynchronously, identifiers are not returned, and every effect has to be
//! observed by polling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │         orchestrator (create/read/update/delete) │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │              provider controllers                │
//! │   instance / network / volume entry points       │
//! └───────┬─────────────────┬──────────────┬────────┘
//!         │                 │              │
//! ┌───────▼───────┐ ┌───────▼──────┐ ┌─────▼───────┐
//! │ Serialization │ │  Diff-based  │ │  Condition  │
//! │     Guard     │ │  Discovery   │ │   Poller    │
//! └───────────────┘ └──────────────┘ └─────────────┘
//! ```

pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod guard;
pub mod model;
pub mod poll;

// Re-exports
pub use config::{ReconcileConfig, RetryConfig};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use discovery::{Listed, find_named, find_new, snapshot_ids};
pub use error::{ApiErrorKind, CloudError, Result, classify_api_message};
pub use guard::{CollectionLock, SerializationGuard};
pub use model::{
    AttachmentRecord, InstanceLifecycleState, ResourceKind, ResourceRef, VolumeLifecycleState,
    VolumeSpec,
};
pub use poll::{PollOutcome, PollSpec, poll_for, poll_until, retry_with_backoff};
