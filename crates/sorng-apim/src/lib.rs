//! # SortOfRemote NG – API Management Tags
//!
//! Lifecycle management for tags under an Azure API Management service.
//!
//! ## Features
//!
//! - **Resource IDs** – generic ARM ID segment parser, tag ID render / parse with
//!   strict "no unexpected segments" validation
//! - **Remote client** – `TagClient` capability trait, ARM REST implementation
//!   with bearer-token injection and throttling retries
//! - **Reconciler** – create-or-update with an import-collision guard, read with
//!   drop-on-missing, idempotent delete, import, drift-driven `reconcile`
//! - **Deadlines** – per-operation timeouts (create, read, update, delete)

pub mod types;
pub mod resource_id;
pub mod tag_id;
pub mod client;
pub mod reconciler;

pub use client::{ArmTagClient, TagClient};
pub use reconciler::{ReconcileAction, ReconcileOutcome, TagReconciler};
pub use tag_id::{parse, render, validate_tag_id, ResourceIdentity};
pub use types::{
    ApimConfig, ArmError, ArmErrorKind, ArmResult, DesiredConfig, Operation, RemoteResource,
    TagError, TagErrorKind, TagResult, Timeouts,
};
