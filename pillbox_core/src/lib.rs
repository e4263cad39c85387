#![forbid(unsafe_code)]

//! Core domain model and business logic for the Pillbox medication tracker.
//!
//! This crate provides:
//! - Domain types (schedules, prescriptions, regimens, doses)
//! - Schedule expansion engine
//! - Concurrent in-memory repository
//! - Dose state tracking and remaining-dose queries
//! - Snapshot persistence and CSV export

pub mod types;
pub mod duration;
pub mod error;
pub mod config;
pub mod logging;
pub mod engine;
pub mod store;
pub mod tracker;
pub mod remaining;
pub mod service;
pub mod state;
pub mod csv_export;

// Re-export commonly used types
pub use error::{Entity, Error, ErrorKind, Result};
pub use types::*;
pub use duration::Duration;
pub use config::Config;
pub use engine::{expand, Occurrence};
pub use store::{MemoryStore, Store, StoreSnapshot};
pub use remaining::{remaining_doses, RemainingQuery};
pub use service::{CreatedPrescription, PrescriptionService, RequestContext};
pub use state::SnapshotFile;
