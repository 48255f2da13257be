#![forbid(unsafe_code)]

//! Core domain model and business logic for wellness assessments.
//!
//! This crate provides:
//! - Domain types (populations, modules, questions, answers, records)
//! - The module registry and answer validation
//! - Profile aggregation and progress reporting
//! - Persistence (per-user JSON documents, CSV export)
//! - Packet assembly from the unified profile

pub mod types;
pub mod error;
pub mod registry;
pub mod validation;
pub mod config;
pub mod logging;
pub mod store;
pub mod profile;
pub mod packet;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use registry::{default_registry, registry_from_config, ModuleRegistry};
pub use config::Config;
pub use store::{FileProfileStore, MemoryProfileStore, ProfileStore};
pub use profile::ProfileAggregator;
pub use packet::{build_packet, default_library, Library, Packet};
pub use export::export_records_csv;
