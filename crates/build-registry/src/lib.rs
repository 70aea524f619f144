//! Build Registry
//!
//! Keeps track of uploaded build archives and which one is deployed.
//! Exactly one build at a time is unpacked into the active build
//! directory, and the registry document on disk always agrees with it.
//!
//! ## Components
//!
//! - [`store`] - durable registry document
//! - [`registry`] - create, list, activate and delete builds
//! - [`deployer`] - active build directory and reload notification
//! - [`ingest`] - upload validation in front of the registry
//! - [`unpacker`] - ZIP extraction

pub mod deployer;
pub mod error;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod reload;
pub mod store;
pub mod unpacker;

pub use deployer::{ActivationStrategy, Deployer};
pub use error::{Error, Result};
pub use ingest::{IngestionPipeline, PendingUpload, UploadPolicy, MAX_UPLOAD_BYTES};
pub use models::{BuildRecord, Registry};
pub use registry::{Activation, ActiveBuild, BuildRegistry, StorageLayout};
pub use reload::{CommandReloadHook, NoopReloadHook, ReloadHook};
pub use store::{JsonFileStore, MetadataStore};
pub use unpacker::{Unpacker, ZipUnpacker};
