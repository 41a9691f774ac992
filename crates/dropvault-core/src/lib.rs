//! # dropvault-core
//!
//! Anonymous file vault engine: clients upload a file or register a remote
//! URL, receive an opaque token, and later retrieve, inspect, or delete the
//! resource with it. Entries may be password-protected, encrypted at rest,
//! time-limited, and gated by an antivirus scan and an IP block list.
//!
//! The engine is transport-agnostic; HTTP routing, session auth and
//! multipart parsing live in whatever boundary layer embeds this crate.

pub mod blob;
pub mod blocklist;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod scan;
pub mod sweep;

pub use config::VaultConfig;
pub use engine::{assemble, FetchedContent, UploadOutcome, UploadSource, VaultEngine};
pub use error::{ConfigError, VaultError};
