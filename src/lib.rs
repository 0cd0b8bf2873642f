// Error types shared by every component
pub mod error;

// Configuration files and persisted display preferences
pub mod config;

// Encrypted local persistence
pub mod storage;

// GitHub REST API client and payload models
pub mod github;

// Credential validation and lifecycle
pub mod credentials;

// Repository enumeration and activity classification
pub mod discovery;

// Watched repositories
pub mod selection;

// Periodic workflow-run status refresh
pub mod polling;

pub use credentials::{CredentialManager, CredentialState};
pub use discovery::DiscoveryEngine;
pub use error::{MonitorError, Result};
pub use polling::StatusScheduler;
pub use storage::EncryptedStore;
