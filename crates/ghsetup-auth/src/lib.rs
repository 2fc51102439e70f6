pub mod config;
pub mod credentials;
pub mod gh;
pub mod manifest;
pub mod models;
pub mod oauth;
pub mod provision;
pub mod report;
pub mod secrets;

pub use config::{FlowMode, SetupConfig};
pub use credentials::{AppCredentials, AuthorizationCode};
pub use gh::{GhCommand, GhError, GhRunner, HttpMethod};
pub use manifest::{AppManifest, GitHubWeb, PermissionLevel};
pub use models::{ModelsResult, ModelsSetup};
pub use provision::{ProvisionReport, Provisioner};
pub use report::{FlowReporter, MemoryReporter};
pub use secrets::{SecretStorage, SecretWriter};
