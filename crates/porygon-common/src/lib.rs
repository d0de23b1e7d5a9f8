//! Common types for Porygon: errors, cluster credentials, image references and telemetry

#![deny(missing_docs)]

pub mod credentials;
pub mod error;
pub mod image;
pub mod names;
pub mod telemetry;

pub use credentials::ClusterCredential;
pub use error::Error;
pub use names::{validate_name, validate_namespace};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the Role granted to the automation ServiceAccount in every managed namespace
pub const ROLE_NAME: &str = "porygon-deployment-editor";

/// Name of the RoleBinding attaching [`ROLE_NAME`] to the automation ServiceAccount
pub const ROLE_BINDING_NAME: &str = "porygon-deployment-editor-binding";

/// Default external cluster CLI used for login and token minting
pub const DEFAULT_CLI_BINARY: &str = "oc";

/// Default delay between items of a batch sync
pub const DEFAULT_SYNC_PACING_SECS: u64 = 8;

/// Default HTTP listen port for the server
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Version reported for a deployment whose first container has no image
pub const UNKNOWN_VERSION: &str = "unknown";
