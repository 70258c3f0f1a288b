//! Passbolt API client with GPGAuth login and idempotent reconcilers.
//!
//! Provides a Passbolt password manager integration with:
//! - REST API client for the Passbolt server JSON endpoints
//! - GPGAuth challenge/response authentication flow
//! - OpenPGP encryption and decryption of resource secrets
//! - Resource (password) CRUD with per-recipient secret encryption
//! - Folder management with parent permission inheritance
//! - User and Group administration
//! - Sharing and permission management (ACL)
//! - Declarative `ensure_*` reconcilers reporting a `changed` flag

pub mod auth;
pub mod client;
pub mod crypto;
pub mod folders;
pub mod reconcile;
pub mod resources;
pub mod secrets;
pub mod session;
pub mod sharing;
pub mod types;
pub mod users;

// Re-export top-level items for convenience.
pub use reconcile::{
    ensure_folder, ensure_resource, ensure_user, user_facts, DesiredState, FolderOutcome,
    FolderParams, ResourceOutcome, ResourceParams, UserFact, UserOutcome, UserParams,
};
pub use session::{NewResource, ResourceChanges, Session};
pub use types::*;
