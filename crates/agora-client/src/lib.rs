//! Authenticated request pipeline for the Agora campus portal API.
//!
//! This crate owns everything between a UI action and the network for the
//! forum, activities and notices portal:
//!
//! - **TokenStore**: persisted access/refresh tokens with fail-closed
//!   expiry checks.
//! - **RefreshCoordinator**: single-flight token refresh shared by all
//!   concurrent callers.
//! - **Request pipeline**: the [`AgoraClient`] verbs, which refresh
//!   before sending when needed and attach the bearer token.
//! - **Error classification**: every failure becomes one [`ErrorKind`].
//! - **Permission evaluation**: role/resource/action checks over the cached
//!   [`Session`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agora_client::{AgoraClient, FileStorage, Result};
//! use agora_client::permissions::{actions, resources};
//!
//! # async fn example() -> Result<()> {
//! let client = AgoraClient::builder()
//!     .base_url("http://localhost:8080")
//!     .storage(Arc::new(FileStorage::new(std::path::Path::new("/tmp/agora"))))
//!     .build()?;
//!
//! client.auth().login("alice", "secret").await?;
//!
//! if client
//!     .permissions()
//!     .has_resource_permission(resources::FORUM_POST, actions::CREATE)
//! {
//!     let post: serde_json::Value = client
//!         .post("/api/forum/posts", &serde_json::json!({"title": "Hello"}))
//!         .await?;
//!     println!("{}", post);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod classify;
pub mod client;
pub mod clock;
pub mod error;
pub mod events;
pub mod jwt;
pub mod normalize;
pub mod permissions;
pub mod refresh;
pub mod retry;
pub mod session;
pub mod storage;
pub mod token_store;
pub mod types;

pub use api::AuthApi;
pub use classify::{BusinessError, ClassifiedError, ErrorKind};
pub use client::{AgoraClient, ClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use events::{AuthEvent, EventBus};
pub use permissions::{
    Condition, ConditionContext, PermissionEvaluator, PermissionMatrix, RoleGrant,
};
pub use refresh::{RefreshCoordinator, RefreshTransport, RefreshedTokens};
pub use retry::{RetryPolicy, with_retry};
pub use session::{Session, User};
pub use storage::{FileStorage, MemoryStorage, StorageError, TokenStorage};
pub use token_store::{TokenInfo, TokenPair, TokenStore};
pub use types::*;
