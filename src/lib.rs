//! # Depot
//!
//! A self-hostable Python package registry, usable both as a standalone
//! binary and as a library.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use depot::auth::{CredentialStore, PermissionResolver};
//! use depot::config::ServerConfig;
//! use depot::index::PackageIndex;
//! use depot::proxy::ProxyFederator;
//! use depot::server::{AppState, create_router};
//! use depot::store::SqliteStore;
//!
//! let config = ServerConfig::load(Path::new("depot.toml")).unwrap();
//! let store = Arc::new(SqliteStore::new(config.db_path()).unwrap());
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState {
//!     credentials: CredentialStore::new(store.clone(), config.admin.clone()),
//!     resolver: PermissionResolver::new(store.clone()),
//!     index: PackageIndex::new(&config.data_dir),
//!     federator: ProxyFederator::new(config.sorted_mirrors()).unwrap(),
//!     store,
//!     config,
//! });
//! let router = create_router(state);
//! // Serve with axum...
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod index;
pub mod proxy;
pub mod server;
pub mod store;
pub mod types;
