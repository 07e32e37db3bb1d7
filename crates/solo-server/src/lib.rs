//! # solo-server
//!
//! HTTP front end for a [`solo_engine::ModelManager`], gated by a file-backed
//! API key store.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/generate_apikey` | no | Issue (or reissue) a key for a user |
//! | `POST` | `/load_model` | yes | Make a model the active one |
//! | `POST` | `/generate` | yes | Complete a prompt |
//! | `GET`  | `/status` | yes | Placement of the active model |
//! | `POST` | `/unload_model` | yes | Release the active model |
//! | `GET`  | `/health` | no | Liveness and active model name |
//!
//! Authenticated routes read the key from the `x-API-Key` header.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keystore;
pub mod logging;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use keystore::{KeyStore, KeyStoreError};
pub use server::{build_router, serve};
pub use state::AppState;
