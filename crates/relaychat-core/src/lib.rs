//! relaychat-core: building blocks for a multi-provider chat completion backend.
//!
//! This crate contains the orchestration core behind a chat service:
//!
//! - [`provider`] — Closed set of LLM provider keys, catalogue clients, and
//!   the HTTP/SDK transport strategies behind them
//! - [`catalog`] — Concurrent fan-out aggregation of every configured
//!   provider's model catalogue
//! - [`credentials`] — Provider credential storage: probe, encrypt, resolve
//! - [`model_config`] — Per-user model presets and the chat resolution chain
//! - [`chat`] — The chat completion orchestrator (prompt build, outbound
//!   request, response parsing, persistence)
//! - [`jobs`] — Detached background job queue (pending → processing → done)
//! - [`store`] — Generic filtered record-store contract plus an in-memory
//!   implementation
//! - [`vault`] — AES-256-GCM secret cipher with fingerprint/mask helpers
//! - [`config`] — Typed service configuration with env overrides
//! - [`error`] — The shared error taxonomy
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use relaychat_core::chat::{ChatService, HttpCompletionTransport};
//! use relaychat_core::config::ServiceConfig;
//! use relaychat_core::credentials::{CredentialService, HttpKeyProbe};
//! use relaychat_core::model_config::ModelConfigService;
//! use relaychat_core::store::memory::MemoryStore;
//! use relaychat_core::vault::Vault;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::load("relaychat.json")?;
//! let store = Arc::new(MemoryStore::new());
//! let vault = Arc::new(config.vault()?);
//!
//! let credentials = CredentialService::new(
//!     store.clone(),
//!     vault,
//!     Arc::new(HttpKeyProbe::new(config.request_timeout())),
//! );
//! let models = ModelConfigService::new(store.clone());
//! let chats = ChatService::new(
//!     store,
//!     credentials,
//!     models,
//!     config.providers.clone(),
//!     Arc::new(HttpCompletionTransport::new(config.request_timeout())?),
//! );
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod error;
pub mod jobs;
pub mod model_config;
pub mod provider;
pub mod store;
pub mod vault;
