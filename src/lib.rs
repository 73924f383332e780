//! Persistent OAuth 2.0 client.
//!
//! Wraps a provider client with the full token lifecycle: interactive
//! authorization-code exchange on first use, JSON persistence of the token on
//! disk, expiry detection, and silent refresh. The interactive step is an
//! injected callback (URL in, authorization code out), so the crate works the
//! same from a CLI, a UI, or a scripted test.

mod client;
mod config;
mod error;
mod provider;
mod providers;
mod token;

pub use client::{AuthorizationCallback, PersistentClient};
pub use config::{AccessType, ClientConfiguration};
pub use error::Error;
pub use provider::ProviderClient;
pub use providers::GoogleProvider;
pub use token::{AccessToken, TokenResponse};
