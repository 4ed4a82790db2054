//! HTTP client half of the Zerra CQRS transport.
//!
//! [`CqrsClient`] packages provider queries and command dispatches into
//! [`zerra_wire::RequestData`] envelopes, encodes and optionally encrypts
//! them, and POSTs them to a Zerra server. Results are decrypted and decoded
//! with the same codec; failures come back as [`ClientError::Remote`] when the
//! server sent a structured error body.
//!
//! ```no_run
//! # async fn run() -> Result<(), zerra_client::ClientError> {
//! use zerra_client::{ClientSettings, CqrsClient};
//!
//! let client = CqrsClient::new(ClientSettings::new("http://127.0.0.1:9780"));
//! let names: Vec<String> = client
//!     .query("IPetsQueryProvider", "GetPetNames")
//!     .arg(&10_u32)?
//!     .send()
//!     .await?;
//! # drop(names);
//! # Ok(())
//! # }
//! ```

mod client;
mod errors;

pub use client::{ClientSettings, CqrsClient, ProviderQuery};
pub use errors::ClientError;

/// Tracing target for client events.
pub(crate) const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");
