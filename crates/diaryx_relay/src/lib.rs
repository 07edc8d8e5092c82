//! Diaryx Relay
//!
//! A real-time document sync relay for collaborative editing.
//!
//! Clients connect over WebSocket to `/<document>` and exchange binary
//! frames. The relay keeps one in-memory session per document, merges SYNC
//! updates into it through a [`engine::MergeEngine`], and fans updates and
//! presence out to every other client on the same document. Sessions with
//! no connections are discarded after a grace period.
//!
//! ## Features
//!
//! - **Late joiners catch up**: every new connection first receives the full
//!   document state and a presence snapshot
//! - **Opaque updates**: the relay never interprets document content
//! - **Backpressure**: a client that cannot keep up is disconnected instead
//!   of slowing its peers down
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 1234)
//! - `RUST_LOG`: Log filter (default: `diaryx_relay=debug,tower_http=debug`)

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod shutdown;
pub mod sync;

pub use config::Config;
pub use error::{DecodeError, MergeError, RelayError};
pub use handlers::{WsState, router};
pub use sync::{DocumentSession, SessionRegistry};
