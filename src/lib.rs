//! # meshcore-console - MeshCore packet decoding, enrichment and mesh state
//!
//! The library behind a handheld console for MeshCore LoRa mesh networks. It
//! turns the radio session's event stream into decoded packets, peers,
//! channels and messages, and persists them across restarts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshcore_console::config::Config;
//! use meshcore_console::console::MeshConsole;
//! use meshcore_console::meshcore::mock::{MockHandle, MockSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut console = MeshConsole::open(&config, MockSession::factory(MockHandle::new()))?;
//!     console.connect().await?;
//!     for event in console.poll_events(config.runtime.poll_batch) {
//!         println!("{}", event.kind());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshcore`] - wire framing, payload registry, decoder, enrichment, telemetry and the radio session boundary
//! - [`state`] - peers, channels and messages built from events
//! - [`console`] - the poll loop tying session, enrichment, state and storage together
//! - [`storage`] - sled-backed persistence with schema migrations
//! - [`config`] - application config and radio settings
//! - [`models`] - records shared by state and storage
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Radio Session  │ ← external driver, async start/stop/send
//! └─────────────────┘
//!          │ drain_events
//! ┌─────────────────┐
//! │   Enrichment    │ ← correlates packets with decrypted handler events
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Mesh State    │ ← peers, channels, messages
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Storage      │ ← sled trees
//! └─────────────────┘
//! ```

pub mod config;
pub mod console;
pub mod logutil;
pub mod meshcore;
pub mod models;
pub mod state;
pub mod storage;
