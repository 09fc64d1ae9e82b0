//! runweave: stream reconciliation for remote agent runs
//!
//! Consumes the multi-channel event stream of a LangGraph-style execution
//! service (threads, runs, stream modes) and keeps a consistent, displayable
//! session state: a deduplicated role-tagged transcript, an incrementally
//! accumulated tool-call list, a single active run handle used for
//! cancellation, and a monotonic workflow-stage history.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use runweave::prelude::*;
//! use runweave::transport::ChannelTransport;
//!
//! # async fn example() -> runweave::error::Result<()> {
//! let config = ClientConfig::from_env();
//! let (transport, _driver) = ChannelTransport::new();
//! let mut session = Session::from_config(config, Section::Chat, Arc::new(transport))?;
//!
//! session.send("Summarize the onboarding module").await?;
//! session.drain().await;
//! for message in session.messages() {
//!     println!("{}: {}", message.role, message.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod normalize;
pub mod prelude;
pub mod reconcile;
pub mod run;
pub mod session;
pub mod sink;
pub mod stage;
pub mod threads;
pub mod transport;
pub mod types;
pub mod util;
