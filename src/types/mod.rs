//! Core types for runweave.

pub mod event;
pub mod message;
pub mod payload;
pub mod tool;

pub use event::*;
pub use message::*;
pub use payload::Payload;
pub use tool::*;
