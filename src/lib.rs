//! Token-budgeted context assembly and streaming citation resolution
//!
//! - [`context`] builds the prompt for one chat turn within the model's
//!   token budget: system instructions, extracted audience and intent,
//!   memory text and as much recent history as fits.
//! - [`citations`] rewrites `[docN]` markers in a streamed answer to stable
//!   display indices and narrows the citation list to what is referenced.
//! - [`chat`] wires both together for a full turn.

pub mod chat;
pub mod citations;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod services;

pub use error::{ContextError, Result};
