//! Streaming citation resolution
//!
//! Rewrites `[docN]` markers in a streamed answer into stable `^N^` display
//! indices and keeps the citation list limited to sources actually referenced.

pub mod models;
pub mod resolver;
pub mod stream;

pub use models::{content_type_for, Citation, CitationEvent, Fragment, StreamUpdate};
pub use resolver::{ResolverPolicy, StreamingCitationResolver};
pub use stream::{stream_answer, ResolvedAnswer, StreamOutcome, UPDATE_EVENT};
