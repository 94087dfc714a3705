//! Drives a model fragment stream through the citation resolver

use super::models::{Citation, StreamUpdate};
use super::resolver::StreamingCitationResolver;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::services::{FragmentStream, Publisher};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Event name used for incremental answer updates
pub const UPDATE_EVENT: &str = "ReceiveMessageUpdate";

/// How a streamed answer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    /// The request was too large; content was replaced with a retry notice
    TokenLimitExceeded,
    /// Stopped early; the answer is partial and not finalized
    Cancelled,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::TokenLimitExceeded => "token_limit",
            StreamOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_finalized(&self) -> bool {
        !matches!(self, StreamOutcome::Cancelled)
    }
}

/// Final state of a streamed answer
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAnswer {
    pub content: String,
    pub citations: Vec<Citation>,
    pub outcome: StreamOutcome,
}

/// Consume `fragments` in order, publishing one update per fragment
///
/// Errors other than the oversized-request condition are returned to the caller.
pub async fn stream_answer(
    mut fragments: FragmentStream,
    mut resolver: StreamingCitationResolver,
    publisher: &dyn Publisher,
    conversation_id: &str,
    cancel: &CancellationToken,
) -> Result<ResolvedAnswer> {
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamOutcome::Cancelled,
            next = fragments.next() => next,
        };
        // The saved answer never runs ahead of what subscribers were sent
        if cancel.is_cancelled() {
            break StreamOutcome::Cancelled;
        }

        let update = match next {
            None => break StreamOutcome::Completed,
            Some(Ok(fragment)) => resolver.process(&fragment),
            Some(Err(e)) => match resolver.process_error(&e.to_string()) {
                Some(update) => update,
                None => {
                    error!("Answer stream for {} failed: {}", conversation_id, e);
                    METRICS.record_stream_outcome("error");
                    return Err(e);
                }
            },
        };

        publish_update(publisher, conversation_id, &update).await?;

        if resolver.is_aborted() {
            break StreamOutcome::TokenLimitExceeded;
        }
    };

    info!(
        "Answer stream for {} ended: {}",
        conversation_id,
        outcome.as_str()
    );
    METRICS.record_stream_outcome(outcome.as_str());
    METRICS.record_citations(resolver.citations().len());

    let (content, citations) = resolver.into_parts();
    Ok(ResolvedAnswer {
        content,
        citations,
        outcome,
    })
}

async fn publish_update(
    publisher: &dyn Publisher,
    conversation_id: &str,
    update: &StreamUpdate,
) -> Result<()> {
    let payload = serde_json::to_value(update)?;
    publisher.publish(conversation_id, UPDATE_EVENT, payload).await;
    Ok(())
}
