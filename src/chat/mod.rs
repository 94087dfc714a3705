//! One conversation turn end to end
//!
//! Persists the user's message, assembles the budgeted prompt, streams the
//! model's answer through the citation resolver to subscribers and stores
//! the final bot answer with its token usage.

use crate::citations::{stream_answer, Fragment, ResolverPolicy, StreamOutcome, StreamingCitationResolver};
use crate::config::PromptOptions;
use crate::context::{
    AuthorRole, ChatEntry, ContextAssembler, TokenAccountant, TokenEstimator, TurnRequest,
};
use crate::error::{ContextError, Result};
use crate::services::{
    BotAnswer, ChatCompletion, ChatStore, CompletionSettings, FragmentStream, MemoryRetriever, Publisher,
};
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const BOT_USER_NAME: &str = "bot";
const DEFAULT_USER_NAME: &str = "user";

/// Result of a processed turn
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub answer: BotAnswer,
    pub outcome: StreamOutcome,
}

/// Runs chat turns against the configured collaborators
pub struct ChatTurnService {
    options: PromptOptions,
    estimator: Arc<dyn TokenEstimator>,
    model: Arc<dyn ChatCompletion>,
    store: Arc<dyn ChatStore>,
    publisher: Arc<dyn Publisher>,
    assembler: ContextAssembler,
}

impl ChatTurnService {
    pub fn new(
        options: PromptOptions,
        estimator: Arc<dyn TokenEstimator>,
        model: Arc<dyn ChatCompletion>,
        store: Arc<dyn ChatStore>,
        memory: Arc<dyn MemoryRetriever>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let assembler = ContextAssembler::new(estimator.clone(), model.clone(), store.clone(), memory);
        Self {
            options,
            estimator,
            model,
            store,
            publisher,
            assembler,
        }
    }

    pub fn options(&self) -> &PromptOptions {
        &self.options
    }

    /// Process one user message and stream the answer to `chat_id` subscribers
    pub async fn process_turn(
        &self,
        chat_id: &str,
        user_name: Option<&str>,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult> {
        let options = self.options.clone();

        let entry = ChatEntry::new(
            chat_id,
            user_name.unwrap_or(DEFAULT_USER_NAME),
            user_message,
            AuthorRole::User,
            Utc::now(),
        );
        // A session must exist before anything is written to it
        if self.store.find_session(chat_id).await?.is_none() {
            return Err(ContextError::NotFound(format!("chat session {}", chat_id)));
        }
        self.store.save_message(&entry).await?;

        let context = self
            .assembler
            .assemble(
                TurnRequest {
                    chat_id: chat_id.to_string(),
                    user_message: user_message.to_string(),
                    options: options.clone(),
                },
                cancel,
            )
            .await?;

        let settings = CompletionSettings {
            max_tokens: context.budget.reserved_response.max(1) as usize,
            temperature: options.response_temperature,
        };
        let fragments: FragmentStream = match self.model.complete_streaming(&context.messages, &settings).await {
            Ok(fragments) => fragments,
            // Request-level failures go through the resolver like mid-stream ones
            Err(e) => stream::once(async move { Err::<Fragment, _>(e) }).boxed(),
        };

        let policy = ResolverPolicy::for_turn(&options, context.specialization_id.as_deref());
        let resolved = stream_answer(
            fragments,
            StreamingCitationResolver::new(policy),
            self.publisher.as_ref(),
            chat_id,
            cancel,
        )
        .await?;

        let token_usage =
            TokenAccountant::with_usage(self.estimator.clone(), context.token_usage).finalize(&resolved.content);
        let answer = BotAnswer::new(
            chat_id,
            resolved.content.clone(),
            resolved.citations,
            &token_usage,
            resolved.outcome.is_finalized(),
        )?
        .with_memory_citations(context.memory_citations);

        if !answer.finalized {
            warn!("Turn for {} was cancelled, saving partial answer", chat_id);
        }
        self.store.save_answer(&answer).await?;
        self.store
            .save_message(&ChatEntry::new(
                chat_id,
                BOT_USER_NAME,
                resolved.content,
                AuthorRole::Bot,
                answer.timestamp,
            ))
            .await?;

        info!(
            "Turn for {} finished ({}) with {} citations",
            chat_id,
            resolved.outcome.as_str(),
            answer.citations.len()
        );

        Ok(TurnResult {
            answer,
            outcome: resolved.outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::{CitationEvent, UPDATE_EVENT};
    use crate::context::{Message, WordBasedEstimator};
    use crate::services::{
        BroadcastPublisher, ChatSession, Completion, InMemoryChatStore, MemoryResult,
    };
    use async_trait::async_trait;

    struct StreamingModel {
        fragments: Vec<std::result::Result<Fragment, String>>,
    }

    #[async_trait]
    impl ChatCompletion for StreamingModel {
        async fn complete(&self, _messages: &[Message], _settings: &CompletionSettings) -> Result<Completion> {
            Ok(Completion {
                text: "alice".to_string(),
                ..Default::default()
            })
        }

        async fn complete_streaming(
            &self,
            _messages: &[Message],
            _settings: &CompletionSettings,
        ) -> Result<FragmentStream> {
            let items: Vec<Result<Fragment>> = self
                .fragments
                .iter()
                .cloned()
                .map(|f| f.map_err(ContextError::Model))
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    struct NoMemory;

    #[async_trait]
    impl MemoryRetriever for NoMemory {
        async fn query(&self, _query: &str, _chat_id: &str, _token_budget: usize) -> Result<MemoryResult> {
            Ok(MemoryResult::default())
        }
    }

    fn service(
        store: Arc<InMemoryChatStore>,
        publisher: Arc<BroadcastPublisher>,
        fragments: Vec<std::result::Result<Fragment, String>>,
    ) -> ChatTurnService {
        ChatTurnService::new(
            PromptOptions::default(),
            Arc::new(WordBasedEstimator::new(1.0)),
            Arc::new(StreamingModel { fragments }),
            store,
            Arc::new(NoMemory),
            publisher,
        )
    }

    fn store() -> Arc<InMemoryChatStore> {
        let store = Arc::new(InMemoryChatStore::new());
        store.add_session(ChatSession::new("chat-1", "Planning"));
        store
    }

    #[tokio::test]
    async fn test_turn_persists_resolved_answer() {
        let store = store();
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut updates = publisher.subscribe("chat-1");
        let fragments = vec![
            Ok(Fragment::text("Growth was 12% [doc1].")
                .with_citations(vec![CitationEvent::new("q3.pdf", "Revenue grew 12%")])),
            Ok(Fragment::text(" Done.")),
        ];
        let service = service(store.clone(), publisher, fragments);

        let result = service
            .process_turn("chat-1", Some("alice"), "how did q3 go?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome, StreamOutcome::Completed);
        assert_eq!(result.answer.content, "Growth was 12% ^1^. Done.");
        assert_eq!(result.answer.citations.len(), 1);
        assert!(result.answer.finalized);

        let usage = result.answer.token_usage_map().unwrap();
        assert!(usage.contains_key("responseCompletion"));
        assert!(usage.contains_key("metaPromptTemplate"));

        assert_eq!(store.answers("chat-1").len(), 1);
        let log = store.find_messages("chat-1", 0, 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].author_role, AuthorRole::Bot);
        assert_eq!(log[1].user_name, "alice");

        assert_eq!(updates.recv().await.unwrap().event, UPDATE_EVENT);
    }

    #[tokio::test]
    async fn test_token_limit_error_becomes_notice() {
        let store = store();
        let fragments = vec![
            Ok(Fragment::text("Partial")),
            Err("This model's maximum context length is 4096 tokens".to_string()),
        ];
        let service = service(store.clone(), Arc::new(BroadcastPublisher::default()), fragments);

        let result = service
            .process_turn("chat-1", None, "summarize everything", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome, StreamOutcome::TokenLimitExceeded);
        assert_eq!(result.answer.content, service.options().token_limit_retry_notice);
        assert!(result.answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_other_stream_errors_fail_the_turn() {
        let store = store();
        let fragments = vec![Err("connection reset".to_string())];
        let service = service(store.clone(), Arc::new(BroadcastPublisher::default()), fragments);

        let err = service
            .process_turn("chat-1", None, "hello", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ContextError::Model(_)));
        assert!(store.answers("chat-1").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chat_is_not_found() {
        let store = Arc::new(InMemoryChatStore::new());
        let service = service(store.clone(), Arc::new(BroadcastPublisher::default()), vec![]);

        let err = service
            .process_turn("missing", None, "hello", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(store.find_messages("missing", 0, 10).await.unwrap().is_empty());
    }
}
