//! Configuration for prompt assembly, the model endpoint and logging
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `COPILOT__`-prefixed environment variables (`COPILOT__PROMPT__MAX_PAST_MESSAGES`).

use crate::context::TokenBudgetPlanner;
use crate::error::Result;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub prompt: PromptOptions,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration file {}", path);
            builder = builder.add_source(::config::File::from(Path::new(path)).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("COPILOT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.model = config.model.from_env();
        config.prompt.validate()?;
        Ok(config)
    }
}

/// Prompt assembly options
///
/// Cloned by value into every turn; never mutated while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOptions {
    /// Total token ceiling of the completion model (prompt + response)
    #[serde(default = "default_completion_token_limit")]
    pub completion_token_limit: i64,

    /// Tokens reserved for the model's answer
    #[serde(default = "default_response_token_limit")]
    pub response_token_limit: i64,

    /// Tokens reserved for function/tool call definitions
    #[serde(default = "default_function_call_token_buffer")]
    pub function_call_token_buffer: i64,

    #[serde(default)]
    pub extra_overhead_tokens: i64,

    /// Share of the remaining budget given to memory text, in (0, 1]
    #[serde(default = "default_memory_weight")]
    pub memories_response_context_weight: f64,

    #[serde(default = "default_max_past_messages")]
    pub max_past_messages: usize,

    #[serde(default = "default_true")]
    pub intent_extraction_enabled: bool,

    #[serde(default = "default_response_temperature")]
    pub response_temperature: f32,

    #[serde(default)]
    pub extraction_temperature: f32,

    #[serde(default = "default_knowledge_cutoff")]
    pub knowledge_cutoff_date: String,

    #[serde(default = "default_system_description")]
    pub system_description: String,

    #[serde(default = "default_system_response")]
    pub system_response: String,

    #[serde(default = "default_system_audience")]
    pub system_audience: String,

    #[serde(default = "default_system_audience_continuation")]
    pub system_audience_continuation: String,

    #[serde(default = "default_system_intent")]
    pub system_intent: String,

    #[serde(default = "default_system_intent_continuation")]
    pub system_intent_continuation: String,

    /// Specialization that answers without citation restrictions
    #[serde(default = "default_specialization_id")]
    pub default_specialization_id: String,

    /// Error text fragment that identifies an oversized request
    #[serde(default = "default_token_limit_marker")]
    pub token_limit_error_marker: String,

    #[serde(default = "default_token_limit_notice")]
    pub token_limit_retry_notice: String,
}

fn default_completion_token_limit() -> i64 { 4096 }
fn default_response_token_limit() -> i64 { 1024 }
fn default_function_call_token_buffer() -> i64 { 256 }
fn default_memory_weight() -> f64 { 0.6 }
fn default_max_past_messages() -> usize { 100 }
fn default_true() -> bool { true }
fn default_response_temperature() -> f32 { 0.7 }
fn default_knowledge_cutoff() -> String { "Saturday, January 1, 2022".to_string() }
fn default_specialization_id() -> String { "general".to_string() }
fn default_token_limit_marker() -> String { "maximum context length".to_string() }

fn default_token_limit_notice() -> String {
    "The conversation has grown too long for me to answer. Please start a new chat or shorten your question and try again.".to_string()
}

fn default_system_description() -> String {
    "This is a chat between an intelligent AI bot named Copilot and one or more participants. \
     The bot was trained on data through {{knowledgeCutoff}} and is not aware of events after that date. \
     Current date: {{currentDate}}."
        .to_string()
}

fn default_system_response() -> String {
    "Provide a response to the last message. When you use retrieved documents, cite them inline \
     with their [docN] marker. Do not invent sources."
        .to_string()
}

fn default_system_audience() -> String {
    "Below is a chat history between an intelligent AI bot named Copilot with one or more participants.".to_string()
}

fn default_system_audience_continuation() -> String {
    "Using the provided chat history, generate a list of names of the participants of this chat. \
     Do not include 'bot' or 'copilot'. The output should be a single rewritten sentence containing \
     only a comma separated list of names. List of participants:"
        .to_string()
}

fn default_system_intent() -> String {
    "Rewrite the last message to reflect the user's intent, taking into consideration the provided \
     chat history. The output should be a single rewritten sentence that describes the user's intent \
     and is understandable outside of the context of the chat history."
        .to_string()
}

fn default_system_intent_continuation() -> String {
    "REWRITTEN INTENT WITH EMBEDDED CONTEXT:".to_string()
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            completion_token_limit: default_completion_token_limit(),
            response_token_limit: default_response_token_limit(),
            function_call_token_buffer: default_function_call_token_buffer(),
            extra_overhead_tokens: 0,
            memories_response_context_weight: default_memory_weight(),
            max_past_messages: default_max_past_messages(),
            intent_extraction_enabled: default_true(),
            response_temperature: default_response_temperature(),
            extraction_temperature: 0.0,
            knowledge_cutoff_date: default_knowledge_cutoff(),
            system_description: default_system_description(),
            system_response: default_system_response(),
            system_audience: default_system_audience(),
            system_audience_continuation: default_system_audience_continuation(),
            system_intent: default_system_intent(),
            system_intent_continuation: default_system_intent_continuation(),
            default_specialization_id: default_specialization_id(),
            token_limit_error_marker: default_token_limit_marker(),
            token_limit_retry_notice: default_token_limit_notice(),
        }
    }
}

impl PromptOptions {
    /// Validate ranges that cannot be expressed in the type
    pub fn validate(&self) -> Result<()> {
        TokenBudgetPlanner::from_options(self)?;
        Ok(())
    }

    /// Response reservation, preferring the specialization override
    pub fn response_limit_for(&self, specialization: Option<&Specialization>) -> i64 {
        specialization
            .and_then(|s| s.response_token_limit)
            .unwrap_or(self.response_token_limit)
    }

    /// History window size, preferring the specialization override
    pub fn past_messages_for(&self, specialization: Option<&Specialization>) -> usize {
        specialization
            .and_then(|s| s.past_messages_included)
            .unwrap_or(self.max_past_messages)
    }

    /// Whether citations are suppressed for the active specialization
    pub fn suppresses_citations(&self, specialization_id: Option<&str>) -> bool {
        specialization_id == Some(self.default_specialization_id.as_str())
    }
}

/// Per-chat persona with optional overrides of the global prompt options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specialization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role_information: String,
    #[serde(default)]
    pub response_token_limit: Option<i64>,
    #[serde(default)]
    pub past_messages_included: Option<usize>,
}

/// OpenAI-compatible model endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Read from `OPENAI_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_timeout_ms() -> u64 { 120_000 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ModelConfig {
    /// Fill the API key from the environment if not configured
    pub fn from_env(mut self) -> Self {
        if self.api_key.is_none() {
            if let Ok(val) = std::env::var("OPENAI_API_KEY") {
                self.api_key = Some(SecretString::new(val));
            }
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_prompt_options() {
        let options = PromptOptions::default();
        assert_eq!(options.completion_token_limit, 4096);
        assert_eq!(options.max_past_messages, 100);
        assert!(options.intent_extraction_enabled);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_memory_weight() {
        let options = PromptOptions {
            memories_response_context_weight: 1.5,
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(err, crate::error::ContextError::Configuration(_)));
        assert!(err.to_string().contains("1.5"));

        let options = PromptOptions {
            memories_response_context_weight: 0.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_specialization_overrides_take_precedence() {
        let options = PromptOptions::default();
        let specialization = Specialization {
            id: "legal".to_string(),
            name: "Legal".to_string(),
            response_token_limit: Some(2048),
            past_messages_included: Some(10),
            ..Default::default()
        };

        assert_eq!(options.response_limit_for(Some(&specialization)), 2048);
        assert_eq!(options.past_messages_for(Some(&specialization)), 10);

        let plain = Specialization {
            id: "plain".to_string(),
            ..Default::default()
        };
        assert_eq!(options.response_limit_for(Some(&plain)), 1024);
        assert_eq!(options.past_messages_for(None), 100);
    }

    #[test]
    fn test_default_specialization_suppresses_citations() {
        let options = PromptOptions::default();
        assert!(options.suppresses_citations(Some("general")));
        assert!(!options.suppresses_citations(Some("legal")));
        assert!(!options.suppresses_citations(None));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("copilot-config-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[prompt]\ncompletion_token_limit = 8192\nmax_past_messages = 25\n\n[logging]\nlevel = \"debug\"\njson = true"
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.prompt.completion_token_limit, 8192);
        assert_eq!(config.prompt.max_past_messages, 25);
        assert_eq!(config.prompt.response_token_limit, 1024);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_model_config_timeout() {
        let config = ModelConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(120));
    }
}
