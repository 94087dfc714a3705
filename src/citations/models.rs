//! Citation data models

use serde::{Deserialize, Serialize};

/// Source document referenced by an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Stable identity of the source, usually its file path
    pub source_identity: String,
    /// Name shown to the user; carries a "- Part N" suffix for repeated sources
    pub display_source_name: String,
    pub snippet: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Citation {
    pub fn new(
        source_identity: impl Into<String>,
        display_source_name: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        let source_identity = source_identity.into();
        let content_type = content_type_for(&source_identity).to_string();
        Self {
            source_identity,
            display_source_name: display_source_name.into(),
            snippet: snippet.into(),
            content_type,
            url: None,
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// Raw citation event carried alongside a streamed fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationEvent {
    pub source: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl CitationEvent {
    pub fn new(source: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            snippet: snippet.into(),
            url: None,
        }
    }
}

/// One incremental piece of a streamed answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<CitationEvent>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<CitationEvent>) -> Self {
        self.citations = citations;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.citations.is_empty()
    }
}

/// Update pushed to clients after each fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    pub display_text_delta: String,
    pub citations: Vec<Citation>,
    /// The delta replaces everything shown so far instead of appending
    #[serde(default)]
    pub replaces_content: bool,
}

/// MIME type for a source, looked up by file extension
pub fn content_type_for(source: &str) -> &'static str {
    let extension = source
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}
