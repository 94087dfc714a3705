//! Streaming citation resolution
//!
//! Consumes answer fragments in arrival order and:
//! - deduplicates citation events by source, labelling repeats "- Part N"
//! - assigns each distinct `[docN]` marker a display index in first-seen order
//! - rewrites markers in the current fragment to `^index^`
//! - narrows the citation list to the sources referenced so far

use super::models::{Citation, Fragment, StreamUpdate};
use crate::config::PromptOptions;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// `[docN]` with an optional trailing comma
static MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(doc\d+)\],?").expect("marker pattern is valid"));

/// Per-turn settings for the resolver
#[derive(Debug, Clone)]
pub struct ResolverPolicy {
    /// Force the citation list empty regardless of markers
    pub suppress_citations: bool,
    pub token_limit_marker: String,
    pub retry_notice: String,
}

impl ResolverPolicy {
    pub fn for_turn(options: &PromptOptions, specialization_id: Option<&str>) -> Self {
        Self {
            suppress_citations: options.suppresses_citations(specialization_id),
            token_limit_marker: options.token_limit_error_marker.clone(),
            retry_notice: options.token_limit_retry_notice.clone(),
        }
    }
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self::for_turn(&PromptOptions::default(), None)
    }
}

/// 1-based position a marker key points at ("doc3" -> 3)
fn marker_position(key: &str) -> Option<usize> {
    key.strip_prefix("doc")?.parse().ok()
}

/// Resolver state for one streamed answer
#[derive(Debug, Clone)]
pub struct StreamingCitationResolver {
    policy: ResolverPolicy,
    accumulated_text: String,
    display_text: String,
    raw_citations: Vec<Citation>,
    source_occurrences: HashMap<String, usize>,
    marker_map: IndexMap<String, usize>,
    display_index_counter: usize,
    filtered_citations: Vec<Citation>,
    aborted: bool,
}

impl StreamingCitationResolver {
    pub fn new(policy: ResolverPolicy) -> Self {
        Self {
            policy,
            accumulated_text: String::new(),
            display_text: String::new(),
            raw_citations: Vec::new(),
            source_occurrences: HashMap::new(),
            marker_map: IndexMap::new(),
            display_index_counter: 0,
            filtered_citations: Vec::new(),
            aborted: false,
        }
    }

    /// Process the next fragment and return the update to publish
    pub fn process(&mut self, fragment: &Fragment) -> StreamUpdate {
        if self.aborted {
            return StreamUpdate {
                display_text_delta: String::new(),
                citations: Vec::new(),
                replaces_content: false,
            };
        }
        if self.is_token_limit_error(&fragment.text) {
            return self.abort_with_notice();
        }

        self.accumulated_text.push_str(&fragment.text);
        self.absorb_citations(fragment);
        self.resolve_markers();
        self.filtered_citations = self.referenced_citations();

        let rewritten = self.rewrite(&fragment.text);
        self.display_text.push_str(&rewritten);

        StreamUpdate {
            display_text_delta: rewritten,
            citations: self.filtered_citations.clone(),
            replaces_content: false,
        }
    }

    /// Handle an error surfaced by the model stream
    ///
    /// Returns the final update when the error is the oversized-request
    /// condition; any other error is left to the caller.
    pub fn process_error(&mut self, message: &str) -> Option<StreamUpdate> {
        if self.is_token_limit_error(message) {
            Some(self.abort_with_notice())
        } else {
            None
        }
    }

    pub fn is_token_limit_error(&self, text: &str) -> bool {
        !self.policy.token_limit_marker.is_empty() && text.contains(&self.policy.token_limit_marker)
    }

    /// Replace the displayed content with the retry notice and stop
    pub fn abort_with_notice(&mut self) -> StreamUpdate {
        warn!("Answer exceeded the model's token limit; replacing content with retry notice");
        self.aborted = true;
        self.display_text = self.policy.retry_notice.clone();
        self.filtered_citations.clear();

        StreamUpdate {
            display_text_delta: self.display_text.clone(),
            citations: Vec::new(),
            replaces_content: true,
        }
    }

    fn absorb_citations(&mut self, fragment: &Fragment) {
        for (position, event) in fragment.citations.iter().enumerate() {
            let source = event.source.as_str();
            let count = {
                let count = self.source_occurrences.entry(source.to_string()).or_insert(0);
                *count += 1;
                *count
            };

            let display_name = if count == 1 {
                let repeated_here = fragment
                    .citations
                    .iter()
                    .enumerate()
                    .any(|(other, e)| other != position && e.source == source);
                if repeated_here {
                    format!("{} - Part 1", source)
                } else {
                    source.to_string()
                }
            } else {
                if count == 2 {
                    self.relabel_first_occurrence(source);
                }
                format!("{} - Part {}", source, count)
            };

            self.raw_citations.push(
                Citation::new(source, display_name, event.snippet.clone()).with_url(event.url.clone()),
            );
        }
    }

    /// Retro-label a source's unsuffixed first occurrence as "Part 1"
    fn relabel_first_occurrence(&mut self, source: &str) {
        if let Some(first) = self
            .raw_citations
            .iter_mut()
            .find(|c| c.source_identity == source && c.display_source_name == source)
        {
            first.display_source_name = format!("{} - Part 1", source);
        }
    }

    /// Assign display indices to markers not seen before
    ///
    /// Scans the whole accumulated text since a marker may span fragments.
    fn resolve_markers(&mut self) {
        for caps in MARKER_PATTERN.captures_iter(&self.accumulated_text) {
            let key = &caps[1];
            if !self.marker_map.contains_key(key) {
                self.display_index_counter += 1;
                self.marker_map.insert(key.to_string(), self.display_index_counter);
                debug!("Marker {} -> {}", key, self.display_index_counter);
            }
        }
    }

    fn referenced_citations(&self) -> Vec<Citation> {
        if self.policy.suppress_citations {
            return Vec::new();
        }

        let referenced: HashSet<&str> = self
            .marker_map
            .keys()
            .filter_map(|key| marker_position(key))
            .filter_map(|n| n.checked_sub(1))
            .filter_map(|index| self.raw_citations.get(index))
            .map(|c| c.display_source_name.as_str())
            .collect();

        self.raw_citations
            .iter()
            .filter(|c| referenced.contains(c.display_source_name.as_str()))
            .cloned()
            .collect()
    }

    fn rewrite(&self, text: &str) -> String {
        MARKER_PATTERN
            .replace_all(text, |caps: &Captures| match self.marker_map.get(&caps[1]) {
                Some(index) => format!("^{}^", index),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Rewritten answer text so far
    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    /// Citations referenced so far, in retrieval order
    pub fn citations(&self) -> &[Citation] {
        &self.filtered_citations
    }

    /// Every citation event seen, deduplicated and labelled
    pub fn raw_citations(&self) -> &[Citation] {
        &self.raw_citations
    }

    pub fn marker_map(&self) -> &IndexMap<String, usize> {
        &self.marker_map
    }

    pub fn into_parts(self) -> (String, Vec<Citation>) {
        (self.display_text, self.filtered_citations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::models::CitationEvent;

    fn resolver() -> StreamingCitationResolver {
        StreamingCitationResolver::new(ResolverPolicy::default())
    }

    fn names(citations: &[Citation]) -> Vec<&str> {
        citations.iter().map(|c| c.display_source_name.as_str()).collect()
    }

    #[test]
    fn test_markers_rewritten_across_fragments() {
        let mut resolver = resolver();
        let first = Fragment::text("See [doc1] and ").with_citations(vec![
            CitationEvent::new("a.pdf", "alpha"),
            CitationEvent::new("b.pdf", "beta"),
        ]);
        let second = Fragment::text("[doc2].");

        let update = resolver.process(&first);
        assert_eq!(update.display_text_delta, "See ^1^ and ");
        assert_eq!(names(&update.citations), vec!["a.pdf"]);

        let update = resolver.process(&second);
        assert_eq!(update.display_text_delta, "^2^.");
        assert_eq!(names(&update.citations), vec!["a.pdf", "b.pdf"]);

        assert_eq!(resolver.display_text(), "See ^1^ and ^2^.");
        assert_eq!(resolver.marker_map().get("doc1"), Some(&1));
        assert_eq!(resolver.marker_map().get("doc2"), Some(&2));
    }

    #[test]
    fn test_display_index_is_first_seen_order() {
        let mut resolver = resolver();
        let fragment = Fragment::text("[doc3] then [doc1], and [doc3] again").with_citations(vec![
            CitationEvent::new("a.pdf", ""),
            CitationEvent::new("b.pdf", ""),
            CitationEvent::new("c.pdf", ""),
        ]);

        let update = resolver.process(&fragment);
        assert_eq!(update.display_text_delta, "^1^ then ^2^ and ^1^ again");
        assert_eq!(names(&update.citations), vec!["a.pdf", "c.pdf"]);

        resolver.process(&Fragment::text(" [doc2] [doc1]"));
        assert_eq!(resolver.marker_map().get("doc3"), Some(&1));
        assert_eq!(resolver.marker_map().get("doc1"), Some(&2));
        assert_eq!(resolver.marker_map().get("doc2"), Some(&3));
        assert_eq!(names(resolver.citations()), vec!["a.pdf", "b.pdf", "c.pdf"]);
    }

    #[test]
    fn test_marker_split_across_fragments_is_indexed_not_rewritten() {
        let mut resolver = resolver();
        resolver.process(&Fragment::text("Answer [do"));
        let update = resolver.process(&Fragment::text("c1] here"));

        assert_eq!(update.display_text_delta, "c1] here");
        assert_eq!(resolver.marker_map().get("doc1"), Some(&1));
    }

    #[test]
    fn test_repeated_source_in_one_fragment() {
        let mut resolver = resolver();
        resolver.process(&Fragment::text("").with_citations(vec![
            CitationEvent::new("a.pdf", "one"),
            CitationEvent::new("a.pdf", "two"),
        ]));

        assert_eq!(
            names(resolver.raw_citations()),
            vec!["a.pdf - Part 1", "a.pdf - Part 2"]
        );
    }

    #[test]
    fn test_repeated_source_across_fragments_retro_labels() {
        let mut resolver = resolver();
        resolver.process(&Fragment::text("").with_citations(vec![CitationEvent::new("a.pdf", "one")]));
        assert_eq!(names(resolver.raw_citations()), vec!["a.pdf"]);

        resolver.process(&Fragment::text("").with_citations(vec![CitationEvent::new("a.pdf", "two")]));
        assert_eq!(
            names(resolver.raw_citations()),
            vec!["a.pdf - Part 1", "a.pdf - Part 2"]
        );

        resolver.process(&Fragment::text("").with_citations(vec![CitationEvent::new("a.pdf", "three")]));
        assert_eq!(
            names(resolver.raw_citations()),
            vec!["a.pdf - Part 1", "a.pdf - Part 2", "a.pdf - Part 3"]
        );
    }

    #[test]
    fn test_single_occurrence_keeps_plain_name() {
        let mut resolver = resolver();
        resolver.process(&Fragment::text("[doc1]").with_citations(vec![
            CitationEvent::new("a.pdf", ""),
            CitationEvent::new("b.csv", ""),
        ]));
        assert_eq!(names(resolver.raw_citations()), vec!["a.pdf", "b.csv"]);
        assert_eq!(resolver.raw_citations()[1].content_type, "text/csv");
    }

    #[test]
    fn test_suppressed_citations_stay_empty() {
        let policy = ResolverPolicy::for_turn(&PromptOptions::default(), Some("general"));
        let mut resolver = StreamingCitationResolver::new(policy);

        let update = resolver.process(
            &Fragment::text("See [doc1].").with_citations(vec![CitationEvent::new("a.pdf", "")]),
        );
        assert_eq!(update.display_text_delta, "See ^1^.");
        assert!(update.citations.is_empty());
        assert!(resolver.citations().is_empty());
    }

    #[test]
    fn test_marker_without_citation_is_ignored_in_filter() {
        let mut resolver = resolver();
        let update = resolver.process(
            &Fragment::text("[doc0] [doc7]").with_citations(vec![CitationEvent::new("a.pdf", "")]),
        );
        assert_eq!(update.display_text_delta, "^1^ ^2^");
        assert!(update.citations.is_empty());
    }

    #[test]
    fn test_token_limit_fragment_aborts() {
        let mut resolver = resolver();
        resolver.process(&Fragment::text("Partial answer"));

        let update = resolver.process(&Fragment::text(
            "This model's maximum context length is 4097 tokens",
        ));
        assert!(update.replaces_content);
        assert_eq!(update.display_text_delta, PromptOptions::default().token_limit_retry_notice);
        assert!(resolver.is_aborted());

        let after = resolver.process(&Fragment::text("more"));
        assert!(after.display_text_delta.is_empty());
        assert_eq!(resolver.display_text(), PromptOptions::default().token_limit_retry_notice);
    }

    #[test]
    fn test_other_errors_are_not_handled() {
        let mut resolver = resolver();
        assert!(resolver.process_error("connection reset").is_none());
        assert!(!resolver.is_aborted());
        assert!(resolver
            .process_error("HTTP 400: maximum context length exceeded")
            .is_some());
    }

    #[test]
    fn test_fresh_resolvers_agree() {
        let fragments = vec![
            Fragment::text("Per [doc2], ").with_citations(vec![
                CitationEvent::new("a.pdf", "x"),
                CitationEvent::new("a.pdf", "y"),
                CitationEvent::new("b.docx", "z"),
            ]),
            Fragment::text("and [doc3] [doc"),
            Fragment::text("1]."),
        ];

        let run = || {
            let mut resolver = resolver();
            for fragment in &fragments {
                resolver.process(fragment);
            }
            resolver.into_parts()
        };

        assert_eq!(run(), run());
    }
}
