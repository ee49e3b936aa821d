use crate::index::EmbeddingIndex;
use crate::{EvidenceItem, EvidenceKind, IndexError, IndexedUnit, MetadataFilter};
use serde_json::Value;
use std::collections::HashSet;

pub const SNIPPET_WINDOW_CHARS: usize = 200;
pub const SNIPPET_STEP_CHARS: usize = 50;
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetConfig {
    pub window: usize,
    pub step: usize,
}

impl Default for SnippetConfig {
    fn default() -> Self {
        Self {
            window: SNIPPET_WINDOW_CHARS,
            step: SNIPPET_STEP_CHARS,
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Distinct lowercased query tokens, in query order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens(query).filter(|term| seen.insert(term.clone())).collect()
}

/// Lowercased tokens of `chars` with their `[start, end)` char offsets.
fn token_spans(chars: &[char]) -> Vec<(usize, usize, String)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (position, ch) in chars.iter().enumerate() {
        match (ch.is_alphanumeric(), start) {
            (true, None) => start = Some(position),
            (false, Some(begin)) => {
                spans.push((begin, position, lowercase(&chars[begin..position])));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        spans.push((begin, chars.len(), lowercase(&chars[begin..])));
    }
    spans
}

fn lowercase(chars: &[char]) -> String {
    chars.iter().collect::<String>().to_lowercase()
}

/// Counts terms matching a token that lies wholly inside the window, so a
/// word cut by the window edge never matches.
fn window_score(
    spans: &[(usize, usize, String)],
    start: usize,
    end: usize,
    terms: &[String],
) -> usize {
    let present: HashSet<&str> = spans
        .iter()
        .filter(|(begin, finish, _)| *begin >= start && *finish <= end)
        .map(|(_, _, token)| token.as_str())
        .collect();
    terms.iter().filter(|term| present.contains(term.as_str())).count()
}

/// Picks the fixed-size window holding the most distinct query terms, the
/// earliest one on ties, and marks cut edges with an ellipsis.
pub fn build_snippet(text: &str, query: &str, config: SnippetConfig) -> String {
    let chars: Vec<char> = text.chars().collect();
    let window = config.window.max(1);
    let step = config.step.max(1);

    if chars.len() <= window {
        return text.trim().to_string();
    }

    let terms = query_terms(query);
    let spans = token_spans(&chars);
    let mut best_position = 0usize;
    let mut best_score = window_score(&spans, 0, window, &terms);

    let mut position = step;
    while position + window <= chars.len() {
        let score = window_score(&spans, position, position + window, &terms);
        if score > best_score {
            best_score = score;
            best_position = position;
        }
        position += step;
    }

    let body: String = chars[best_position..best_position + window].iter().collect();
    let mut snippet = String::with_capacity(body.len() + 2 * ELLIPSIS.len());
    if best_position > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(body.trim());
    if best_position + window < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Query-time path: one embedding, one index search, one snippet per hit.
#[derive(Clone)]
pub struct RetrievalEngine {
    index: EmbeddingIndex,
    snippet: SnippetConfig,
}

impl RetrievalEngine {
    pub fn new(index: EmbeddingIndex) -> Self {
        Self {
            index,
            snippet: SnippetConfig::default(),
        }
    }

    pub fn with_snippet_config(mut self, snippet: SnippetConfig) -> Self {
        self.snippet = snippet;
        self
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>, IndexError> {
        self.retrieve_filtered(query, k, None).await
    }

    /// Results are sorted by non-increasing relevance score in `[0, 1]`.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<EvidenceItem>, IndexError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let hits = self.index.search(query, k, filter).await?;

        let mut items: Vec<EvidenceItem> = hits
            .into_iter()
            .map(|(unit, distance)| self.to_evidence(query, unit, distance))
            .collect();
        items.sort_by(|left, right| right.relevance_score.total_cmp(&left.relevance_score));

        tracing::debug!(query, results = items.len(), "document retrieval");
        Ok(items)
    }

    fn to_evidence(&self, query: &str, unit: IndexedUnit, distance: f32) -> EvidenceItem {
        let total_chunks = unit
            .metadata
            .get("total_chunks")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let title = if total_chunks > 1 {
            format!("{} (part {}/{})", unit.filename, unit.chunk_index + 1, total_chunks)
        } else {
            unit.filename.clone()
        };

        EvidenceItem {
            title,
            url_or_filename: unit.filename,
            snippet: build_snippet(&unit.text, query, self.snippet),
            domain_or_source: "document".to_string(),
            relevance_score: (1.0 - f64::from(distance)).clamp(0.0, 1.0),
            content: unit.text,
            kind: EvidenceKind::Document,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::LocalCollection;
    use crate::{Metadata, NewUnit};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn strip_ellipses(snippet: &str) -> &str {
        let snippet = snippet.strip_prefix(ELLIPSIS).unwrap_or(snippet);
        snippet.strip_suffix(ELLIPSIS).unwrap_or(snippet)
    }

    #[test]
    fn query_terms_are_lowercase_and_distinct() {
        assert_eq!(
            query_terms("Pump, pump PRESSURE? flow"),
            vec!["pump".to_string(), "pressure".to_string(), "flow".to_string()]
        );
    }

    #[test]
    fn short_text_is_returned_whole() {
        assert_eq!(build_snippet("  short text ", "text", SnippetConfig::default()), "short text");
    }

    #[test]
    fn snippet_moves_to_the_window_with_most_terms() {
        let text = format!(
            "{} turbine blade inspection {}",
            "filler ".repeat(60),
            "tail ".repeat(60)
        );
        let snippet = build_snippet(&text, "turbine inspection", SnippetConfig::default());

        assert!(snippet.starts_with(ELLIPSIS));
        assert!(snippet.ends_with(ELLIPSIS));
        assert!(snippet.contains("turbine blade inspection"));
    }

    #[test]
    fn ties_keep_the_earliest_window() {
        let text = "alpha ".repeat(100);
        let snippet = build_snippet(&text, "alpha", SnippetConfig::default());
        assert!(!snippet.starts_with(ELLIPSIS));
        assert!(snippet.ends_with(ELLIPSIS));
    }

    #[test]
    fn no_matching_terms_keep_the_first_window() {
        let text = "lorem ipsum dolor sit amet ".repeat(20);
        let snippet = build_snippet(&text, "zebra", SnippetConfig::default());
        assert!(!snippet.starts_with(ELLIPSIS));
    }

    #[test]
    fn whole_tokens_only() {
        let config = SnippetConfig { window: 10, step: 5 };
        let text = "pumpkin xx pump zzzzzzzzz";
        let snippet = build_snippet(text, "pump", config);
        assert_eq!(snippet, "...in xx pump...");
    }

    #[test]
    fn word_cut_by_the_window_edge_does_not_match() {
        let config = SnippetConfig { window: 10, step: 5 };
        let text = "abcde pumpkin soup, then a pump broke.";
        let snippet = build_snippet(text, "pump", config);
        assert_eq!(snippet, "...a pump bro...");
    }

    #[test]
    fn snippet_is_a_contiguous_substring() {
        let text = "The quick brown fox jumps over the lazy dog near the river bank. ".repeat(12);
        for query in ["fox", "river bank", "lazy dog", "missing", ""] {
            let snippet = build_snippet(&text, query, SnippetConfig::default());
            assert!(text.contains(strip_ellipses(&snippet)), "query {query:?}");
        }
    }

    #[tokio::test]
    async fn retrieval_is_limited_to_k_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(dir.path(), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(CharacterNgramEmbedder::default()));

        let texts = [
            "The doc topic is retrieval augmented generation.",
            "A second chunk about the same doc topic and its evaluation.",
            "Unrelated closing remarks on formatting.",
        ];
        let units = texts
            .iter()
            .map(|text| NewUnit::new(*text, Metadata::new()))
            .collect();
        index.add("doc.txt", units).await?;

        let engine = RetrievalEngine::new(index);
        let results = engine.retrieve("doc topic", 2).await?;

        assert!(results.len() <= 2);
        assert!(!results.is_empty());
        for item in &results {
            assert_eq!(item.url_or_filename, "doc.txt");
            assert_eq!(item.kind, EvidenceKind::Document);
            assert!((0.0..=1.0).contains(&item.relevance_score));
            assert!(item.title.starts_with("doc.txt (part "));
        }
        assert!(results
            .windows(2)
            .all(|pair| pair[0].relevance_score >= pair[1].relevance_score));

        assert!(engine.retrieve("   ", 2).await?.is_empty());
        Ok(())
    }
}
