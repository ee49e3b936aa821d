use crate::retrieval::RetrievalEngine;
use crate::traits::{EvidenceConsumer, WebSearch};
use crate::{EvidenceItem, EvidenceKind, EvidenceSourceError, MergedEvidence, WebHit};
use std::fmt::Display;
use std::time::Duration;

pub const EMPTY_QUERY_MESSAGE: &str = "Please enter a question.";
pub const NO_RESULTS_MESSAGE: &str = "No results found.";
pub const SYNTHESIS_FAILED_MESSAGE: &str =
    "Sorry, I could not generate an answer from the sources found. Please try again later.";

/// Which evidence sources a query consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    Hybrid,
    DocumentsOnly,
    WebOnly,
}

impl SearchScope {
    fn documents(self) -> bool {
        matches!(self, Self::Hybrid | Self::DocumentsOnly)
    }

    fn web(self) -> bool {
        matches!(self, Self::Hybrid | Self::WebOnly)
    }
}

/// Web hits ranked first get score 1, the last one `1 / n`.
pub fn web_evidence(hits: Vec<WebHit>) -> Vec<EvidenceItem> {
    let total = hits.len();
    hits.into_iter()
        .enumerate()
        .map(|(position, hit)| EvidenceItem {
            title: hit.title,
            url_or_filename: hit.url,
            content: hit.content.unwrap_or_else(|| hit.snippet.clone()),
            snippet: hit.snippet,
            domain_or_source: hit.domain,
            relevance_score: (total - position) as f64 / total as f64,
            kind: EvidenceKind::Web,
        })
        .collect()
}

/// Keeps both sides as separate labeled lists. A side that failed becomes
/// empty; the other side is kept.
pub fn merge<DE, WE>(
    documents: Result<Vec<EvidenceItem>, DE>,
    web: Result<Vec<WebHit>, WE>,
) -> MergedEvidence
where
    DE: Display,
    WE: Display,
{
    let document_results = documents.unwrap_or_else(|error| {
        tracing::warn!(error = %error, "document retrieval failed");
        Vec::new()
    });
    let web_results = match web {
        Ok(hits) => web_evidence(hits),
        Err(error) => {
            tracing::warn!(error = %error, "web search failed");
            Vec::new()
        }
    };

    MergedEvidence {
        total_count: document_results.len() + web_results.len(),
        document_results,
        web_results,
    }
}

pub struct HybridSearch<W>
where
    W: WebSearch,
{
    retrieval: RetrievalEngine,
    web: W,
    document_results: usize,
    web_results: usize,
    web_timeout: Duration,
}

impl<W> HybridSearch<W>
where
    W: WebSearch,
{
    pub fn new(retrieval: RetrievalEngine, web: W) -> Self {
        Self {
            retrieval,
            web,
            document_results: 3,
            web_results: 2,
            web_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_limits(mut self, document_results: usize, web_results: usize) -> Self {
        self.document_results = document_results;
        self.web_results = web_results;
        self
    }

    pub fn with_web_timeout(mut self, web_timeout: Duration) -> Self {
        self.web_timeout = web_timeout;
        self
    }

    pub async fn search(&self, query: &str) -> MergedEvidence {
        self.search_scoped(query, SearchScope::Hybrid).await
    }

    /// Runs both sides concurrently. The web side is bounded by the web
    /// timeout, and running out of time counts as a failed side.
    pub async fn search_scoped(&self, query: &str, scope: SearchScope) -> MergedEvidence {
        let documents = async {
            if scope.documents() {
                self.retrieval.retrieve(query, self.document_results).await
            } else {
                Ok::<_, crate::IndexError>(Vec::new())
            }
        };

        let web = async {
            if !scope.web() || self.web_results == 0 {
                return Ok::<_, EvidenceSourceError>(Vec::new());
            }
            let search = self.web.search(query, self.web_results);
            match tokio::time::timeout(self.web_timeout, search).await {
                Ok(result) => result.map(|mut hits| {
                    hits.truncate(self.web_results);
                    hits
                }),
                Err(_) => Err(EvidenceSourceError::Timeout {
                    source_name: "web search".to_string(),
                    seconds: self.web_timeout.as_secs(),
                }),
            }
        };

        let (documents, web) = tokio::join!(documents, web);
        let merged = merge(documents, web);

        tracing::debug!(
            query,
            documents = merged.document_results.len(),
            web = merged.web_results.len(),
            "hybrid search"
        );
        merged
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub evidence: MergedEvidence,
}

/// Gathers evidence and asks the consumer for a cited answer. Always
/// produces an answer; failures become user-facing text.
pub struct ResearchAssistant<W, C>
where
    W: WebSearch,
    C: EvidenceConsumer,
{
    search: HybridSearch<W>,
    consumer: C,
}

impl<W, C> ResearchAssistant<W, C>
where
    W: WebSearch,
    C: EvidenceConsumer,
{
    pub fn new(search: HybridSearch<W>, consumer: C) -> Self {
        Self { search, consumer }
    }

    pub async fn answer(&self, query: &str) -> Answer {
        self.answer_scoped(query, SearchScope::Hybrid).await
    }

    pub async fn answer_scoped(&self, query: &str, scope: SearchScope) -> Answer {
        let query = query.trim();
        if query.is_empty() {
            return Answer {
                text: EMPTY_QUERY_MESSAGE.to_string(),
                evidence: MergedEvidence::default(),
            };
        }

        let evidence = self.search.search_scoped(query, scope).await;
        if evidence.is_empty() {
            return Answer {
                text: NO_RESULTS_MESSAGE.to_string(),
                evidence,
            };
        }

        let text = match self.consumer.synthesize(query, &evidence.cited()).await {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(query, error = %error, "answer synthesis failed");
                SYNTHESIS_FAILED_MESSAGE.to_string()
            }
        };

        Answer { text, evidence }
    }
}
