//! Whole-document versus passage decision.

use tracing::{debug, info};

use qav_core::{ChunkRecord, Document, DocumentResult, Result, RetrievalConfig, SearchRequest, TokenCounter};

/// Which branch of the policy produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Caller forced passages.
    ForceRag,
    /// The single target document fits the budget and is returned whole.
    SingleDocument,
    /// Extraction/summarization intent and all documents fit the budget.
    WholeDocuments,
    /// Selected passages.
    Passages,
}

/// Token budget and trigger keywords for returning whole documents.
pub struct FullDocumentPolicy<'a> {
    pub token_budget: usize,
    pub keywords: &'a [String],
    pub tokens: &'a dyn TokenCounter,
}

impl<'a> FullDocumentPolicy<'a> {
    pub fn new(config: &'a RetrievalConfig, tokens: &'a dyn TokenCounter) -> Self {
        Self {
            token_budget: config.full_doc_token_budget,
            keywords: &config.full_doc_keywords,
            tokens,
        }
    }

    /// Whether the query asks for extraction or summarization.
    pub fn wants_whole_documents(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && query.contains(&k.to_lowercase()))
    }

    /// Decide how to present the retrieved documents.
    ///
    /// Checks run in order and the first match wins:
    /// 1. `force_rag` returns passages.
    /// 2. A single target document under the budget is returned whole.
    /// 3. A trigger keyword with all documents within the budget returns
    ///    every document whole.
    /// 4. Otherwise passages.
    pub fn decide(
        &self,
        retrieved: &[(Document, Vec<ChunkRecord>)],
        request: &SearchRequest,
    ) -> Result<(PolicyDecision, Option<usize>)> {
        if request.force_rag {
            return Ok((PolicyDecision::ForceRag, None));
        }

        if let Some(target) = request.single_target() {
            let index = retrieved
                .iter()
                .position(|(doc, _)| doc.id == target)
                .or(if retrieved.is_empty() { None } else { Some(0) });

            if let Some(index) = index {
                let count = self.tokens.count_tokens(&retrieved[index].0.text)?;
                debug!("Target document {} has {} tokens", retrieved[index].0.id, count);
                if count < self.token_budget {
                    return Ok((PolicyDecision::SingleDocument, Some(index)));
                }
            }
        }

        if self.wants_whole_documents(&request.query) {
            let mut total = 0usize;
            for (doc, _) in retrieved {
                total += self.tokens.count_tokens(&doc.text)?;
            }
            debug!("Retrieved documents total {} tokens", total);
            if total <= self.token_budget {
                return Ok((PolicyDecision::WholeDocuments, None));
            }
        }

        Ok((PolicyDecision::Passages, None))
    }
}

/// Build the response records from retrieved documents and their passages.
pub fn assemble(
    retrieved: Vec<(Document, Vec<ChunkRecord>)>,
    request: &SearchRequest,
    policy: &FullDocumentPolicy<'_>,
) -> Result<Vec<DocumentResult>> {
    let (decision, target) = policy.decide(&retrieved, request)?;
    info!("Full-document policy: {:?}", decision);

    let results = match decision {
        PolicyDecision::SingleDocument => retrieved
            .into_iter()
            .nth(target.unwrap_or(0))
            .map(|(doc, _)| whole(doc))
            .into_iter()
            .collect(),
        PolicyDecision::WholeDocuments => {
            retrieved.into_iter().map(|(doc, _)| whole(doc)).collect()
        }
        PolicyDecision::ForceRag | PolicyDecision::Passages => retrieved
            .into_iter()
            .map(|(doc, chunks)| DocumentResult {
                doc,
                chunks,
                full_docs: false,
            })
            .collect(),
    };

    Ok(results)
}

fn whole(doc: Document) -> DocumentResult {
    DocumentResult {
        chunks: vec![ChunkRecord::whole_document(&doc)],
        doc,
        full_docs: true,
    }
}
