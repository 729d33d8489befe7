//! Adaptive retrieval parameters.

use qav_core::{ModeParams, RetrievalConfig, SearchRequest};

/// Candidate-pool regime of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Exactly one target document id.
    SingleDocument,
    /// No target ids, or more than one.
    MultiDocument,
}

impl SearchMode {
    pub fn for_request(request: &SearchRequest) -> Self {
        if request.single_target().is_some() {
            Self::SingleDocument
        } else {
            Self::MultiDocument
        }
    }

    /// Parameter set for this mode.
    pub fn params(self, config: &RetrievalConfig) -> ModeParams {
        match self {
            Self::SingleDocument => config.single_doc,
            Self::MultiDocument => config.multi_doc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleDocument => "single-document",
            Self::MultiDocument => "multi-document",
        }
    }
}
