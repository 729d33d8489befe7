//! Passage selection from the fused ranking.

use qav_core::{ChunkRecord, ModeParams, RetrievalConfig};

use crate::fusion::FusedChunk;
use crate::params::SearchMode;

/// Selected passages of one document, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocChunks {
    pub doc_id: String,
    pub chunks: Vec<ChunkRecord>,
}

/// Select passages, grouped by document in best-document-first order.
///
/// Single-document mode keeps the top `chunks_to_gather` chunks. Otherwise
/// the whole ranking is grouped by document, documents are ordered by their
/// best chunk, and at most `max_docs` documents with `max_chunks_per_doc`
/// chunks each are kept.
pub fn select(
    fused: &[FusedChunk],
    mode: SearchMode,
    params: &ModeParams,
    config: &RetrievalConfig,
) -> Vec<DocChunks> {
    match mode {
        SearchMode::SingleDocument => {
            let top = &fused[..fused.len().min(params.chunks_to_gather)];
            group_by_document(top)
        }
        SearchMode::MultiDocument => {
            let mut groups = group_by_document(fused);
            groups.truncate(config.max_docs);
            for group in &mut groups {
                group.chunks.truncate(config.max_chunks_per_doc);
            }
            groups
        }
    }
}

/// Group chunks by document, in order of first appearance.
///
/// On a ranking sorted by descending score, first appearance is the
/// document's best chunk, so groups come out ordered by best chunk score and
/// each group's chunks stay in score order.
fn group_by_document(chunks: &[FusedChunk]) -> Vec<DocChunks> {
    let mut groups: Vec<DocChunks> = Vec::new();

    for chunk in chunks {
        let doc_id = &chunk.key.doc_id;
        let record = ChunkRecord::new(doc_id, &chunk.payload.text, &chunk.payload.text_anonymized);

        match groups.iter_mut().find(|g| &g.doc_id == doc_id) {
            Some(group) => group.chunks.push(record),
            None => groups.push(DocChunks {
                doc_id: doc_id.clone(),
                chunks: vec![record],
            }),
        }
    }

    groups
}
