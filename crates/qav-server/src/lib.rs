//! qav-server - Service facade
//!
//! This crate exposes every retrieval and indexing operation behind one
//! service struct, as typed methods and as named tools returning JSON.
//!
//! # Tools
//!
//! - `search` - Hybrid passage search over a collection
//! - `create_index` - Create an index, or describe it if it exists
//! - `delete_index` - Delete an index
//! - `get_mapping` - Show an index mapping
//! - `index_document` - Store a raw document
//! - `delete_document` - Delete a document by id
//! - `add_annotations` - Replace the entity annotations of a document
//! - `index_mongo_document` - Store a Mongo-shaped document
//! - `index_document_with_processing` - Annotate, chunk, embed and store a document
//! - `query_index` - Faceted, paginated document query

mod documents;
mod index_query;
mod service;

pub use documents::{
    chunk_vectors, clean_document, mongo_to_document, ProcessDocumentRequest, METADATA_FEATURES,
};
pub use index_query::{
    FacetFilter, FacetValue, IndexHit, IndexQuery, IndexQueryResponse, Pagination, QueryFacets,
};
pub use service::{
    AnnotationsParams, DeleteDocumentParams, DocumentParams, IndexParams, ProcessDocumentParams,
    QavService, QueryIndexParams, SearchParams, ServerInfo, ToolInfo, ToolResult,
};
