//! Data contracts and pure algorithms shared by the nanoprompt engine and CLI.

pub mod events;
pub mod extract;
pub mod models;
pub mod rewrite;
pub mod templates;

pub use extract::{extract, extract_json_block, ExtractionFailure, ExtractionOutcome};
pub use rewrite::{RewriteFailure, RewriteOutcome, RewriteResult};
pub use templates::{PromptTemplate, TemplateCatalog, TEMPLATES};
