//! Action-extraction pipeline: normalizer, prompts, extractor, and the
//! background worker that drives them.

pub mod action;
pub mod extractor;
pub mod prompts;
pub mod transform;
pub mod worker;

pub use action::{ActionRecord, estimate, parse_action};
pub use extractor::{ActionExtractor, ExtractOutcome, ExtractRequest};
pub use transform::transform;
pub use worker::{process_pending, spawn_extraction_worker};
