//! ============================================================================
//! Flow Module - The licensed fetch workflow
//! ============================================================================
//! - AccessFlowOrchestrator: mint → redeem → receipt with relay fallback
//! - messages: status lines and error guidance shown to the user
//! - presentation: content previews, receipt and proof blocks
//! ============================================================================

pub mod messages;
mod orchestrator;
pub mod presentation;

pub use messages::classify_error;
pub use orchestrator::{AccessFlowOrchestrator, ConnectionStatus, RunInput, RunReport};
pub use presentation::{content_preview, proof_block, receipt_block, PREVIEW_LIMIT};
