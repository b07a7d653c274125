//! Validation, deterministic repair, id allocation, and the bounded
//! refinement loop for generated conversational-flow documents.
//!
//! The pipeline: [`validator`] finds structural problems and types the rows,
//! [`repair`] applies one deterministic rule per finding, [`allocator`]
//! renumbers colliding ids into flow bands, and [`orchestrator`] drives the
//! loop against the external semantic validator with the generative repairer
//! as a guarded fallback. [`assembly`] runs many flow segments through the
//! loop concurrently and joins them deterministically.

pub mod allocator;
pub mod assembly;
pub mod diagnostic;
pub mod guardrail;
pub mod orchestrator;
pub mod repair;
pub mod signature;
pub mod validator;

pub use allocator::{remap, RemapResult};
pub use assembly::{refine_and_assemble, AssembledDocument, SegmentOutcome, DEFAULT_CONCURRENCY};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use guardrail::{check_proposal, residual_errors, GuardrailConfig, Verdict};
pub use orchestrator::{
    sanitize_document, RefineConfig, RefineOutcome, RefineSession, RefineStatus, Scope,
};
pub use repair::{repair, RepairOutcome};
pub use signature::{classify, diagnostic_signature, remote_signature, ErrorClass};
pub use validator::{validate, validate_segment, ValidationOutput};
