//! Generation session handling: streaming, billing, model selection.

mod billing;
mod complexity;
mod processor;

pub use billing::{BillingPort, BillingStatus, DeductionGuard, LedgerBilling};
pub use complexity::{classify_instruction, model_for, Complexity, DEFAULT_MODEL};
pub use processor::{
    CancelHandle, FinalResult, GenerationProcessor, ProcessorEvent, SubmitOptions,
};
