//! Command Handlers module
//!
//! Handlers orchestrate ledger operations over an injected store.
//! Batch handlers collect per-student outcomes; single-record handlers
//! surface errors directly.

mod adjustment_handler;
mod commands;
mod generate_handler;
mod ledger_query;
mod payment_handler;
mod promotion_handler;
mod scope;
mod session_handler;

#[cfg(test)]
mod tests;

pub use adjustment_handler::RecordAdjustmentHandler;
pub use commands::*;
pub use generate_handler::FeeGenerationHandler;
pub use ledger_query::LedgerQueryHandler;
pub use payment_handler::{allocate_oldest_first, PaymentHandler};
pub use promotion_handler::{closing_balance, PromotionHandler};
pub use session_handler::SessionHandler;
