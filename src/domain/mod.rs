//! Domain module
//!
//! Core ledger types and business rules.

pub mod context;
pub mod discount;
pub mod error;
pub mod fee_record;
pub mod money;
pub mod payment;
pub mod period;
pub mod session;
pub mod student;

pub use context::TenantContext;
pub use discount::{AppliedDiscount, DiscountBreakdown, DiscountKind, DiscountMode, DiscountPolicy};
pub use error::{ItemFailure, LedgerError};
pub use fee_record::{FeeRecord, FeeStatus, FeeType};
pub use money::{Amount, Money, MoneyError};
pub use payment::{AllocationLine, PaymentReceipt};
pub use period::{Period, PeriodError};
pub use session::{AcademicSession, SessionModule};
pub use student::{SessionHistoryEntry, Student};
