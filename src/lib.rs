//! school_ledger Library
//!
//! Re-exports modules for integration testing and the binaries.

pub mod api;
pub mod config;
pub mod db;
pub mod discount;
pub mod domain;
pub mod handlers;
pub mod store;

mod error;

pub use config::Config;
pub use domain::{
    AcademicSession, FeeRecord, FeeStatus, LedgerError, Money, Period, Student, TenantContext,
};
pub use error::{AppError, AppResult};
