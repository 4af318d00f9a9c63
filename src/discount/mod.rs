//! Discount module
//!
//! Evaluates tenant discount policies against a student and a charge.

mod resolver;

pub use resolver::{DiscountResolver, ResolvedDiscounts};
