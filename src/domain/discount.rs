//! Discount policy types
//!
//! Tenant-scoped rules evaluated by the discount resolver, and the
//! snapshot of what was applied to a record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{LedgerError, Money};

/// Policy category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    StaffChild,
    Sibling,
    Merit,
    FinancialAid,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::StaffChild => "staff_child",
            DiscountKind::Sibling => "sibling",
            DiscountKind::Merit => "merit",
            DiscountKind::FinancialAid => "financial_aid",
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiscountKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff_child" => Ok(DiscountKind::StaffChild),
            "sibling" => Ok(DiscountKind::Sibling),
            "merit" => Ok(DiscountKind::Merit),
            "financial_aid" => Ok(DiscountKind::FinancialAid),
            other => Err(LedgerError::validation(format!("unknown discount kind: {other}"))),
        }
    }
}

/// How the policy magnitude is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountMode {
    /// Magnitude is a percentage of the charge (0-100]
    Percentage,
    /// Magnitude is a fixed amount
    Fixed,
}

impl DiscountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountMode::Percentage => "percentage",
            DiscountMode::Fixed => "fixed",
        }
    }
}

impl FromStr for DiscountMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountMode::Percentage),
            "fixed" => Ok(DiscountMode::Fixed),
            other => Err(LedgerError::validation(format!("unknown discount mode: {other}"))),
        }
    }
}

/// Tenant-scoped discount rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub kind: DiscountKind,
    pub mode: DiscountMode,
    pub magnitude: Decimal,
    /// Sibling policies apply from this ordinal position onwards
    #[serde(default)]
    pub min_sibling_position: Option<u32>,
    /// Merit / financial-aid policies require this tag on the student
    #[serde(default)]
    pub category_tag: Option<String>,
    /// Lower runs first
    #[serde(default)]
    pub priority: i32,
    pub is_active: bool,
}

impl DiscountPolicy {
    pub fn new(
        tenant_id: Uuid,
        name: impl Into<String>,
        kind: DiscountKind,
        mode: DiscountMode,
        magnitude: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            kind,
            mode,
            magnitude,
            min_sibling_position: None,
            category_tag: None,
            priority: 0,
            is_active: true,
        }
    }

    pub fn with_min_sibling_position(mut self, position: u32) -> Self {
        self.min_sibling_position = Some(position);
        self
    }

    pub fn with_category_tag(mut self, tag: impl Into<String>) -> Self {
        self.category_tag = Some(tag.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        match self.mode {
            DiscountMode::Percentage => {
                if self.magnitude <= Decimal::ZERO || self.magnitude > Decimal::ONE_HUNDRED {
                    return Err(LedgerError::validation(format!(
                        "percentage discount must be in (0, 100], got {}",
                        self.magnitude
                    )));
                }
            }
            DiscountMode::Fixed => {
                Money::non_negative(self.magnitude)
                    .map_err(|e| LedgerError::validation(e.to_string()))?;
                if self.magnitude.is_zero() {
                    return Err(LedgerError::validation("fixed discount must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// One discount applied to a record, frozen at application time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub policy_id: Uuid,
    pub name: String,
    pub kind: DiscountKind,
    pub amount: Money,
}

/// Discount snapshot stored on a fee record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscountBreakdown {
    pub policy_discount: Money,
    pub manual_discount: Money,
    pub total_discount: Money,
    #[serde(default)]
    pub applied: Vec<AppliedDiscount>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub applied_by: Option<String>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}
