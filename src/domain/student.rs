//! Student directory entries
//!
//! Students are owned by an external directory; the ledger reads them and
//! only writes the fields that change on promotion.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LedgerError, Money};

/// One completed session in a student's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: Uuid,
    pub class_id: String,
    pub section_id: Option<String>,
    pub roll_no: Option<String>,
    /// Unpaid balance when the session closed (negative = credit)
    pub closing_balance: Money,
    /// Balance carried into the session when it opened
    pub opening_balance: Money,
    /// Result recorded at promotion (e.g. `passed`, `retained`)
    #[serde(default)]
    pub final_result: Option<String>,
    pub promoted_date: NaiveDate,
}

/// Student record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub current_session_id: Uuid,
    pub class_id: String,
    pub section_id: Option<String>,
    pub roll_no: Option<String>,
    pub monthly_fee: Money,
    pub is_active: bool,
    /// Family linkage used for sibling discounts
    pub family_id: Option<Uuid>,
    /// 1 = eldest enrolled sibling
    pub sibling_position: Option<u32>,
    pub is_staff_child: bool,
    /// Category tags such as `merit` or `financial_aid`
    pub category_tags: Vec<String>,
    /// Append-only, one entry per completed session
    pub session_history: Vec<SessionHistoryEntry>,
    /// Optimistic concurrency version
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(
        tenant_id: Uuid,
        name: impl Into<String>,
        session_id: Uuid,
        class_id: impl Into<String>,
        section_id: Option<String>,
        monthly_fee: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            current_session_id: session_id,
            class_id: class_id.into(),
            section_id,
            roll_no: None,
            monthly_fee,
            is_active: true,
            family_id: None,
            sibling_position: None,
            is_staff_child: false,
            category_tags: Vec::new(),
            session_history: Vec::new(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn ensure_tenant(&self, tenant_id: Uuid) -> Result<(), LedgerError> {
        if self.tenant_id != tenant_id {
            return Err(LedgerError::tenant_scope("student", self.id));
        }
        Ok(())
    }

    /// Whether the student belongs to the class (and section, if given)
    pub fn in_cohort(&self, class_id: &str, section_id: Option<&str>) -> bool {
        self.class_id == class_id
            && match section_id {
                Some(section) => self.section_id.as_deref() == Some(section),
                None => true,
            }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.category_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn has_completed_session(&self, session_id: Uuid) -> bool {
        self.session_history.iter().any(|h| h.session_id == session_id)
    }
}
