//! Academic sessions
//!
//! A bounded period (start/end date) for a tenant with visibility and
//! locking flags.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::LedgerError;

/// Modules that can be locked independently within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionModule {
    Attendance,
    Fees,
    Marks,
    Admissions,
}

impl SessionModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionModule::Attendance => "attendance",
            SessionModule::Fees => "fees",
            SessionModule::Marks => "marks",
            SessionModule::Admissions => "admissions",
        }
    }
}

impl fmt::Display for SessionModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionModule {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attendance" => Ok(SessionModule::Attendance),
            "fees" => Ok(SessionModule::Fees),
            "marks" => Ok(SessionModule::Marks),
            "admissions" => Ok(SessionModule::Admissions),
            other => Err(LedgerError::validation(format!("unknown session module: {other}"))),
        }
    }
}

/// Academic session for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Visible and usable
    pub is_active: bool,
    /// Default session for new operations; at most one per tenant
    pub is_current: bool,
    /// Blocks mutation of all historical data in the session
    pub is_locked: bool,
    pub locked_modules: Vec<SessionModule>,
    pub created_at: DateTime<Utc>,
}

impl AcademicSession {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            start_date,
            end_date,
            is_active: true,
            is_current: false,
            is_locked: false,
            locked_modules: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn current(mut self) -> Self {
        self.is_current = true;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("session name is required"));
        }
        if self.end_date <= self.start_date {
            return Err(LedgerError::validation("session end date must follow its start date"));
        }
        Ok(())
    }

    /// Whether `module` may be mutated in this session
    pub fn is_module_locked(&self, module: SessionModule) -> bool {
        self.is_locked || self.locked_modules.contains(&module)
    }

    /// Reject mutation of `module` if the session or module is locked
    pub fn ensure_unlocked(&self, module: SessionModule) -> Result<(), LedgerError> {
        if self.is_module_locked(module) {
            return Err(LedgerError::LockedPeriod {
                session_id: self.id,
                module: if self.is_locked {
                    "all modules".to_string()
                } else {
                    module.to_string()
                },
            });
        }
        Ok(())
    }

    /// Reject access from another tenant
    pub fn ensure_tenant(&self, tenant_id: Uuid) -> Result<(), LedgerError> {
        if self.tenant_id != tenant_id {
            return Err(LedgerError::tenant_scope("session", self.id));
        }
        Ok(())
    }

    /// Lock either the whole session or the named modules
    pub fn lock(&mut self, modules: &[SessionModule]) {
        if modules.is_empty() {
            self.is_locked = true;
            return;
        }
        for module in modules {
            if !self.locked_modules.contains(module) {
                self.locked_modules.push(*module);
            }
        }
    }

    /// Unlock either the whole session or the named modules
    pub fn unlock(&mut self, modules: &[SessionModule]) {
        if modules.is_empty() {
            self.is_locked = false;
            self.locked_modules.clear();
            return;
        }
        self.locked_modules.retain(|m| !modules.contains(m));
    }
}
