//! Security Policy Definitions

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User role for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Nsm,
    Zsm,
    Asm,
    So,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Nsm => "nsm",
            Role::Zsm => "zsm",
            Role::Asm => "asm",
            Role::So => "so",
        }
    }

    /// Level a role is scoped to when the identity does not name one.
    pub fn default_level(&self) -> HierarchyLevel {
        match self {
            Role::Admin | Role::Analyst | Role::Nsm => HierarchyLevel::National,
            Role::Zsm => HierarchyLevel::Zsm,
            Role::Asm => HierarchyLevel::Asm,
            Role::So => HierarchyLevel::So,
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.default_level() != HierarchyLevel::National
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PipelineError;

    /// Unknown roles are rejected rather than mapped to a default.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "analyst" => Ok(Role::Analyst),
            "nsm" => Ok(Role::Nsm),
            "zsm" => Ok(Role::Zsm),
            "asm" => Ok(Role::Asm),
            "so" => Ok(Role::So),
            other => Err(PipelineError::ScopeViolation(format!("unknown role '{}'", other))),
        }
    }
}

/// Node level in the sales hierarchy, national at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    National,
    Zsm,
    Asm,
    So,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::National => "national",
            HierarchyLevel::Zsm => "zsm",
            HierarchyLevel::Asm => "asm",
            HierarchyLevel::So => "so",
        }
    }

    /// Larger is narrower.
    pub fn depth(&self) -> u8 {
        match self {
            HierarchyLevel::National => 0,
            HierarchyLevel::Zsm => 1,
            HierarchyLevel::Asm => 2,
            HierarchyLevel::So => 3,
        }
    }

    /// Hierarchy-table column holding this level's code.
    pub fn code_column(&self) -> Option<&'static str> {
        match self {
            HierarchyLevel::National => None,
            HierarchyLevel::Zsm => Some("zsm_code"),
            HierarchyLevel::Asm => Some("asm_code"),
            HierarchyLevel::So => Some("so_code"),
        }
    }

    /// Cube member suffix for this level's code.
    pub fn cube_field(&self) -> Option<&'static str> {
        match self {
            HierarchyLevel::National => None,
            HierarchyLevel::Zsm => Some("zsmCode"),
            HierarchyLevel::Asm => Some("asmCode"),
            HierarchyLevel::So => Some("soCode"),
        }
    }
}

impl FromStr for HierarchyLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "national" | "nsm" => Ok(HierarchyLevel::National),
            "zsm" | "zone" => Ok(HierarchyLevel::Zsm),
            "asm" | "area" => Ok(HierarchyLevel::Asm),
            "so" | "beat" => Ok(HierarchyLevel::So),
            other => Err(PipelineError::ScopeViolation(format!(
                "unknown hierarchy level '{}'",
                other
            ))),
        }
    }
}

/// Authorization subject, resolved by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccessContext {
    pub user_id: String,
    pub tenant_id: String,
    pub role: Role,
    #[serde(default)]
    pub hierarchy_level: Option<HierarchyLevel>,
    #[serde(default)]
    pub so_code: Option<String>,
    #[serde(default)]
    pub asm_code: Option<String>,
    #[serde(default)]
    pub zsm_code: Option<String>,
    #[serde(default)]
    pub nsm_code: Option<String>,
}

impl UserAccessContext {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            role,
            hierarchy_level: None,
            so_code: None,
            asm_code: None,
            zsm_code: None,
            nsm_code: None,
        }
    }

    pub fn with_level(mut self, level: HierarchyLevel) -> Self {
        self.hierarchy_level = Some(level);
        self
    }

    pub fn with_so_code(mut self, code: impl Into<String>) -> Self {
        self.so_code = Some(code.into());
        self
    }

    pub fn with_asm_code(mut self, code: impl Into<String>) -> Self {
        self.asm_code = Some(code.into());
        self
    }

    pub fn with_zsm_code(mut self, code: impl Into<String>) -> Self {
        self.zsm_code = Some(code.into());
        self
    }

    pub fn with_nsm_code(mut self, code: impl Into<String>) -> Self {
        self.nsm_code = Some(code.into());
        self
    }

    pub fn effective_level(&self) -> HierarchyLevel {
        self.hierarchy_level.unwrap_or_else(|| self.role.default_level())
    }

    /// Code owned at `level`, ignoring blanks.
    pub fn code_for(&self, level: HierarchyLevel) -> Option<&str> {
        let code = match level {
            HierarchyLevel::National => self.nsm_code.as_deref(),
            HierarchyLevel::Zsm => self.zsm_code.as_deref(),
            HierarchyLevel::Asm => self.asm_code.as_deref(),
            HierarchyLevel::So => self.so_code.as_deref(),
        };
        code.map(str::trim).filter(|c| !c.is_empty())
    }
}
