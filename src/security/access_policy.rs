//! Access Policy Engine
//!
//! Turns a real-vocabulary intent into a `SecuredIntent` carrying the tenant
//! and territory predicate. The predicate cannot be changed after this point:
//! `SecuredIntent` has no mutators and only this module can build one.

use crate::error::{PipelineError, Result};
use crate::intent::{Real, SemanticIntent};
use crate::security::policy::{HierarchyLevel, Role, UserAccessContext};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum AccessScope {
    National,
    Territory { level: HierarchyLevel, code: String },
}

impl AccessScope {
    pub fn access_level(&self) -> &'static str {
        match self {
            AccessScope::National => "national",
            AccessScope::Territory { .. } => "territory",
        }
    }

    /// Audit form of the restriction for `tenant_id`.
    pub fn describe(&self, tenant_id: &str) -> String {
        match self {
            AccessScope::National => format!("tenant={}", tenant_id),
            AccessScope::Territory { level, code } => format!(
                "tenant={} AND {}='{}'",
                tenant_id,
                level.code_column().unwrap_or("code"),
                code
            ),
        }
    }
}

/// Row restriction every backend must AND into its query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPredicate {
    tenant_id: String,
    user_id: String,
    role: Role,
    scope: AccessScope,
}

impl AccessPredicate {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scope(&self) -> &AccessScope {
        &self.scope
    }

    /// Per-tenant schema in the relational store.
    pub fn tenant_schema(&self) -> String {
        format!("client_{}", self.tenant_id)
    }

    /// `(level, code)` when rows are restricted to a territory.
    pub fn territory(&self) -> Option<(HierarchyLevel, &str)> {
        match &self.scope {
            AccessScope::National => None,
            AccessScope::Territory { level, code } => Some((*level, code.as_str())),
        }
    }
}

impl fmt::Display for AccessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope.describe(&self.tenant_id))
    }
}

/// A real intent with its non-removable access predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecuredIntent {
    intent: SemanticIntent<Real>,
    predicate: AccessPredicate,
}

impl SecuredIntent {
    pub fn intent(&self) -> &SemanticIntent<Real> {
        &self.intent
    }

    pub fn predicate(&self) -> &AccessPredicate {
        &self.predicate
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicyEngine;

impl AccessPolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Scope for a user; a restricted role without a code fails closed.
    pub fn resolve_scope(&self, ctx: &UserAccessContext) -> Result<AccessScope> {
        validate_tenant_id(&ctx.tenant_id)?;
        let level = ctx.effective_level();

        if ctx.role.is_restricted() {
            let own = ctx.role.default_level();
            if level.depth() < own.depth() {
                return Err(PipelineError::ScopeViolation(format!(
                    "role {} cannot be scoped at {} level",
                    ctx.role,
                    level.as_str()
                )));
            }
        }

        if level == HierarchyLevel::National {
            return Ok(AccessScope::National);
        }

        match ctx.code_for(level) {
            Some(code) => Ok(AccessScope::Territory {
                level,
                code: code.to_string(),
            }),
            None => Err(PipelineError::ScopeViolation(format!(
                "user {} ({}) has no {} code to scope against",
                ctx.user_id,
                ctx.role,
                level.as_str()
            ))),
        }
    }

    pub fn apply(
        &self,
        intent: SemanticIntent<Real>,
        ctx: &UserAccessContext,
    ) -> Result<SecuredIntent> {
        let scope = match self.resolve_scope(ctx) {
            Ok(scope) => scope,
            Err(e) => {
                warn!(user = %ctx.user_id, tenant = %ctx.tenant_id, role = %ctx.role, "Access denied: {}", e);
                return Err(e);
            }
        };

        let predicate = AccessPredicate {
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            role: ctx.role,
            scope,
        };
        info!(
            user = %ctx.user_id,
            access = predicate.scope().access_level(),
            predicate = %predicate,
            "Attached access predicate"
        );
        Ok(SecuredIntent { intent, predicate })
    }
}

/// Tenant ids become schema and table names, so only `[a-z0-9_]` is allowed.
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 48
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::ScopeViolation(format!(
            "invalid tenant id '{}'",
            tenant_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;

    fn intent() -> SemanticIntent<Real> {
        SemanticIntent::new(IntentKind::Snapshot, "secondary_sales_value")
    }

    #[test]
    fn test_national_roles() {
        let engine = AccessPolicyEngine::new();
        for role in [Role::Admin, Role::Analyst, Role::Nsm] {
            let ctx = UserAccessContext::new("u", "nestle", role);
            let secured = engine.apply(intent(), &ctx).unwrap();
            assert_eq!(secured.predicate().scope(), &AccessScope::National);
            assert_eq!(secured.predicate().tenant_id(), "nestle");
        }
    }

    #[test]
    fn test_territory_roles() {
        let engine = AccessPolicyEngine::new();
        let ctx = UserAccessContext::new("asm1", "nestle", Role::Asm).with_asm_code("ASM-N01");
        let secured = engine.apply(intent(), &ctx).unwrap();
        assert_eq!(
            secured.predicate().territory(),
            Some((HierarchyLevel::Asm, "ASM-N01"))
        );
        assert_eq!(
            secured.predicate().to_string(),
            "tenant=nestle AND asm_code='ASM-N01'"
        );
    }

    #[test]
    fn test_missing_code_fails_closed() {
        let engine = AccessPolicyEngine::new();
        let ctx = UserAccessContext::new("so1", "nestle", Role::So);
        assert!(matches!(
            engine.apply(intent(), &ctx),
            Err(PipelineError::ScopeViolation(_))
        ));

        // A code for another level does not help.
        let ctx = UserAccessContext::new("so1", "nestle", Role::So).with_asm_code("ASM-N01");
        assert!(engine.apply(intent(), &ctx).is_err());
    }

    #[test]
    fn test_restricted_role_cannot_widen() {
        let engine = AccessPolicyEngine::new();
        let ctx = UserAccessContext::new("so1", "nestle", Role::So)
            .with_level(HierarchyLevel::National)
            .with_so_code("SO-1");
        assert!(engine.apply(intent(), &ctx).is_err());

        let ctx = UserAccessContext::new("so1", "nestle", Role::So)
            .with_level(HierarchyLevel::Zsm)
            .with_zsm_code("ZSM-N");
        assert!(engine.apply(intent(), &ctx).is_err());
    }

    #[test]
    fn test_invalid_tenant_rejected() {
        let engine = AccessPolicyEngine::new();
        let ctx = UserAccessContext::new("u", "nestle; drop", Role::Admin);
        assert!(engine.apply(intent(), &ctx).is_err());
    }
}
