//! Signed cube access tokens
//!
//! Short-lived HS256 tokens scoped to one user, tenant and hierarchy code.
//! The code comes from the attached predicate, never from the raw identity.

use crate::error::Result;
use crate::security::access_policy::AccessPredicate;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeClaims {
    pub sub: String,
    pub client_id: String,
    pub role: String,
    pub hierarchy_level: String,
    pub hierarchy_code: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct CubeTokenSigner {
    key: EncodingKey,
    ttl_secs: i64,
}

impl CubeTokenSigner {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            ttl_secs: ttl_secs as i64,
        }
    }

    pub fn claims_for(&self, predicate: &AccessPredicate) -> CubeClaims {
        let now = Utc::now().timestamp();
        let (level, code) = match predicate.territory() {
            Some((level, code)) => (level.as_str().to_string(), Some(code.to_string())),
            None => ("national".to_string(), None),
        };
        CubeClaims {
            sub: predicate.user_id().to_string(),
            client_id: predicate.tenant_id().to_string(),
            role: predicate.role().as_str().to_string(),
            hierarchy_level: level,
            hierarchy_code: code,
            iat: now,
            exp: now + self.ttl_secs,
        }
    }

    pub fn sign(&self, predicate: &AccessPredicate) -> Result<String> {
        let claims = self.claims_for(predicate);
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{IntentKind, SemanticIntent};
    use crate::security::{AccessPolicyEngine, Role, UserAccessContext};
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_token_carries_predicate_code() {
        let ctx = UserAccessContext::new("asm1", "nestle", Role::Asm)
            .with_asm_code("ASM-N01")
            .with_so_code("SO-IGNORED");
        let secured = AccessPolicyEngine::new()
            .apply(SemanticIntent::new(IntentKind::Snapshot, "secondary_sales_value"), &ctx)
            .unwrap();

        let signer = CubeTokenSigner::new("secret", 900);
        let token = signer.sign(secured.predicate()).unwrap();
        let decoded = decode::<CubeClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();

        assert_eq!(decoded.claims.client_id, "nestle");
        assert_eq!(decoded.claims.hierarchy_level, "asm");
        assert_eq!(decoded.claims.hierarchy_code.as_deref(), Some("ASM-N01"));
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 900);
    }
}
