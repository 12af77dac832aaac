//! Authentication Module
//!
//! Credential issuance lives outside this service. The relay only asks an
//! [`Authenticator`] to turn what a client presented into a verified user
//! identity.

pub mod middleware;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials supplied")]
    MissingCredentials,

    #[error("token is not valid")]
    InvalidToken,

    #[error("token belongs to {token_user}, not {claimed}")]
    IdentityMismatch { token_user: String, claimed: String },

    #[error("invalid sign-in: {0}")]
    InvalidClaim(String),
}

/// What a client says about itself on `signin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninClaim {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Identity handed back once the claim has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

impl VerifiedUser {
    fn from_claim(claim: &SigninClaim) -> Self {
        let display_name = if claim.name.trim().is_empty() {
            claim.user_id.clone()
        } else {
            claim.name.trim().to_string()
        };
        Self {
            user_id: claim.user_id.clone(),
            display_name,
            email: claim.email.trim().to_string(),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a `signin` claim, optionally backed by a connection token.
    async fn verify_signin(
        &self,
        token: Option<&str>,
        claim: &SigninClaim,
    ) -> Result<VerifiedUser, AuthError>;

    /// Resolve a bearer token to a user id.
    async fn verify_token(&self, token: &str) -> Result<String, AuthError>;
}

fn check_claim(claim: &SigninClaim) -> Result<(), AuthError> {
    if claim.user_id.trim().is_empty() {
        return Err(AuthError::InvalidClaim("userId is required".into()));
    }
    Ok(())
}

/// Accepts sign-in claims as presented. For local development only.
#[derive(Debug, Default, Clone)]
pub struct TrustedClaims;

#[async_trait]
impl Authenticator for TrustedClaims {
    async fn verify_signin(
        &self,
        _token: Option<&str>,
        claim: &SigninClaim,
    ) -> Result<VerifiedUser, AuthError> {
        check_claim(claim)?;
        Ok(VerifiedUser::from_claim(claim))
    }

    async fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(token.trim().to_string())
    }
}

/// Static token table, `token -> user id`.
#[derive(Debug, Default, Clone)]
pub struct TokenTable {
    tokens: HashMap<String, String>,
}

impl TokenTable {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Parse `token=userId,token2=userId2`. Malformed pairs are skipped.
    pub fn parse(entries: &str) -> Self {
        let mut tokens = HashMap::new();
        for pair in entries.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
                    tokens.insert(token.trim().to_string(), user.trim().to_string());
                }
                _ => warn!("[Auth] Ignoring malformed token entry {:?}", pair),
            }
        }
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn verify_signin(
        &self,
        token: Option<&str>,
        claim: &SigninClaim,
    ) -> Result<VerifiedUser, AuthError> {
        check_claim(claim)?;
        let token = token.ok_or(AuthError::MissingCredentials)?;
        let token_user = self.verify_token(token).await?;
        if token_user != claim.user_id {
            return Err(AuthError::IdentityMismatch {
                token_user,
                claimed: claim.user_id.clone(),
            });
        }
        Ok(VerifiedUser::from_claim(claim))
    }

    async fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(user_id: &str) -> SigninClaim {
        SigninClaim {
            user_id: user_id.into(),
            name: String::new(),
            email: "a@example.com".into(),
        }
    }

    #[tokio::test]
    async fn test_trusted_claims_defaults_display_name() {
        let user = TrustedClaims.verify_signin(None, &claim("alice")).await.unwrap();
        assert_eq!(user.display_name, "alice");

        let err = TrustedClaims.verify_signin(None, &claim("  ")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaim(_)));
    }

    #[tokio::test]
    async fn test_token_table_binds_token_to_user() {
        let table = TokenTable::parse("t-alice=alice, t-bob=bob, broken");
        assert_eq!(table.len(), 2);

        assert!(table.verify_signin(Some("t-alice"), &claim("alice")).await.is_ok());
        assert!(matches!(
            table.verify_signin(Some("t-bob"), &claim("alice")).await,
            Err(AuthError::IdentityMismatch { .. })
        ));
        assert!(matches!(
            table.verify_signin(None, &claim("alice")).await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            table.verify_token("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
