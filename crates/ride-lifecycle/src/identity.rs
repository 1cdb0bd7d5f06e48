// identity.rs — IdentityGateway: bearer credential → verified identity.
//
// Token verification is an external service. The engine never sees
// credentials; callers verify first and pass the resulting Identity in.
// StaticTokenGateway stands in for the external verifier with a fixed
// token table (loaded from configuration by the CLI).

use std::collections::HashMap;

use crate::driver::Identity;
use crate::error::IdentityError;

/// Maps a presented credential to a stable user identity.
pub trait IdentityGateway: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, IdentityError>;
}

/// Fixed token table. Accepts both `"<token>"` and `"Bearer <token>"`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenGateway {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<Identity>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }

    pub fn from_map(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, id)| (token, Identity::new(id)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityGateway for StaticTokenGateway {
    fn verify(&self, credential: &str) -> Result<Identity, IdentityError> {
        let credential = credential.trim_start();
        let token = credential
            .strip_prefix("Bearer ")
            .unwrap_or(credential)
            .trim();
        if token.is_empty() {
            return Err(IdentityError::MissingCredential);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(IdentityError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StaticTokenGateway {
        StaticTokenGateway::new()
            .with_token("tok-p", "passenger-1")
            .with_token("tok-d", "driver-1")
    }

    #[test]
    fn verifies_known_token() {
        assert_eq!(gateway().verify("tok-p").unwrap().as_str(), "passenger-1");
    }

    #[test]
    fn strips_bearer_prefix() {
        assert_eq!(gateway().verify("Bearer tok-d").unwrap().as_str(), "driver-1");
    }

    #[test]
    fn unknown_token_is_invalid() {
        assert!(matches!(
            gateway().verify("nope"),
            Err(IdentityError::InvalidCredential)
        ));
    }

    #[test]
    fn empty_credential_is_missing() {
        assert!(matches!(
            gateway().verify("  "),
            Err(IdentityError::MissingCredential)
        ));
        assert!(matches!(
            gateway().verify("Bearer "),
            Err(IdentityError::MissingCredential)
        ));
    }

    #[test]
    fn from_map_builds_table() {
        let mut map = HashMap::new();
        map.insert("t".to_string(), "u".to_string());
        let gw = StaticTokenGateway::from_map(map);
        assert_eq!(gw.len(), 1);
        assert_eq!(gw.verify("t").unwrap().as_str(), "u");
    }
}
