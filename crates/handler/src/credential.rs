//! Credential resolution seam.
//!
//! The credential subsystem lives outside the engine. Handlers receive
//! an opaque resolver through their context; the engine never stores or
//! logs resolved values.

use async_trait::async_trait;

use crate::JsonMap;

/// Errors the credential subsystem may surface to a handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// No credential exists under the requested id.
    #[error("credential not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to read the credential.
    #[error("access to credential denied: {0}")]
    AccessDenied(String),
}

/// Resolves a credential id to its decrypted key-value payload.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve `credential_id` to a decrypted key-value map.
    async fn resolve(&self, credential_id: &str) -> Result<JsonMap, CredentialError>;
}

/// Resolver used when no credential subsystem is wired in: every lookup
/// is denied.
#[derive(Debug, Default)]
pub struct DenyAllResolver;

#[async_trait]
impl CredentialResolver for DenyAllResolver {
    async fn resolve(&self, credential_id: &str) -> Result<JsonMap, CredentialError> {
        Err(CredentialError::AccessDenied(credential_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deny_all_denies() {
        let resolver = DenyAllResolver;
        let err = resolver.resolve("smtp-main").await.unwrap_err();
        assert!(matches!(err, CredentialError::AccessDenied(id) if id == "smtp-main"));
    }

    #[test]
    fn error_display() {
        let err = CredentialError::NotFound("db".into());
        assert_eq!(err.to_string(), "credential not found: db");
    }
}
