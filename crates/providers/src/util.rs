//! Shared utility functions for protocol adapters.

use relay_domain::capability::Provider;
use relay_domain::config::CredentialConfig;
use relay_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve a cloud provider's credential from its [`CredentialConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext — warn)
/// 2. `env` field (reads the environment variable)
/// 3. [`Error::ProviderUnavailable`] naming the missing credential
pub(crate) fn resolve_credential(provider: Provider, cred: &CredentialConfig) -> Result<String> {
    if let Some(ref key) = cred.key {
        tracing::warn!(
            provider = %provider,
            "API key loaded from plaintext config field 'key' — prefer 'env' instead"
        );
        return Ok(key.clone());
    }

    if let Some(ref env_var) = cred.env {
        return std::env::var(env_var).map_err(|_| {
            Error::ProviderUnavailable(format!(
                "missing credential for {provider}: environment variable '{env_var}' is not set"
            ))
        });
    }

    Err(Error::ProviderUnavailable(format!(
        "no credential configured for {provider}: set 'key' or 'env' in its credential block"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_key_takes_precedence() {
        let cred = CredentialConfig {
            key: Some("sk-test-123".into()),
            env: Some("RELAY_TEST_UNUSED_VAR".into()),
        };
        let key = resolve_credential(Provider::Openai, &cred).unwrap();
        assert_eq!(key, "sk-test-123");
    }

    #[test]
    fn env_var_is_read() {
        let var = "RELAY_TEST_RESOLVE_ENV_4821";
        std::env::set_var(var, "env-secret");
        let cred = CredentialConfig {
            key: None,
            env: Some(var.into()),
        };
        assert_eq!(
            resolve_credential(Provider::Anthropic, &cred).unwrap(),
            "env-secret"
        );
        std::env::remove_var(var);
    }

    #[test]
    fn missing_env_var_names_the_credential() {
        let cred = CredentialConfig {
            key: None,
            env: Some("RELAY_TEST_NONEXISTENT_9942".into()),
        };
        let err = resolve_credential(Provider::AzureOpenai, &cred).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("RELAY_TEST_NONEXISTENT_9942"));
        assert!(msg.contains("azure_openai"));
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[test]
    fn empty_credential_config_is_an_error() {
        let err =
            resolve_credential(Provider::Openai, &CredentialConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }
}
