//! Completion / embedding provider implementations for Lorebook.
//!
//! All providers implement the `lorebook_core::CompletionProvider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;

use lorebook_config::AppConfig;
use lorebook_core::CompletionProvider;
use lorebook_core::error::ProviderError;

/// Build the configured provider.
///
/// Fails when no API key is available — the service cannot answer anything
/// without a completion endpoint.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| ProviderError::NotConfigured("no API key configured — set LOREBOOK_API_KEY".into()))?;

    let provider = OpenAiCompatProvider::new("openai", &config.provider.base_url, api_key)
        .with_timeout(std::time::Duration::from_secs(config.provider.request_timeout_secs));

    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_rejected() {
        let config = AppConfig::default();
        assert!(matches!(
            build_from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn configured_provider_builds() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
