use std::error::Error;

use crate::cli::default_resolver;
use crate::core::credentials::ProviderCredentialStatus;

pub fn list_providers() -> Result<(), Box<dyn Error>> {
    let statuses = default_resolver().status();
    print!("{}", render_provider_table(&statuses));
    Ok(())
}

pub(crate) fn render_provider_table(statuses: &[ProviderCredentialStatus]) -> String {
    let mut content = String::from("Providers:\n\n");
    for ProviderCredentialStatus {
        provider,
        configured,
    } in statuses
    {
        let auth_status = if *configured { "✅" } else { "❌" };
        content.push_str(&format!(
            "  {auth_status} {:<12} {}\n",
            provider.id(),
            provider.display_name()
        ));
    }

    if !statuses.iter().any(|status| status.configured) {
        content.push_str("\nNo API keys configured. Run 'saylo auth <provider>' to add one.\n");
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Provider;

    #[test]
    fn shows_status_per_provider() {
        let table = render_provider_table(&[
            ProviderCredentialStatus {
                provider: Provider::Groq,
                configured: true,
            },
            ProviderCredentialStatus {
                provider: Provider::Cerebras,
                configured: false,
            },
        ]);

        assert!(table.contains("✅ groq"));
        assert!(table.contains("❌ cerebras"));
        assert!(!table.contains("No API keys configured"));
    }

    #[test]
    fn hints_when_nothing_is_configured() {
        let table = render_provider_table(&[ProviderCredentialStatus {
            provider: Provider::OpenRouter,
            configured: false,
        }]);
        assert!(table.contains("saylo auth <provider>"));
    }
}
