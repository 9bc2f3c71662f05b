//! `reflexa models` — Show how each purpose resolves in a model set.

use reflexa_config::AppConfig;
use reflexa_core::error::ProviderError;
use reflexa_core::model::{ModelPurpose, ModelSetConfig};
use reflexa_providers::{ModelGateway, ProviderRegistry};

pub async fn run(model_set: Option<String>, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let name = model_set.as_deref().unwrap_or(&config.default_model_set);
    let set = config
        .model_set(Some(name))
        .ok_or_else(|| format!("Model set '{name}' is not defined"))?;

    let registry = reflexa_providers::build_from_config(&config);

    println!();
    println!("  Model set: {}", set.name);
    println!();
    for line in resolution_lines(set, &registry) {
        println!("  {line}");
    }
    println!();

    if check {
        let gateway = ModelGateway::new(registry);
        println!("  Providers:");
        for line in health_lines(&gateway.health().await) {
            println!("  {line}");
        }
        println!();
    }

    Ok(())
}

/// One line per registered provider with its health check result.
pub fn health_lines(results: &[(String, Result<bool, ProviderError>)]) -> Vec<String> {
    if results.is_empty() {
        return vec!["(no providers configured)".to_string()];
    }
    results
        .iter()
        .map(|(id, result)| match result {
            Ok(true) => format!("{id:<15} ok"),
            Ok(false) => format!("{id:<15} unreachable"),
            Err(e) => format!("{id:<15} error: {e}"),
        })
        .collect()
}

/// One line per purpose: the model it resolves to, the purpose it fell back
/// to, or why it cannot be served.
pub fn resolution_lines(set: &ModelSetConfig, registry: &ProviderRegistry) -> Vec<String> {
    let gateway = ModelGateway::new(ProviderRegistry::new());

    ModelPurpose::ALL
        .iter()
        .map(|&purpose| match gateway.resolve_model_spec(set, purpose) {
            Ok(resolved) => {
                let mut line = format!(
                    "{:<15} {}/{}",
                    purpose.as_str(),
                    resolved.spec.provider,
                    resolved.spec.model
                );
                if resolved.is_fallback() {
                    line.push_str(&format!("  (via {})", resolved.matched));
                }
                if !registry.contains(&resolved.spec.provider) {
                    line.push_str("  [provider not configured]");
                }
                line
            }
            Err(e) => format!("{:<15} unresolved: {e}", purpose.as_str()),
        })
        .collect()
}
