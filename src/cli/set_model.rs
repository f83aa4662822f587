use std::error::Error;

use crate::core::config::Config;
use crate::core::models;

pub fn set_selected_model(model_id: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    apply_selected_model(&mut config, model_id)?;
    config.save()?;
    println!("✅ Selected model: {}", config.selected_model_id());
    Ok(())
}

/// Validates `model_id` against the registry before recording it.
pub(crate) fn apply_selected_model(
    config: &mut Config,
    model_id: &str,
) -> Result<(), models::ModelNotFound> {
    let model = models::lookup(model_id.trim())?;
    config.selected_model = Some(model.id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_is_recorded() {
        let mut config = Config::default();
        apply_selected_model(&mut config, " llama3.1-8b ").unwrap();
        assert_eq!(config.selected_model.as_deref(), Some("llama3.1-8b"));
    }

    #[test]
    fn unknown_model_leaves_config_untouched() {
        let mut config = Config::default();
        let err = apply_selected_model(&mut config, "gpt-nope").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported model: gpt-nope");
        assert!(config.selected_model.is_none());
    }
}
