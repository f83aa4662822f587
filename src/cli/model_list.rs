//! Model listing functionality
//!
//! Lists the built-in models grouped by provider.

use std::error::Error;

use crate::core::config::Config;
use crate::core::models::{self, Provider};

pub fn list_models() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    print!("{}", render_model_list(config.selected_model_id()));
    Ok(())
}

pub(crate) fn render_model_list(selected: &str) -> String {
    let mut out = String::from("🤖 Available Models\n");
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    for provider in Provider::ALL {
        out.push_str(&format!("\n{}:\n", provider.display_name()));
        for model in models::for_provider(provider) {
            let marker = if model.id == selected { "*" } else { " " };
            let reasoning = if model.supports_reasoning {
                " 🧠"
            } else {
                ""
            };
            out.push_str(&format!(
                "{marker} {} ({}){reasoning}\n",
                model.id, model.display_name
            ));
        }
    }

    out.push_str("\nLegend: * selected model, 🧠 reasoning model\n");
    out
}
