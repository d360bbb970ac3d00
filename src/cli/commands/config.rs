//! Configuration CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all layers are merged
    Show,
    /// Check the configuration without running anything
    Validate,
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        match &self.error {
            None => format!("{} {}", console::style("✓").green(), self.source),
            Some(error) => format!("{} {}: {error}", console::style("✗").red(), self.source),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn describe_source(path: Option<&Path>) -> String {
    path.map_or_else(
        || ".askbus/config.yaml + .askbus/local.yaml + ASKBUS_* env".to_string(),
        |p| p.display().to_string(),
    )
}

pub async fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let config = super::load_config(config_path)?;
            output(&ConfigShowOutput { config }, json_mode);
        }
        ConfigCommands::Validate => {
            let result = super::load_config(config_path);
            let out = ConfigValidateOutput {
                valid: result.is_ok(),
                source: describe_source(config_path),
                error: result.as_ref().err().map(|e| format!("{e:#}")),
            };
            output(&out, json_mode);
            if !out.valid {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_renders_yaml() {
        let out = ConfigShowOutput {
            config: Config::default(),
        };
        let yaml = out.to_human();
        assert!(yaml.contains("max_attempts: 3"));
        assert!(yaml.contains("overflow: drop_oldest"));
    }

    #[test]
    fn test_validate_output() {
        let ok = ConfigValidateOutput {
            valid: true,
            source: "custom.yaml".into(),
            error: None,
        };
        assert!(ok.to_human().contains("custom.yaml"));
        assert!(ok.to_json().get("error").is_none());

        let bad = ConfigValidateOutput {
            valid: false,
            source: "custom.yaml".into(),
            error: Some("Invalid notifier capacity".into()),
        };
        assert_eq!(bad.to_json()["valid"], false);
    }
}
