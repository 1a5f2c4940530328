//! Config command handlers

use anyhow::{bail, Context, Result};

use folio_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, sync_enabled, remote_dir, remote_url, remote_token, \
                          container_id, poll_interval_secs, debounce_secs, \
                          credential_refresh_secs, resume_check_secs, log_file";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "sync_enabled": config.sync_enabled,
                    "remote_dir": config.remote_dir,
                    "remote_url": config.remote_url,
                    "remote_token_set": config.remote_token.is_some(),
                    "container_id": config.container_id,
                    "poll_interval_secs": config.poll_interval_secs,
                    "debounce_secs": config.debounce_secs,
                    "credential_refresh_secs": config.credential_refresh_secs,
                    "resume_check_secs": config.resume_check_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:                {}", config.data_dir.display());
            println!("  sync_enabled:            {}", config.sync_enabled);
            println!(
                "  remote_dir:              {}",
                display_path(config.remote_dir.as_ref())
            );
            println!(
                "  remote_url:              {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  remote_token:            {}",
                if config.remote_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  container_id:            {}", config.container_id);
            println!("  poll_interval_secs:      {}", config.poll_interval_secs);
            println!("  debounce_secs:           {}", config.debounce_secs);
            println!("  credential_refresh_secs: {}", config.credential_refresh_secs);
            println!("  resume_check_secs:       {}", config.resume_check_secs);
            println!(
                "  log_file:                {}",
                display_path(config.log_file.as_ref())
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

fn display_path(path: Option<&std::path::PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    let shown = if key == "remote_token" { "********" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));
    Ok(())
}

/// Optional value: empty or "none" clears it
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn seconds(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a whole number of seconds.", key))
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "remote_dir" => config.remote_dir = optional(value).map(Into::into),
        "remote_url" => config.remote_url = optional(value),
        "remote_token" => config.remote_token = optional(value),
        "container_id" => {
            if value.is_empty() {
                bail!("container_id cannot be empty");
            }
            config.container_id = value.to_string();
        }
        "poll_interval_secs" => {
            let secs = seconds(key, value)?;
            if secs == 0 {
                bail!("poll_interval_secs must be at least 1");
            }
            config.poll_interval_secs = secs;
        }
        "debounce_secs" => config.debounce_secs = seconds(key, value)?,
        "credential_refresh_secs" => config.credential_refresh_secs = seconds(key, value)?,
        "resume_check_secs" => {
            let secs = seconds(key, value)?;
            if secs == 0 {
                bail!("resume_check_secs must be at least 1");
            }
            config.resume_check_secs = secs;
        }
        "log_file" => config.log_file = optional(value).map(Into::into),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "remote_dir", "/mnt/shared").unwrap();
        apply(&mut config, "poll_interval_secs", "45").unwrap();
        apply(&mut config, "credential_refresh_secs", "0").unwrap();

        assert!(config.sync_enabled);
        assert_eq!(config.remote_dir, Some("/mnt/shared".into()));
        assert_eq!(config.poll_interval_secs, 45);
        assert!(config.credential_refresh().is_none());
    }

    #[test]
    fn test_apply_clears_optional_values() {
        let mut config = Config {
            remote_url: Some("https://sync.example.com".into()),
            ..Config::default()
        };
        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "poll_interval_secs", "0").is_err());
        assert!(apply(&mut config, "debounce_secs", "soon").is_err());

        let err = apply(&mut config, "favorite_color", "blue").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }
}
