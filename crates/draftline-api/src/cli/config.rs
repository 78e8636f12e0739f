//! Configuration commands.

use anyhow::Result;
use console::style;
use draftline_infra::filesystem::{config_path, criteria_dir};

use crate::state::AppState;

/// Print the effective engine configuration as TOML (or JSON with `--json`).
pub fn show_config(state: &AppState, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "data_dir": state.data_dir,
            "config": state.config,
            "criteria": state.criteria.content_types().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let path = config_path(&state.data_dir);
    let source = if path.exists() { "file" } else { "defaults" };
    println!();
    println!("  {} {} ({source})", style("#").dim(), path.display());
    println!();
    print!("{}", toml::to_string_pretty(&state.config)?);

    let mut content_types: Vec<&str> = state.criteria.content_types().collect();
    content_types.sort_unstable();
    println!();
    println!(
        "  {} criteria from {}: {}",
        style("#").dim(),
        criteria_dir(&state.data_dir, state.config.criteria_dir.as_deref()).display(),
        if content_types.is_empty() {
            "none".to_string()
        } else {
            content_types.join(", ")
        }
    );
    println!();
    Ok(())
}

pub fn show_config_path(state: &AppState, json: bool) -> Result<()> {
    let path = config_path(&state.data_dir);
    if json {
        println!("{}", serde_json::json!({ "path": path, "exists": path.exists() }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use draftline_types::config::EngineConfig;

    use super::*;

    #[tokio::test]
    async fn test_show_config_renders_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init_in(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(state.config, EngineConfig::default());
        show_config(&state, false).unwrap();
        show_config(&state, true).unwrap();
        show_config_path(&state, false).unwrap();
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }
}
