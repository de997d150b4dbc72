use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::error::{AppError, Context, Result};

use super::{validator, Config};

impl Config {
    /// Load a JSON config, trying the path as given, next to the executable,
    /// and under the working directory. Missing fields take builtin defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut last_error = None;

        for candidate in search_paths(path) {
            match fs::read_to_string(&candidate) {
                Ok(content) => {
                    info!("Loading configuration from {}", candidate.display());
                    return Self::from_json(&content);
                }
                Err(err) => {
                    debug!("Config not found at {}: {}", candidate.display(), err);
                    last_error = Some(format!("Failed to read {}: {}", candidate.display(), err));
                }
            }
        }

        Err(AppError::message(format!(
            "Could not find config file. Last error: {}",
            last_error.unwrap_or_else(|| "No search paths".to_string())
        )))
    }

    /// Parse, expand `${VAR}` placeholders in the endpoints, then validate.
    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Config =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        let mut unset = Vec::new();
        config.market_data.endpoint =
            expand_placeholders(&config.market_data.endpoint, &mut unset)?;
        config.stream.url = expand_placeholders(&config.stream.url, &mut unset)?;
        if let Some(err) = unset_vars_error(&unset) {
            return Err(err);
        }

        validator::validate_config(&config)?;
        Ok(config)
    }
}

fn search_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    if path.is_absolute() {
        return paths;
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        paths.push(dir.join(path));
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(path));
    }
    paths.dedup();
    paths
}

/// Substitute the placeholders that resolve and record the names that do not,
/// leaving those in place. Malformed placeholders fail straight away.
fn expand_placeholders(value: &str, unset: &mut Vec<String>) -> Result<String> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let body = &rest[open + 2..];
        let close = body.find('}').ok_or_else(|| {
            AppError::Config(format!("Unterminated environment placeholder in `{}`", value))
        })?;

        let name = body[..close].trim();
        if name.is_empty() {
            return Err(AppError::Config(format!(
                "Empty environment placeholder in `{}`",
                value
            )));
        }

        match std::env::var(name) {
            Ok(resolved) => expanded.push_str(&resolved),
            Err(_) => {
                if !unset.iter().any(|seen| seen == name) {
                    unset.push(name.to_string());
                }
                expanded.push_str(&rest[open..open + close + 3]);
            }
        }
        rest = &body[close + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn unset_vars_error(unset: &[String]) -> Option<AppError> {
    if unset.is_empty() {
        return None;
    }
    let issues: Vec<String> = unset
        .iter()
        .map(|name| format!("environment variable {} required by config is not set", name))
        .collect();
    Some(AppError::Config(issues.join("\n  - ")))
}
