use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::Script;

/// Saves a script as a pretty-printed JSON project file.
pub fn save_project(script: &Script, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(script).context("failed to serialize project")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write project '{}'", path.display()))
}

/// Loads a previously saved project file and validates it.
pub fn load_project(path: &Path) -> Result<Script> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read project '{}'", path.display()))?;
    let script: Script = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse project '{}'", path.display()))?;
    script.validate()?;
    Ok(script)
}
