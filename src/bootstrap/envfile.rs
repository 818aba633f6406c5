//! Service environment files

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// Render `KEY="value"` lines, one per variable
pub fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| {
            let v = v.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{}=\"{}\"\n", k, v)
        })
        .collect()
}

/// Write an environment file, creating parent directories
pub async fn write_env(path: &Path, env: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, render_env(env)).await?;
    tracing::debug!("Wrote {} variables to {}", env.len(), path.display());
    Ok(())
}
