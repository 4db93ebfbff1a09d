//! Reading and writing the deploy data file

use crate::error::CliResult;
use relcat_types::DeployData;
use std::path::Path;
use tracing::{debug, warn};

/// Read the deploy data file, or an empty record when it does not exist
pub fn load(path: &Path) -> CliResult<DeployData> {
    if !path.exists() {
        return Ok(DeployData::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Like [`load`], but a malformed file is replaced instead of failing the run
pub fn load_or_default(path: &Path) -> DeployData {
    match load(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable deploy data");
            DeployData::default()
        }
    }
}

/// Write the deploy data file as indented JSON
pub fn save(path: &Path, data: &DeployData) -> CliResult<()> {
    let contents = serde_json::to_string_pretty(data)?;
    std::fs::write(path, contents)?;
    debug!(path = %path.display(), "Saved deploy data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_keeps_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.json");
        std::fs::write(&path, r#"{"application": "GLOBAL.shop;1", "pipeline": "build-7"}"#).unwrap();

        let mut data = load(&path).unwrap();
        data.push_component("GLOBAL.cart;main;2");
        save(&path, &data).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["pipeline"], "build-7");
        assert_eq!(raw["compversion"][0], "GLOBAL.cart;main;2");
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.json");
        assert_eq!(load(&path).unwrap(), DeployData::default());

        std::fs::write(&path, "not json").unwrap();
        assert!(load(&path).is_err());
        assert_eq!(load_or_default(&path), DeployData::default());
    }
}
