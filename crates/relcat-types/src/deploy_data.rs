//! The deploy data file
//!
//! Pipeline steps share one JSON file describing what was built and where it
//! should go. Each step reads it, fills in its part and writes it back, so
//! fields this crate does not know about are carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeployData {
    #[serde(default)]
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appversion: Option<String>,
    /// Qualified names of the component versions built by this pipeline
    #[serde(default)]
    pub compversion: Vec<String>,
    #[serde(default)]
    pub rc: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Directory or git location of key/value configuration files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kvconfig: Option<String>,
    /// Component that receives the key/value configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_component: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imagetags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipdeploy: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl DeployData {
    /// Record a component version, keeping the list free of duplicates
    pub fn push_component(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.compversion.contains(&name) {
            self.compversion.push(name);
        }
    }

    /// Whether the record asks for the deployment to be logged but not run
    pub fn skips_deploy(&self) -> bool {
        self.skipdeploy
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("y"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let raw = r#"{
            "application": "GLOBAL.shop;main",
            "compversion": ["GLOBAL.cart;main;3"],
            "rc": 0,
            "circleci_pipeline": "build-42",
            "config_component": "GLOBAL.shop-config"
        }"#;

        let mut data: DeployData = serde_json::from_str(raw).unwrap();
        data.push_component("GLOBAL.web;main;9");
        data.push_component("GLOBAL.cart;main;3");

        let written = serde_json::to_value(&data).unwrap();
        assert_eq!(written["circleci_pipeline"], "build-42");
        assert_eq!(written["config_component"], "GLOBAL.shop-config");
        assert_eq!(written["compversion"].as_array().unwrap().len(), 2);
        assert!(written.get("environment").is_none());
    }

    #[test]
    fn test_skip_deploy_flag() {
        let data = DeployData {
            skipdeploy: Some("Y".into()),
            ..Default::default()
        };
        assert!(data.skips_deploy());
        assert!(!DeployData::default().skips_deploy());
    }
}
