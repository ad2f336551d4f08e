//! File-based configuration for the CLI and embedders.

use crate::error::TrellisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use trellis_xslt::OutputSettings;

/// A transformation described in JSON:
///
/// ```json
/// {
///   "stylesheet": "report.xsl",
///   "parameters": { "title": "Q3" },
///   "mode": "summary",
///   "output": { "method": "html", "indent": true }
/// }
/// ```
///
/// A relative `stylesheet` path is resolved against the directory of the
/// configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub stylesheet: Option<PathBuf>,
    /// Global parameters by expanded name, passed as strings.
    pub parameters: BTreeMap<String, String>,
    pub mode: Option<String>,
    pub output: Option<OutputSettings>,
}

impl TransformConfig {
    pub fn from_json(json: &str) -> Result<Self, TrellisError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TrellisError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to read configuration from '{}': {}", path.display(), e),
            )
        })?;
        let mut config = Self::from_json(&text)?;
        if let Some(stylesheet) = &config.stylesheet
            && stylesheet.is_relative()
            && let Some(dir) = path.parent()
        {
            config.stylesheet = Some(dir.join(stylesheet));
        }
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlays `other`: its parameters replace ones with the same name, and
    /// its stylesheet, mode and output settings win when set.
    pub fn merge(&mut self, other: TransformConfig) {
        if other.stylesheet.is_some() {
            self.stylesheet = other.stylesheet;
        }
        self.parameters.extend(other.parameters);
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        match (&mut self.output, other.output) {
            (Some(current), Some(overrides)) => current.merge(&overrides),
            (current, overrides) => {
                if overrides.is_some() {
                    *current = overrides;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_xslt::OutputMethod;

    #[test]
    fn parses_all_fields() {
        let config = TransformConfig::from_json(
            r#"{
                "stylesheet": "a.xsl",
                "parameters": {"x": "1"},
                "mode": "m",
                "output": {"method": "text", "omit-xml-declaration": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.stylesheet, Some(PathBuf::from("a.xsl")));
        assert_eq!(config.parameters.get("x").map(String::as_str), Some("1"));
        assert_eq!(config.mode.as_deref(), Some("m"));
        let output = config.output.unwrap();
        assert_eq!(output.method, Some(OutputMethod::Text));
        assert_eq!(output.omit_xml_declaration, Some(true));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = TransformConfig::from_json(r#"{"stylesheat": "a.xsl"}"#).unwrap_err();
        assert!(matches!(err, TrellisError::Json(_)));
    }

    #[test]
    fn relative_stylesheet_follows_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"{"stylesheet": "main.xsl"}"#).unwrap();
        let config = TransformConfig::from_file(&path).unwrap();
        assert_eq!(config.stylesheet, Some(dir.path().join("main.xsl")));
    }

    #[test]
    fn merge_prefers_the_overlay() {
        let mut base = TransformConfig::from_json(
            r#"{"parameters": {"a": "1", "b": "2"}, "output": {"method": "xml", "indent": true}}"#,
        )
        .unwrap();
        let overlay =
            TransformConfig::from_json(r#"{"parameters": {"b": "3"}, "mode": "m", "output": {"method": "html"}}"#)
                .unwrap();
        base.merge(overlay);
        assert_eq!(base.parameters.get("a").map(String::as_str), Some("1"));
        assert_eq!(base.parameters.get("b").map(String::as_str), Some("3"));
        assert_eq!(base.mode.as_deref(), Some("m"));
        let output = base.output.unwrap();
        assert_eq!(output.method, Some(OutputMethod::Html));
        assert_eq!(output.indent, Some(true));
    }
}
