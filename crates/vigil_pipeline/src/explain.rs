use std::collections::HashMap;
use std::path::Path;

pub use alert_engine::ExplanationSource;

/// Explanation bundles prepared ahead of time, keyed by rule template id.
///
/// The file form is a flat JSON object: `{"tmpl-ransomware": "xb-0041", ...}`.
#[derive(Debug, Clone, Default)]
pub struct TemplateExplanations {
    by_template: HashMap<String, String>,
}

impl TemplateExplanations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template_id: impl Into<String>, bundle_id: impl Into<String>) {
        self.by_template.insert(template_id.into(), bundle_id.into());
    }

    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            by_template: serde_json::from_str(input)?,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw).map_err(std::io::Error::from)
    }

    pub fn len(&self) -> usize {
        self.by_template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_template.is_empty()
    }
}

impl ExplanationSource for TemplateExplanations {
    fn explanation_for(&self, _incident_id: &str, template_id: Option<&str>) -> Option<String> {
        self.by_template.get(template_id?).cloned()
    }
}
