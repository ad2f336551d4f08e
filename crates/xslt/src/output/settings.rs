use crate::error::XsltError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

impl OutputMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "xml" => Some(OutputMethod::Xml),
            "html" => Some(OutputMethod::Html),
            "text" => Some(OutputMethod::Text),
            _ => None,
        }
    }
}

/// The merged `xsl:output` declarations of a stylesheet. Unset fields fall
/// back to the defaults of the chosen method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputSettings {
    pub method: Option<OutputMethod>,
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub omit_xml_declaration: Option<bool>,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    /// Element names in `{uri}local` form.
    pub cdata_section_elements: Vec<String>,
    pub indent: Option<bool>,
    pub media_type: Option<String>,
}

macro_rules! take_set {
    ($self:ident, $other:ident, $($field:ident),+) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field.clone();
            }
        )+
    };
}

impl OutputSettings {
    pub fn from_json(json: &str) -> Result<Self, XsltError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Overlays the attributes set in `other`, which has equal or higher
    /// import precedence. CDATA section element lists are unioned.
    pub fn merge(&mut self, other: &OutputSettings) {
        take_set!(
            self,
            other,
            method,
            version,
            encoding,
            omit_xml_declaration,
            standalone,
            doctype_public,
            doctype_system,
            indent,
            media_type
        );
        for name in &other.cdata_section_elements {
            if !self.cdata_section_elements.contains(name) {
                self.cdata_section_elements.push(name.clone());
            }
        }
    }

    pub fn indent_for(&self, method: OutputMethod) -> bool {
        self.indent.unwrap_or(method == OutputMethod::Html)
    }

    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("UTF-8")
    }
}
