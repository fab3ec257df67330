//! Attribute descriptors: the ordered field layout of a record file.
//!
//! A [`Descriptor`] is built once per schema and shared read-only by every
//! reader, writer and comparator working on that schema. Column positions of
//! delimited files are NOT stored here; they are resolved per file by
//! [`crate::reader::ColumnMap`] since column order may differ between files.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{DiffError, Result};
use crate::record::Entity;
use crate::transform::{TransformerChain, TransformerRegistry};

/// Value type of an attribute; drives inbound conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    Date,
    #[default]
    String,
}

impl FromStr for AttributeType {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" => Ok(AttributeType::Boolean),
            "integer" => Ok(AttributeType::Integer),
            "long" => Ok(AttributeType::Long),
            "float" => Ok(AttributeType::Float),
            "double" => Ok(AttributeType::Double),
            "date" => Ok(AttributeType::Date),
            "string" => Ok(AttributeType::String),
            other => Err(DiffError::InvalidDescriptor(format!(
                "unknown attribute type `{other}`"
            ))),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Boolean => "Boolean",
            AttributeType::Integer => "Integer",
            AttributeType::Long => "Long",
            AttributeType::Float => "Float",
            AttributeType::Double => "Double",
            AttributeType::Date => "Date",
            AttributeType::String => "String",
        };
        f.write_str(name)
    }
}

/// Physical layout of the files a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Separator-delimited columns, optionally with a header row
    #[default]
    Delimited,
    /// Columns at fixed character offsets
    Fixed,
}

/// One named field of a record.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    kind: AttributeType,
    start: Option<usize>,
    length: Option<usize>,
    identifier: bool,
    mandatory: bool,
    readonly: bool,
    trim: bool,
    format_external: Option<String>,
    format_internal: Option<String>,
    inbound: TransformerChain,
    outbound: TransformerChain,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            start: None,
            length: None,
            identifier: false,
            mandatory: false,
            readonly: false,
            trim: true,
            format_external: None,
            format_internal: None,
            inbound: TransformerChain::default(),
            outbound: TransformerChain::default(),
        }
    }

    /// Shorthand for a string attribute.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, AttributeType::String)
    }

    /// Places the attribute at a fixed character offset.
    pub fn at(mut self, start: usize, length: usize) -> Self {
        self.start = Some(start);
        self.length = Some(length);
        self
    }

    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Keeps surrounding blanks of fixed-width values.
    pub fn untrimmed(mut self) -> Self {
        self.trim = false;
        self
    }

    /// Date patterns (chrono `strftime` syntax) used by [`Attribute::convert_external`].
    pub fn formats(mut self, external: impl Into<String>, internal: impl Into<String>) -> Self {
        self.format_external = Some(external.into());
        self.format_internal = Some(internal.into());
        self
    }

    pub fn inbound(mut self, chain: TransformerChain) -> Self {
        self.inbound = chain;
        self
    }

    pub fn outbound(mut self, chain: TransformerChain) -> Self {
        self.outbound = chain;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttributeType {
        self.kind
    }

    pub fn start(&self) -> Option<usize> {
        self.start
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    pub fn is_identifier(&self) -> bool {
        self.identifier
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Cuts this attribute's slot out of a fixed-width line.
    ///
    /// Offsets count characters. Short lines read as padded with blanks, so
    /// an all-blank slot yields `None`.
    pub fn read_fixed(&self, line: &str, trim: bool) -> Option<String> {
        let start = self.start.unwrap_or(0);
        let length = self.length.unwrap_or(0);
        let raw: String = line.chars().skip(start).take(length).collect();
        if raw.trim().is_empty() {
            return None;
        }
        if trim && self.trim {
            Some(raw.trim().to_string())
        } else {
            Some(format!("{raw:<length$}"))
        }
    }

    pub fn transform_inbound(&self, value: Option<String>) -> Option<String> {
        self.inbound.apply(value)
    }

    pub fn transform_outbound(&self, value: Option<String>) -> Option<String> {
        self.outbound.apply(value)
    }

    /// Coerces a raw value to the canonical rendering of the attribute type.
    ///
    /// Empty values pass through untouched. Booleans follow the lenient rule
    /// of the upstream systems: only a case-insensitive `true` is true.
    pub fn convert_external(&self, value: Option<String>) -> Result<Option<String>> {
        let raw = match value {
            Some(raw) if !raw.is_empty() => raw,
            other => return Ok(other),
        };
        let text = raw.trim();
        let converted = match self.kind {
            AttributeType::String => return Ok(Some(raw)),
            AttributeType::Boolean => text.eq_ignore_ascii_case("true").to_string(),
            AttributeType::Integer => text
                .parse::<i32>()
                .map(|v| v.to_string())
                .map_err(|e| self.conversion(&raw, e))?,
            AttributeType::Long => text
                .parse::<i64>()
                .map(|v| v.to_string())
                .map_err(|e| self.conversion(&raw, e))?,
            AttributeType::Float => text
                .parse::<f32>()
                .map(|v| v.to_string())
                .map_err(|e| self.conversion(&raw, e))?,
            AttributeType::Double => text
                .parse::<f64>()
                .map(|v| v.to_string())
                .map_err(|e| self.conversion(&raw, e))?,
            AttributeType::Date => self.convert_date(text)?,
        };
        Ok(Some(converted))
    }

    fn convert_date(&self, text: &str) -> Result<String> {
        let (Some(external), Some(internal)) = (&self.format_external, &self.format_internal)
        else {
            return Ok(text.to_string());
        };
        if let Ok(stamp) = NaiveDateTime::parse_from_str(text, external) {
            return Ok(stamp.format(internal).to_string());
        }
        NaiveDate::parse_from_str(text, external)
            .map(|date| date.format(internal).to_string())
            .map_err(|e| self.conversion(text, e))
    }

    fn conversion(&self, value: &str, reason: impl fmt::Display) -> DiffError {
        DiffError::Conversion {
            attribute: self.name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Stable fingerprint of a descriptor's field layout.
///
/// Keys and hashes built from different schemas carry different ids and
/// refuse to be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId(u64);

/// Ordered attribute definitions for one record schema.
#[derive(Debug, Clone)]
pub struct Descriptor {
    layout: Layout,
    attributes: Vec<Attribute>,
    schema_id: SchemaId,
}

impl Descriptor {
    /// Validates names and layout requirements.
    pub fn new(layout: Layout, attributes: Vec<Attribute>) -> Result<Self> {
        if attributes.is_empty() {
            return Err(DiffError::InvalidDescriptor("no attributes declared".into()));
        }
        let mut seen = HashSet::new();
        for attribute in &attributes {
            if !seen.insert(attribute.name.as_str()) {
                return Err(DiffError::DuplicateAttribute(attribute.name.clone()));
            }
            if layout == Layout::Fixed && (attribute.start.is_none() || attribute.length.is_none()) {
                return Err(DiffError::InvalidDescriptor(format!(
                    "fixed-width attribute `{}` needs start and length",
                    attribute.name
                )));
            }
        }

        let mut hasher = Sha256::new();
        hasher.update([layout as u8]);
        for attribute in &attributes {
            hasher.update(attribute.name.as_bytes());
            hasher.update([0, attribute.identifier as u8]);
            if layout == Layout::Fixed {
                for bound in [attribute.start, attribute.length] {
                    hasher.update((bound.unwrap_or(0) as u64).to_le_bytes());
                }
            }
        }
        let digest = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);

        Ok(Self {
            layout,
            attributes,
            schema_id: SchemaId(u64::from_le_bytes(id)),
        })
    }

    pub fn delimited(attributes: Vec<Attribute>) -> Result<Self> {
        Self::new(Layout::Delimited, attributes)
    }

    pub fn fixed(attributes: Vec<Attribute>) -> Result<Self> {
        Self::new(Layout::Fixed, attributes)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn size(&self) -> usize {
        self.attributes.len()
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(Attribute::is_identifier)
    }

    pub fn has_identifier(&self) -> bool {
        self.attributes.iter().any(Attribute::is_identifier)
    }

    /// Fails fast when records of this schema would have no key.
    pub fn require_identifier(&self) -> Result<()> {
        if self.has_identifier() {
            Ok(())
        } else {
            Err(DiffError::MissingIdentifier)
        }
    }

    /// Values of the identifier attributes, in descriptor order.
    pub fn identifier_fields(&self, entity: &Entity) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|a| a.identifier)
            .map(|a| entity.get(&a.name).cloned().flatten().unwrap_or_default())
            .collect()
    }

    /// Values of the non-identifier attributes, in descriptor order.
    pub fn payload_fields(&self, entity: &Entity) -> Vec<Option<String>> {
        self.attributes
            .iter()
            .filter(|a| !a.identifier)
            .map(|a| entity.get(&a.name).cloned().flatten())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    /// Width of a fixed-width line: the end of the right-most slot.
    pub fn line_width(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| a.start.unwrap_or(0) + a.length.unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// Parses a JSON schema document, resolving transformer tags.
    pub fn from_json(json: &str, registry: &TransformerRegistry) -> Result<Self> {
        let spec: DescriptorSpec = serde_json::from_str(json)
            .map_err(|e| DiffError::InvalidDescriptor(e.to_string()))?;
        spec.build(registry)
    }

    pub fn from_json_file(path: &Path, registry: &TransformerRegistry) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, registry)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorSpec {
    #[serde(default)]
    layout: Layout,
    attributes: Vec<AttributeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeSpec {
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    start: Option<usize>,
    length: Option<usize>,
    #[serde(default)]
    identifier: bool,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    readonly: bool,
    #[serde(default = "default_trim")]
    trim: bool,
    format_external: Option<String>,
    format_internal: Option<String>,
    #[serde(default)]
    inbound: Vec<String>,
    #[serde(default)]
    outbound: Vec<String>,
}

fn default_trim() -> bool {
    true
}

impl DescriptorSpec {
    fn build(self, registry: &TransformerRegistry) -> Result<Descriptor> {
        let attributes = self
            .attributes
            .into_iter()
            .map(|spec| {
                let kind = match spec.kind.as_deref() {
                    Some(kind) => kind.parse()?,
                    None => AttributeType::String,
                };
                Ok(Attribute {
                    name: spec.name,
                    kind,
                    start: spec.start,
                    length: spec.length,
                    identifier: spec.identifier,
                    mandatory: spec.mandatory,
                    readonly: spec.readonly,
                    trim: spec.trim,
                    format_external: spec.format_external,
                    format_internal: spec.format_internal,
                    inbound: registry.chain(spec.inbound.iter().map(String::as_str))?,
                    outbound: registry.chain(spec.outbound.iter().map(String::as_str))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Descriptor::new(self.layout, attributes)
    }
}
