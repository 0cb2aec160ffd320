//! Tool-name rendering.
//!
//! Canonical names are dotted sequences of lowerCamel alphanumeric segments
//! (`base.appTableRecord.create`). Each style is a pure rewrite of the
//! canonical form; the dispatcher verifies at build time that no two
//! canonical names render to the same wire name, which keeps every style
//! invertible over the active tool set.

use crate::config::NameStyleSetting;
use crate::errors::{LatticeError, LatticeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameStyle {
    /// `base.appTableRecord.create`, the canonical form.
    Dotted,
    /// `baseAppTableRecordCreate`
    Camel,
    /// `base_app_table_record_create`
    Snake,
    /// `base_appTableRecord_create`: separator swap, segment case kept.
    Underscore,
}

impl From<NameStyleSetting> for NameStyle {
    fn from(setting: NameStyleSetting) -> Self {
        match setting {
            NameStyleSetting::Dotted => NameStyle::Dotted,
            NameStyleSetting::Camel => NameStyle::Camel,
            NameStyleSetting::Snake => NameStyle::Snake,
            NameStyleSetting::Underscore => NameStyle::Underscore,
        }
    }
}

/// Check a canonical name: non-empty dotted segments, each starting with a
/// lowercase letter and containing only ASCII alphanumerics.
pub fn validate_canonical(name: &str) -> LatticeResult<()> {
    if name.is_empty() {
        return Err(LatticeError::InvalidName("empty name".to_string()));
    }
    for segment in name.split('.') {
        let mut chars = segment.chars();
        let valid_head = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric());
        if !valid_head || !valid_tail {
            return Err(LatticeError::InvalidName(format!(
                "segment '{}' in '{}' is not lowerCamel alphanumeric",
                segment, name
            )));
        }
    }
    Ok(())
}

/// Render a canonical name in the requested style.
pub fn render(name: &str, style: NameStyle) -> LatticeResult<String> {
    validate_canonical(name)?;
    let segments: Vec<&str> = name.split('.').collect();
    let rendered = match style {
        NameStyle::Dotted => name.to_string(),
        NameStyle::Underscore => segments.join("_"),
        NameStyle::Camel => {
            let mut out = String::with_capacity(name.len());
            for (i, segment) in segments.iter().enumerate() {
                if i == 0 {
                    out.push_str(segment);
                } else {
                    let mut chars = segment.chars();
                    if let Some(head) = chars.next() {
                        out.push(head.to_ascii_uppercase());
                        out.extend(chars);
                    }
                }
            }
            out
        }
        NameStyle::Snake => {
            let mut words = Vec::new();
            for segment in &segments {
                words.extend(split_camel(segment));
            }
            words.join("_")
        }
    };
    Ok(rendered)
}

/// `appTableRecord` → `["app", "table", "record"]`
fn split_camel(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in segment.chars() {
        if c.is_ascii_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Validate a wire name arriving from the transport: restrict to the
/// recognised character class before it touches any lookup table.
pub fn validate_wire_name(name: &str) -> LatticeResult<()> {
    if name.is_empty() || name.len() > 256 {
        return Err(LatticeError::InvalidName("empty or oversized name".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
    {
        return Err(LatticeError::InvalidName(format!(
            "'{}' contains characters outside the recognised class",
            name
        )));
    }
    Ok(())
}
