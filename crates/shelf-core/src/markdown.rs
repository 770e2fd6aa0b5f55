//! Markdown parsing into a generic sectioned document.
//!
//! Handles the conversion between the raw reading list file and a
//! loosely-typed structure: a YAML preamble plus `##` sections holding
//! `###` items with `- **key**: value` property bullets.
//!
//! The parser never rejects a malformed body. Lines it cannot place are
//! either appended to the enclosing item's body or dropped. The only hard
//! failure is a preamble block that is present but not a YAML mapping.

use std::collections::HashMap;
use thiserror::Error;

const FENCE: &str = "---";
const SECTION_PREFIX: &str = "## ";
const ITEM_PREFIX: &str = "### ";
const PROPERTY_PREFIX: &str = "- **";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid preamble: {0}")]
    Preamble(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Parsed markdown document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericDocument {
    /// Preamble as key-value pairs (empty if the file has none)
    pub preamble: HashMap<String, serde_yaml::Value>,
    /// `##` sections in file order
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    /// Heading level, always 2 for sections produced by [`parse`]
    pub level: u8,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    /// Heading text with `[[` / `]]` markup stripped
    pub title: String,
    pub properties: HashMap<String, String>,
    /// Free text following the property block, newline-joined
    pub body: String,
}

/// Line classifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    OutsideSection,
    SectionNoItem,
    ItemProperties,
    ItemBody,
}

/// Parse raw bytes, replacing invalid UTF-8 rather than failing.
pub fn parse_bytes(content: &[u8]) -> Result<GenericDocument> {
    parse(&String::from_utf8_lossy(content))
}

/// Parse a reading list document.
///
/// The preamble must open on the very first line:
/// ```markdown
/// ---
/// type: reading-list
/// ---
///
/// ## 📚 To Read
///
/// ### [[Dune]]
/// - **author**: Frank Herbert
/// ```
pub fn parse(content: &str) -> Result<GenericDocument> {
    let (preamble, body) = split_preamble(content);

    let preamble = match preamble {
        Some(yaml) if !yaml.trim().is_empty() => {
            serde_yaml::from_str::<HashMap<String, serde_yaml::Value>>(yaml)?
        }
        _ => HashMap::new(),
    };

    Ok(GenericDocument {
        preamble,
        sections: parse_sections(body),
    })
}

/// Split off the fenced preamble. Without a closing fence the whole
/// content is treated as body.
fn split_preamble(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    // Closing fence directly after the opening one: empty preamble
    if let Some(after) = rest.strip_prefix(FENCE) {
        if after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n") {
            return (Some(""), after);
        }
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == FENCE {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }

    (None, content)
}

fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current_item: Option<Item> = None;
    let mut mode = Mode::OutsideSection;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(title) = line.strip_prefix(SECTION_PREFIX) {
            close_item(&mut sections, &mut current_item);
            sections.push(Section {
                title: title.trim().to_string(),
                level: 2,
                items: Vec::new(),
            });
            mode = Mode::SectionNoItem;
            continue;
        }

        if let Some(title) = line.strip_prefix(ITEM_PREFIX) {
            if mode == Mode::OutsideSection {
                // Items only exist inside a section
                continue;
            }
            close_item(&mut sections, &mut current_item);
            current_item = Some(Item {
                title: strip_brackets(title),
                ..Item::default()
            });
            mode = Mode::ItemProperties;
            continue;
        }

        let Some(item) = current_item.as_mut() else {
            continue;
        };

        match mode {
            Mode::ItemProperties if trimmed.is_empty() => {
                // Properties must be contiguous
                mode = Mode::ItemBody;
            }
            Mode::ItemProperties if trimmed.starts_with(PROPERTY_PREFIX) => {
                if let Some((key, value)) = parse_property(trimmed) {
                    item.properties.insert(key, value);
                }
            }
            Mode::ItemProperties | Mode::ItemBody if !trimmed.is_empty() => {
                mode = Mode::ItemBody;
                if !item.body.is_empty() {
                    item.body.push('\n');
                }
                item.body.push_str(line);
            }
            _ => {}
        }
    }

    close_item(&mut sections, &mut current_item);
    sections
}

fn close_item(sections: &mut [Section], item: &mut Option<Item>) {
    if let (Some(section), Some(item)) = (sections.last_mut(), item.take()) {
        section.items.push(item);
    }
}

/// `- **key**: value` → `(key, value)`. Lines without a colon are ignored.
fn parse_property(line: &str) -> Option<(String, String)> {
    let (raw_key, value) = line.split_once(':')?;
    let key = raw_key
        .strip_prefix(PROPERTY_PREFIX)
        .unwrap_or(raw_key)
        .trim_end()
        .trim_end_matches("**")
        .trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Remove one enclosing `[[` / `]]` pair; brackets inside the title stay.
fn strip_brackets(title: &str) -> String {
    let title = title.trim();
    title
        .strip_prefix("[[")
        .and_then(|t| t.strip_suffix("]]"))
        .unwrap_or(title)
        .trim()
        .to_string()
}
