//! XML to JSON conversion
//!
//! The Bulk API answers batch and result listings in XML. Attributes and
//! namespaces are ignored, text-only elements become strings, empty elements
//! become `null`, and repeated child elements become arrays.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Parse an XML document into `{root_name: value}`
pub fn xml_to_json(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    let mut open: Vec<Element> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::xml(format!("{e} at offset {}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(tag) => open.push(Element::new(element_name(&tag)?)),
            Event::Empty(tag) => attach(&mut open, &mut root, element_name(&tag)?, Value::Null)?,
            Event::End(_) => {
                let element = open
                    .pop()
                    .ok_or_else(|| Error::xml("closing tag without an open element"))?;
                let (name, value) = element.finish();
                attach(&mut open, &mut root, name, value)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| Error::xml(e.to_string()))?;
                match open.last_mut() {
                    Some(element) => element.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(Error::xml("text outside the root element")),
                }
            }
            Event::CData(cdata) => {
                let text = std::str::from_utf8(&cdata)
                    .map_err(|e| Error::xml(format!("CDATA is not UTF-8: {e}")))?;
                open.last_mut()
                    .ok_or_else(|| Error::xml("CDATA outside the root element"))?
                    .text
                    .push_str(text);
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(element) = open.last() {
        return Err(Error::xml(format!("unclosed element <{}>", element.name)));
    }
    let (name, value) = root.ok_or_else(|| Error::xml("document has no root element"))?;
    let mut doc = Map::new();
    doc.insert(name, value);
    Ok(Value::Object(doc))
}

/// Treat a single child or an array of children uniformly
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn element_name(tag: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(tag.name().as_ref())
        .map(str::to_string)
        .map_err(|e| Error::xml(format!("element name is not UTF-8: {e}")))
}

/// Hand a finished element to its parent, or make it the root
fn attach(
    open: &mut [Element],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> Result<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push((name, value)),
        None if root.is_none() => *root = Some((name, value)),
        None => {
            return Err(Error::xml(format!(
                "unexpected element <{name}> after the root element"
            )))
        }
    }
    Ok(())
}

/// An element whose closing tag has not been read yet
struct Element {
    name: String,
    text: String,
    children: Vec<(String, Value)>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    fn finish(self) -> (String, Value) {
        if self.children.is_empty() {
            let text = self.text.trim();
            let value = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
            return (self.name, value);
        }

        let mut object = Map::new();
        for (child, value) in self.children {
            match object.get_mut(&child) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    object.insert(child, value);
                }
            }
        }
        (self.name, Value::Object(object))
    }
}
