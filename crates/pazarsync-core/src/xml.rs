//! XML <-> JSON bridging for XML-RPC style marketplaces.
//!
//! Documents are flattened the way the adapters expect to read them: the root
//! element name is dropped, leaf elements become strings, repeated siblings
//! become arrays and attributes are kept under `@name` keys.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ValidationError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid xml: {0}")]
pub struct XmlError(String);

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut children = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| XmlError(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| XmlError(e.to_string()))?;
            children.insert(format!("@{key}"), Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            children,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let value = if self.children.is_empty() {
            Value::String(self.text)
        } else {
            let mut children = self.children;
            if !self.text.is_empty() {
                children.insert(String::from("#text"), Value::String(self.text));
            }
            Value::Object(children)
        };
        (self.name, value)
    }
}

fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}

/// Converts an XML document into a JSON value rooted at the document element.
pub fn to_json(document: &str) -> Result<Value, XmlError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError(e.to_string()))?;
        match event {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some(value),
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| XmlError(e.to_string()))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| XmlError(String::from("unbalanced closing tag")))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some(value),
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError(String::from("document ended inside an element")));
    }
    root.ok_or_else(|| XmlError(String::from("document has no root element")))
}

/// Escapes text for embedding in an XML element or attribute.
pub fn escape(value: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(value)
}

/// Renders `<name>value</name>` with the value escaped.
pub fn element(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", escape(value))
}

/// Renders a JSON value as XML elements named `name`.
///
/// The inverse of [`to_json`]: objects nest, arrays repeat the element,
/// `@key` entries become attributes and `#text` becomes the element text.
/// Keys that are not XML names are rejected rather than written.
pub fn from_json(name: &str, value: &Value) -> Result<String, ValidationError> {
    let mut out = String::new();
    write_value(&mut out, name, value)?;
    Ok(out)
}

/// Renders every entry of a JSON object as sibling elements.
pub fn fields_from_json(value: &Value) -> Result<String, ValidationError> {
    let mut out = String::new();
    if let Value::Object(fields) = value {
        for (name, child) in fields {
            write_value(&mut out, name, child)?;
        }
    }
    Ok(out)
}

/// ASCII subset of the XML `Name` production, without namespace prefixes.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn checked_name(name: &str) -> Result<&str, ValidationError> {
    if is_xml_name(name) {
        Ok(name)
    } else {
        Err(ValidationError::InvalidXmlName {
            name: name.to_owned(),
        })
    }
}

fn write_value(out: &mut String, name: &str, value: &Value) -> Result<(), ValidationError> {
    let name = checked_name(name)?;
    match value {
        Value::Array(items) => {
            for item in items {
                write_value(out, name, item)?;
            }
        }
        Value::Object(fields) => {
            out.push('<');
            out.push_str(name);
            for (key, attribute) in fields {
                if let Some(attribute_name) = key.strip_prefix('@') {
                    let attribute_name = checked_name(attribute_name)?;
                    out.push_str(&format!(" {attribute_name}=\"{}\"", escape(&scalar(attribute))));
                }
            }
            out.push('>');
            for (key, child) in fields {
                if key == "#text" {
                    out.push_str(&escape(&scalar(child)));
                } else if !key.starts_with('@') {
                    write_value(out, key, child)?;
                }
            }
            out.push_str(&format!("</{name}>"));
        }
        Value::Null => out.push_str(&format!("<{name}/>")),
        scalar_value => out.push_str(&element(name, &scalar(scalar_value))),
    }
    Ok(())
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
