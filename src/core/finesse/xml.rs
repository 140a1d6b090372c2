//! Finesse XML documents as generic JSON values.
//!
//! Shape: `{ "<root>": <element> }`. An element without attributes is either
//! its trimmed text (a string) or an object of its children. Attributes live
//! under `"@attributes"`, with text under `"#text"`. Repeated sibling tags
//! collapse into an array in document order.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::core::error::{WatchError, WatchResult};

pub const ATTRIBUTES_KEY: &str = "@attributes";
pub const TEXT_KEY: &str = "#text";

struct Frame {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> WatchResult<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| WatchError::Protocol(format!("bad attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| WatchError::Protocol(format!("bad attribute value: {}", e)))?;
            attributes.insert(key, Value::String(value.to_string()));
        }
        Ok(Self {
            name,
            attributes,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim().to_string();
        let value = if self.attributes.is_empty() {
            if self.children.is_empty() {
                Value::String(text)
            } else {
                Value::Object(self.children)
            }
        } else {
            let mut object = Map::new();
            object.insert(ATTRIBUTES_KEY.to_string(), Value::Object(self.attributes));
            if self.children.is_empty() {
                object.insert(TEXT_KEY.to_string(), Value::String(text));
            } else {
                object.extend(self.children);
            }
            Value::Object(object)
        };
        (self.name, value)
    }
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        None => {
            children.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

pub fn parse_xml(body: &str) -> WatchResult<Value> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| WatchError::Protocol(format!("invalid XML: {}", e)))?;
        match event {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| WatchError::Protocol(format!("bad text: {}", e)))?;
                    frame.text.push_str(&unescaped);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| WatchError::Protocol("unbalanced closing tag".into()))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(WatchError::Protocol("unexpected end of document".into()));
    }
    let (name, value) = root.ok_or_else(|| WatchError::Protocol("empty document".into()))?;
    let mut doc = Map::new();
    doc.insert(name, value);
    Ok(Value::Object(doc))
}

pub fn child<'a>(node: &'a Value, name: &str) -> Option<&'a Value> {
    node.as_object()?.get(name)
}

/// Text of a child element, whether it was parsed as a bare string or as an
/// attributed element.
pub fn child_text(node: &Value, name: &str) -> Option<String> {
    match child(node, name)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get(TEXT_KEY).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// One element or many: always a list. A missing or empty element is an
/// empty list.
pub fn as_list(node: Option<&Value>) -> Vec<&Value> {
    match node {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(other) => vec![other],
    }
}

/// Messages from an `<ApiErrors>` document, if this is one.
pub fn api_errors(doc: &Value) -> Option<Vec<String>> {
    let errors = child(doc, "ApiErrors")?;
    let messages: Vec<String> = as_list(child(errors, "ApiError"))
        .into_iter()
        .filter_map(|err| {
            child_text(err, "ErrorMessage")
                .or_else(|| child_text(err, "ErrorType"))
                .filter(|m| !m.is_empty())
        })
        .collect();
    if messages.is_empty() {
        Some(vec!["unknown API error".to_string()])
    } else {
        Some(messages)
    }
}
