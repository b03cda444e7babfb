//! Lossless XML element tree.
//!
//! Keeps attribute order, whitespace, CDATA and comments so nodes the hook
//! never touches are written back as they came in. The XML declaration,
//! processing instructions and prolog comments are not retained.

use std::borrow::Cow;

use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::HookError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data in its escaped source form.
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Written as a start/end pair even when it has no children.
    expanded: bool,
    source: Option<SourceTag>,
}

/// Start tag as read from the input. Reused on write while the element's
/// name and attributes still match the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceTag {
    raw: String,
    name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(Node::Text(escape(text).into_owned()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, keeping its position if it already exists.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    /// Concatenated text and CDATA content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(unescape(t).map_or_else(|_| t.clone(), Cow::into_owned)),
                Node::CData(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn children_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a Element> + use<'a, 'n> {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Return the first child called `name`, appending an empty one if none exists.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let idx = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))
            .unwrap_or_else(|| {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            });
        match &mut self.children[idx] {
            Node::Element(e) => e,
            _ => unreachable!("index points at an element"),
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn remove_children(&mut self, name: &str) {
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.name == name));
    }

    /// Drop the source layout of this subtree so it is written in canonical form.
    pub(crate) fn forget_source(&mut self) {
        self.expanded = false;
        self.source = None;
        for child in &mut self.children {
            if let Node::Element(e) = child {
                e.forget_source();
            }
        }
    }

    fn start_tag(&self) -> BytesStart<'_> {
        match &self.source {
            Some(src) if src.name == self.name && src.attributes == self.attributes => {
                BytesStart::from_content(src.raw.as_str(), self.name.len())
            }
            _ => {
                let mut start = BytesStart::new(self.name.as_str());
                for (key, value) in &self.attributes {
                    start.push_attribute((key.as_str(), value.as_str()));
                }
                start
            }
        }
    }
}

// ── parsing ────────────────────────────────────────────────

fn decode_error(e: impl std::fmt::Display) -> HookError {
    HookError::DocumentDecode {
        message: e.to_string(),
    }
}

fn encode_error(e: impl std::fmt::Display) -> HookError {
    HookError::DocumentEncode {
        message: e.to_string(),
    }
}

fn start_element(start: &BytesStart<'_>, expanded: bool) -> Result<Element, HookError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(decode_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(decode_error)?.into_owned();
        element.attributes.push((key, value));
    }
    element.expanded = expanded;
    element.source = Some(SourceTag {
        raw: String::from_utf8_lossy(start).into_owned(),
        name: element.name.clone(),
        attributes: element.attributes.clone(),
    });
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), HookError> {
    if let Some(parent) = stack.last_mut() {
        parent.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(decode_error(format!(
            "unexpected second root element <{}>",
            element.name
        )));
    }
    Ok(())
}

/// Parse an XML document into its root element.
pub fn parse(xml: &str) -> Result<Element, HookError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                let position = reader.buffer_position();
                return Err(decode_error(format!("at byte {position}: {e}")));
            }
        };
        match event {
            Event::Start(start) => stack.push(start_element(&start, true)?),
            Event::Empty(start) => {
                let element = start_element(&start, false)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| decode_error("closing tag without an open element"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let content = text.unescape().map_err(decode_error)?;
                match stack.last_mut() {
                    Some(parent) => {
                        let raw = String::from_utf8_lossy(&text).into_owned();
                        parent.children.push(Node::Text(raw));
                    }
                    None if content.trim().is_empty() => {}
                    None => return Err(decode_error("text outside the root element")),
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let content = String::from_utf8_lossy(&data).into_owned();
                    parent.children.push(Node::CData(content));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    let content = String::from_utf8_lossy(&comment).into_owned();
                    parent.children.push(Node::Comment(content));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(decode_error(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| decode_error("document has no root element"))
}

// ── writing ────────────────────────────────────────────────

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), HookError> {
    let start = element.start_tag();

    if element.children.is_empty() && !element.expanded {
        return writer.write_event(Event::Empty(start)).map_err(encode_error);
    }

    writer.write_event(Event::Start(start)).map_err(encode_error)?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::from_escaped(t.as_str())))
                .map_err(encode_error)?,
            Node::CData(c) => writer
                .write_event(Event::CData(BytesCData::new(c.as_str())))
                .map_err(encode_error)?,
            Node::Comment(c) => writer
                .write_event(Event::Comment(BytesText::from_escaped(c.as_str())))
                .map_err(encode_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(encode_error)
}

/// Serialize an element (and its subtree) as an XML document without declaration.
pub fn write(root: &Element) -> Result<String, HookError> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner()).map_err(encode_error)
}
