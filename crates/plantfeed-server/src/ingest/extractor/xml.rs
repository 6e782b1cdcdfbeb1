//! Minimal element tree built from quick-xml events.
//!
//! Report files are small (a day of batches), so the whole document is
//! materialized. Attributes are ignored; every value the pipeline reads lives
//! in element text.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum XmlError {
    #[error("empty document")]
    Empty,

    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("document is not valid UTF-8")]
    Encoding,

    #[error("unexpected end of document inside <{0}>")]
    Unclosed(String),

    #[error("content found after the root element")]
    TrailingContent,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Local name, namespace prefix removed
    pub name: String,
    /// Concatenated, trimmed character data directly inside this element
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// First direct child with this name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a `/`-separated path of direct children.
    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Text of the element at `path`; `None` when the element is absent.
    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).map(|e| e.text.as_str())
    }

    /// All descendants named `name` in document order, excluding `self`.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        let mut stack: Vec<&XmlElement> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if node.name == name {
                found.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }
}

/// Parse a complete document and return its root element.
pub fn parse_document(bytes: &[u8]) -> Result<XmlElement, XmlError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(XmlError::Empty);
    }

    let mut reader = Reader::from_reader(bytes);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError::Malformed {
            position: reader.error_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(XmlError::TrailingContent);
                }
                stack.push(XmlElement::new(utf8(start.local_name().as_ref())?));
            },
            Event::Empty(start) => {
                let element = XmlElement::new(utf8(start.local_name().as_ref())?);
                attach(&mut stack, &mut root, element)?;
            },
            Event::End(_) => {
                let mut element = stack.pop().ok_or_else(|| XmlError::Malformed {
                    position: reader.buffer_position() as u64,
                    message: "closing tag without an open element".to_string(),
                })?;
                element.text = element.text.trim().to_string();
                attach(&mut stack, &mut root, element)?;
            },
            Event::Text(text) => {
                let raw = utf8(&text)?;
                append_text(&mut stack, &root, &unescape(raw)?)?;
            },
            Event::CData(data) => {
                let raw = utf8(&data)?;
                append_text(&mut stack, &root, raw)?;
            },
            Event::GeneralRef(reference) => {
                let name = utf8(&reference)?;
                append_text(&mut stack, &root, &unescape(&format!("&{};", name))?)?;
            },
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry no data.
            _ => {},
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::Empty)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        },
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        },
        None => Err(XmlError::TrailingContent),
    }
}

fn append_text(
    stack: &mut [XmlElement],
    root: &Option<XmlElement>,
    text: &str,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(open) => {
            open.text.push_str(text);
            Ok(())
        },
        None if text.trim().is_empty() => Ok(()),
        None if root.is_some() => Err(XmlError::TrailingContent),
        None => Err(XmlError::Malformed {
            position: 0,
            message: "text outside of the root element".to_string(),
        }),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|_| XmlError::Encoding)
}

fn unescape(raw: &str) -> Result<String, XmlError> {
    quick_xml::escape::unescape(raw)
        .map(|s| s.into_owned())
        .map_err(|e| XmlError::Malformed {
            position: 0,
            message: e.to_string(),
        })
}
