//! Minimal element tree for inline segment markup.
//!
//! Segments are XML fragments (text with interleaved tags, no single root),
//! so the tree has a synthetic nameless root holding the leading text and
//! the top-level elements. Text is kept as raw source bytes: entities are
//! never expanded, so serialization reproduces them verbatim.
//!
//! Parsing never fails. A fragment that cannot be reconstructed comes back
//! as [`ParsedMarkup::Degraded`] carrying its plain-text form.

use quick_xml::errors::IllFormedError;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One element of a parsed fragment, lxml-style: `text` is the content
/// before the first child, `tail` the content after the closing tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub text: String,
    pub tail: String,
    pub children: Vec<Element>,
}

/// How to treat structural problems (mismatched or unterminated tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Any structural problem degrades the whole fragment.
    Strict,
    /// Close tags pop through to their opener, stray close tags are
    /// ignored, and open elements are closed at end of input.
    Recover,
}

/// Outcome of a parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMarkup {
    Tree(Element),
    Degraded(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// No text, no tail, no children (whitespace ignored).
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tail.trim().is_empty() && self.children.is_empty()
    }

    /// Serialize the content of this node (text and children, not the node
    /// itself). Called on the synthetic root this yields the fragment.
    pub fn to_markup(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + 16);
        self.write_inner(&mut out);
        out
    }

    fn write_inner(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.write_element(out);
        }
    }

    fn write_element(&self, out: &mut String) {
        if self.text.is_empty() && self.children.is_empty() {
            out.push('<');
            out.push_str(&self.name);
            out.push_str("/>");
        } else {
            out.push('<');
            out.push_str(&self.name);
            out.push('>');
            self.write_inner(out);
            out.push_str("</");
            out.push_str(&self.name);
            out.push('>');
        }
        out.push_str(&self.tail);
    }

    /// Rename every descendant `{prefix}1`, `{prefix}2`, … in depth-first
    /// document order. The node itself is left alone.
    pub fn renumber(&mut self, prefix: &str) {
        let mut counter = 0usize;
        for child in &mut self.children {
            child.renumber_from(prefix, &mut counter);
        }
    }

    fn renumber_from(&mut self, prefix: &str, counter: &mut usize) {
        *counter += 1;
        self.name = format!("{prefix}{counter}");
        for child in &mut self.children {
            child.renumber_from(prefix, counter);
        }
    }

    /// Total number of descendant elements.
    pub fn count_elements(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.count_elements())
            .sum()
    }
}

/// Parse an inline-markup fragment into an element tree.
pub fn parse_fragment(text: &str, mode: ParseMode) -> ParsedMarkup {
    match build_tree(text, mode) {
        Ok(root) => ParsedMarkup::Tree(root),
        Err(reason) => {
            tracing::debug!(%reason, ?mode, "markup degraded to plain text");
            ParsedMarkup::Degraded(super::strip_tags(text))
        }
    }
}

fn build_tree(text: &str, mode: ParseMode) -> Result<Element, String> {
    let mut reader = Reader::from_str(text);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    // stack[0] is the synthetic root and is never popped inside the loop.
    let mut stack: Vec<Element> = vec![Element::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(Element::new(String::from_utf8_lossy(e.name().as_ref())));
            }
            Ok(Event::Empty(e)) => {
                let el = Element::new(String::from_utf8_lossy(e.name().as_ref()));
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(el);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let open_at = stack
                    .iter()
                    .skip(1)
                    .rposition(|el| el.name == name)
                    .map(|i| i + 1);
                match (mode, open_at) {
                    (ParseMode::Strict, Some(i)) if i == stack.len() - 1 => close_top(&mut stack),
                    (ParseMode::Strict, _) => {
                        return Err(format!("mismatched close tag </{name}>"));
                    }
                    (ParseMode::Recover, Some(i)) => {
                        while stack.len() > i {
                            close_top(&mut stack);
                        }
                    }
                    (ParseMode::Recover, None) => {}
                }
            }
            Ok(Event::Text(e)) => append_text(&mut stack, &String::from_utf8_lossy(&e)),
            Ok(Event::CData(e)) => {
                append_text(&mut stack, &escape(String::from_utf8_lossy(&e).as_ref()))
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // Open elements at end of input are handled below for both modes.
            Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    if stack.len() > 1 {
        if mode == ParseMode::Strict {
            return Err(format!("{} unterminated tag(s)", stack.len() - 1));
        }
        while stack.len() > 1 {
            close_top(&mut stack);
        }
    }

    Ok(stack.pop().unwrap_or_default())
}

fn close_top(stack: &mut Vec<Element>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(el) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(el);
        }
    }
}

fn append_text(stack: &mut [Element], s: &str) {
    let Some(node) = stack.last_mut() else {
        return;
    };
    match node.children.last_mut() {
        Some(last) => last.tail.push_str(s),
        None => node.text.push_str(s),
    }
}
