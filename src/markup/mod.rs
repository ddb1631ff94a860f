//! Inline markup codec.
//!
//! Makes inline tags transparent to text comparison while keeping enough
//! structure to put them back later. Everything here works on plain
//! `&str` segments and never fails on malformed markup: a fragment that
//! cannot be parsed degrades to its stripped text. The one fallible
//! operation is [`recover_tags_pos`], which rejects a caller that supplies
//! fewer tags than the token stream has placeholders.

pub mod preprocessor;
pub mod tree;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{TmError, TmResult};

pub use preprocessor::{normalize_markup, TagPreprocessor};
pub use tree::{parse_fragment, Element, ParseMode, ParsedMarkup};

/// Sentinel substituted for each tag before tokenization.
pub const TAG_PLACEHOLDER: &str = "ELASTICTMTAG";
/// Sentinel substituted for whitespace touching a tag.
pub const SPACE_PLACEHOLDER: &str = "ELASTICTMSPACE";
/// Prefix of canonical tag names (`T1`, `T2`, …). Also the generic name.
pub const TAG_PREFIX: &str = "T";

/// Any tag-like substring: opening, closing or self-closing.
pub static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[^<>]+/?>").expect("valid regex"));

static TAG_WITH_SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s*)(</?[^<>]+/?>)(\s*)").expect("valid regex"));

static SELF_CLOSING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<[^<>]+/>$").expect("valid regex"));

static OPENING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<[^/<>][^<>]*>$").expect("valid regex"));

static TAG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid regex"));

/// Default pattern for [`join_tags`]: an opening tag, padded content, and a
/// closing tag.
pub static TAG_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<[^/<>][^<>]*>)([^<>]+)(</[^<>]+>)").expect("valid regex"));

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn has_tags(text: &str) -> bool {
    TAG_RE.is_match(text)
}

/// Remove every tag, collapse whitespace, trim. Idempotent.
pub fn strip_tags(text: &str) -> String {
    normalize_whitespace(&TAG_RE.replace_all(text, " "))
}

/// Every tag substring in document order.
pub fn extract_tags(text: &str) -> Vec<String> {
    TAG_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// True for `<name/>`-shaped tag strings.
pub fn is_self_closing_tag(tag: &str) -> bool {
    SELF_CLOSING_RE.is_match(tag)
}

/// Node form of [`is_self_closing_tag`]: an element with nothing in it.
pub fn is_self_closing_node(node: &Element) -> bool {
    is_empty_tag(node)
}

pub fn is_opening_tag(tag: &str) -> bool {
    OPENING_RE.is_match(tag) && !is_self_closing_tag(tag)
}

fn is_closing_tag(tag: &str) -> bool {
    tag.starts_with("</")
}

/// True when the node has no text and no tail, ignoring whitespace.
pub fn is_empty_tag(node: &Element) -> bool {
    node.is_empty()
}

fn tag_name(tag: &str) -> &str {
    let inner = tag.trim_start_matches('<').trim_start_matches('/');
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    &inner[..end]
}

/// Canonicalize tag names.
///
/// Returns `(normalized_text, stripped_text)`. In `normalized_text` every
/// opening or self-closing tag gets the next `T{n}` name (or plain `T` when
/// its name is not a valid identifier) and attributes are dropped. Closing
/// tags are matched against the open stack; a close that does not match the
/// innermost open tag is emitted as-is in canonical form, so a later strict
/// parse can still detect the broken nesting.
///
/// `stripped_text` has paired tags replaced by a space and self-closing
/// tags removed outright, so `a<br/>b` strips to `ab`.
///
/// Text without tags is returned unchanged in both positions.
pub fn fix_tags(text: &str) -> (String, String) {
    if !has_tags(text) {
        return (text.to_string(), text.to_string());
    }

    let mut normalized = String::with_capacity(text.len());
    let mut stripped = String::with_capacity(text.len());
    // (original name, canonical name)
    let mut open: Vec<(String, String)> = Vec::new();
    let mut counter = 0usize;
    let mut last = 0usize;

    for m in TAG_RE.find_iter(text) {
        let between = &text[last..m.start()];
        normalized.push_str(between);
        stripped.push_str(between);
        last = m.end();

        let tag = m.as_str();
        let name = tag_name(tag);
        let canonical = |n: usize| {
            if TAG_NAME_RE.is_match(name) {
                format!("{TAG_PREFIX}{n}")
            } else {
                TAG_PREFIX.to_string()
            }
        };

        if is_self_closing_tag(tag) {
            counter += 1;
            normalized.push_str(&format!("<{}/>", canonical(counter)));
        } else if is_closing_tag(tag) {
            let close = match open.iter().rposition(|(orig, _)| orig == name) {
                Some(i) if i + 1 == open.len() => open.pop().map(|(_, c)| c),
                Some(i) => open.get(i).map(|(_, c)| c.clone()),
                None => None,
            };
            let close = close.unwrap_or_else(|| TAG_PREFIX.to_string());
            normalized.push_str(&format!("</{close}>"));
            stripped.push(' ');
        } else {
            counter += 1;
            let c = canonical(counter);
            normalized.push_str(&format!("<{c}>"));
            open.push((name.to_string(), c));
            stripped.push(' ');
        }
    }
    normalized.push_str(&text[last..]);
    stripped.push_str(&text[last..]);

    (normalized, normalize_whitespace(&stripped))
}

/// Canonicalize names (`fix_tags`) then renumber `T1, T2, …` depth-first
/// over the recovered tree. No structural reduction.
pub fn simplify_tags(text: &str) -> String {
    if !has_tags(text) {
        return text.to_string();
    }
    let (fixed, _) = fix_tags(text);
    match parse_fragment(&fixed, ParseMode::Recover) {
        ParsedMarkup::Tree(mut root) => {
            root.renumber(TAG_PREFIX);
            root.to_markup()
        }
        ParsedMarkup::Degraded(plain) => plain,
    }
}

/// Parse (recovering), [`reduce_tree`], then renumber every tag `T1, T2, …`
/// in document order. Attributes are dropped.
pub fn rename_tags(text: &str) -> String {
    if !has_tags(text) {
        return text.to_string();
    }
    match parse_fragment(text, ParseMode::Recover) {
        ParsedMarkup::Tree(mut root) => {
            reduce_tree(&mut root);
            root.renumber(TAG_PREFIX);
            root.to_markup()
        }
        ParsedMarkup::Degraded(plain) => plain,
    }
}

/// Remove redundant structure below `node`, repeating until nothing changes:
///
/// - a child with exactly one grandchild, no own text and a blank
///   grandchild tail is replaced by that grandchild (which inherits the
///   child's tail);
/// - two adjacent empty siblings are merged into one.
///
/// `node` itself is never replaced, so the synthetic root survives.
pub fn reduce_tree(node: &mut Element) {
    while reduce_once(node) {}
}

fn reduce_once(node: &mut Element) -> bool {
    let mut changed = false;

    for child in &mut node.children {
        changed |= reduce_once(child);
    }

    for child in &mut node.children {
        let collapsible = child.children.len() == 1
            && child.text.trim().is_empty()
            && child.children[0].tail.trim().is_empty();
        if collapsible {
            if let Some(mut inner) = child.children.pop() {
                inner.tail = std::mem::take(&mut child.tail);
                *child = inner;
                changed = true;
            }
        }
    }

    let mut merged: Vec<Element> = Vec::with_capacity(node.children.len());
    for child in std::mem::take(&mut node.children) {
        match merged.last_mut() {
            Some(prev) if is_empty_tag(prev) && child.text.is_empty() && child.children.is_empty() => {
                if !child.tail.is_empty() {
                    prev.tail = child.tail;
                }
                changed = true;
            }
            _ => merged.push(child),
        }
    }
    node.children = merged;

    changed
}

/// Replace each tag with [`TAG_PLACEHOLDER`].
///
/// With `adjacent_space_placeholder`, whitespace directly touching a tag is
/// replaced by that token as well, so a tokenizer cannot lose the fact that
/// a tag was glued to (or separated from) its neighbour. The result is
/// whitespace-normalized. Text without tags is returned unchanged.
pub fn replace_tags(text: &str, adjacent_space_placeholder: Option<&str>) -> String {
    if !has_tags(text) {
        return text.to_string();
    }
    let replaced = match adjacent_space_placeholder {
        None => TAG_RE
            .replace_all(text, format!(" {TAG_PLACEHOLDER} ").as_str())
            .into_owned(),
        Some(space) => TAG_WITH_SPACE_RE
            .replace_all(text, |caps: &Captures| {
                let before = if caps[1].is_empty() { " ".to_string() } else { format!(" {space} ") };
                let after = if caps[3].is_empty() { " ".to_string() } else { format!(" {space} ") };
                format!("{before}{TAG_PLACEHOLDER}{after}")
            })
            .into_owned(),
    };
    normalize_whitespace(&replaced)
}

/// Tighten `<tag> word </tag>` into `<tag>word</tag>`.
///
/// `pattern` must have three groups: opening tag, content, closing tag
/// ([`TAG_PAIR_RE`] is the usual choice). Matches whose first group is a
/// self-closing tag are left alone.
pub fn join_tags(text: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(text, |caps: &Captures| {
            if is_self_closing_tag(&caps[1]) {
                caps[0].to_string()
            } else {
                format!("{}{}{}", &caps[1], caps[2].trim(), &caps[3])
            }
        })
        .into_owned()
}

/// Tag-agnostic skeleton: every tag becomes a bare ` T `.
pub fn reduce_tags(text: &str) -> String {
    normalize_whitespace(&TAG_RE.replace_all(text, format!(" {TAG_PREFIX} ").as_str()))
}

/// Put tags back into a part-of-speech sequence.
///
/// Walks `(token, pos)` pairs. A [`TAG_PLACEHOLDER`] token is replaced by
/// the next unused entry of `tags` in the first output only. Other tokens
/// contribute their POS to both outputs, and tokens without a POS are
/// skipped. Returns `(pos_with_tags, pos_only)`.
pub fn recover_tags_pos(
    tokens: &[(String, Option<String>)],
    tags: &[String],
) -> TmResult<(Vec<String>, Vec<String>)> {
    let mut with_tags = Vec::with_capacity(tokens.len());
    let mut pos_only = Vec::with_capacity(tokens.len());
    let mut next_tag = 0usize;

    for (token, pos) in tokens {
        if token == TAG_PLACEHOLDER {
            let tag = tags.get(next_tag).ok_or(TmError::TagPlaceholderExhausted {
                needed: next_tag + 1,
                supplied: tags.len(),
            })?;
            with_tags.push(tag.clone());
            next_tag += 1;
        } else if let Some(pos) = pos {
            with_tags.push(pos.clone());
            pos_only.push(pos.clone());
        }
    }

    Ok((with_tags, pos_only))
}
