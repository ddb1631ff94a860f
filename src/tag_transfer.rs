//! Carry inline tags from a source segment onto a target segment.
//!
//! When both sides have the same number of tags the target's tags are
//! overwritten one-for-one. Otherwise the target is stripped and the source
//! tags are re-inserted at token positions aligned by order: the n-th word of
//! the source maps to the n-th token of the target. The alignment is crude
//! but deterministic, and it never drops a tag: anything that cannot be
//! placed is appended at the end.

use std::sync::Arc;

use crate::error::TmResult;
use crate::markup::{
    extract_tags, is_opening_tag, join_tags, normalize_whitespace, replace_tags, strip_tags,
    SPACE_PLACEHOLDER, TAG_PAIR_RE, TAG_PLACEHOLDER, TAG_RE,
};
use crate::models::LangPair;
use crate::tokenizer::TokenizerRegistry;

/// Where a tag lands relative to the aligned target token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    BeforeNext,
    AfterPrevious,
}

/// Tag transfer for one language pair.
pub struct TagTransfer {
    lang_pair: LangPair,
    tokenizers: Arc<TokenizerRegistry>,
}

impl TagTransfer {
    pub fn new(lang_pair: LangPair, tokenizers: Arc<TokenizerRegistry>) -> Self {
        Self {
            lang_pair,
            tokenizers,
        }
    }

    pub fn lang_pair(&self) -> &LangPair {
        &self.lang_pair
    }

    /// Return `target` carrying the tags of `source`.
    ///
    /// Fails only when no tokenizer is registered for one side of the pair,
    /// and only on the unequal-count path.
    pub fn transfer(&self, source: &str, target: &str) -> TmResult<String> {
        let source_tags = extract_tags(source);
        if source_tags.is_empty() {
            return Ok(target.to_string());
        }
        if source_tags.len() == extract_tags(target).len() {
            return Ok(replace_positionally(target, &source_tags));
        }
        self.align(source, &source_tags, target)
    }

    fn align(&self, source: &str, source_tags: &[String], target: &str) -> TmResult<String> {
        let source_tokenizer = self.tokenizers.get(&self.lang_pair.source)?;
        let target_tokenizer = self.tokenizers.get(&self.lang_pair.target)?;

        let marked = source_tokenizer.process(&replace_tags(source, Some(SPACE_PLACEHOLDER)));
        let source_tokens: Vec<&str> = marked.split_whitespace().collect();

        let plain = strip_tags(target);
        let tokenized = target_tokenizer.process(&plain);
        let spans = token_spans(&plain, tokenized.split_whitespace());

        // (byte offset in `plain`, insertion order, tag)
        let mut placed: Vec<(usize, usize, &str)> = Vec::new();
        let mut trailing: Vec<&str> = Vec::new();
        let mut words_seen = 0usize;
        let mut next_tag = 0usize;

        for (k, token) in source_tokens.iter().enumerate() {
            match *token {
                SPACE_PLACEHOLDER => {}
                TAG_PLACEHOLDER => {
                    let Some(tag) = source_tags.get(next_tag) else {
                        break;
                    };
                    next_tag += 1;

                    let glued_prev = k > 0 && source_tokens[k - 1] != SPACE_PLACEHOLDER;
                    let glued_next = source_tokens
                        .get(k + 1)
                        .is_some_and(|t| *t != SPACE_PLACEHOLDER);
                    let anchor = match (glued_prev, glued_next) {
                        (false, true) => Anchor::BeforeNext,
                        (true, false) => Anchor::AfterPrevious,
                        _ if is_opening_tag(tag) => Anchor::BeforeNext,
                        _ => Anchor::AfterPrevious,
                    };

                    let offset = match anchor {
                        Anchor::BeforeNext => spans.get(words_seen).map(|(start, _)| *start),
                        Anchor::AfterPrevious if words_seen == 0 => Some(0),
                        Anchor::AfterPrevious => spans.get(words_seen - 1).map(|(_, end)| *end),
                    };
                    match offset {
                        Some(offset) => {
                            let order = placed.len();
                            placed.push((offset, order, tag.as_str()));
                        }
                        None => trailing.push(tag.as_str()),
                    }
                }
                _ => words_seen += 1,
            }
        }
        trailing.extend(source_tags[next_tag.min(source_tags.len())..].iter().map(String::as_str));

        placed.sort_by_key(|(offset, order, _)| (*offset, *order));

        let tag_bytes: usize = source_tags.iter().map(String::len).sum();
        let mut out = String::with_capacity(plain.len() + tag_bytes + 1);
        let mut last = 0usize;
        for (offset, _, tag) in placed {
            out.push_str(&plain[last..offset]);
            out.push_str(tag);
            last = offset;
        }
        out.push_str(&plain[last..]);
        if !trailing.is_empty() {
            out.push(' ');
            out.push_str(&trailing.concat());
        }

        Ok(join_tags(&normalize_whitespace(&out), &TAG_PAIR_RE))
    }
}

/// Overwrite the k-th tag of `target` with `tags[k]`.
fn replace_positionally(target: &str, tags: &[String]) -> String {
    let mut k = 0usize;
    TAG_RE
        .replace_all(target, |caps: &regex::Captures| {
            let replacement = tags.get(k).cloned().unwrap_or_else(|| caps[0].to_string());
            k += 1;
            replacement
        })
        .into_owned()
}

/// Locate each token in `text`, left to right. A token the tokenizer
/// rewrote (and so cannot be found) gets an empty span at the cursor.
fn token_spans<'a>(text: &str, tokens: impl Iterator<Item = &'a str>) -> Vec<(usize, usize)> {
    let mut cursor = 0usize;
    tokens
        .map(|token| match text[cursor..].find(token) {
            Some(rel) => {
                let start = cursor + rel;
                cursor = start + token.len();
                (start, cursor)
            }
            None => (cursor, cursor),
        })
        .collect()
}
