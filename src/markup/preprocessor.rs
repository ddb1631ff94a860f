//! Tag normalization applied to segments on their way into the store.

use std::sync::Arc;

use super::{fix_tags, has_tags, parse_fragment, reduce_tree, ParseMode, ParsedMarkup, TAG_PREFIX};
use crate::error::TmResult;
use crate::models::LangPair;
use crate::tag_transfer::TagTransfer;
use crate::tokenizer::TokenizerRegistry;

/// Canonicalize a segment's inline markup.
///
/// Text without tags comes back unchanged. Otherwise names are fixed, the
/// result is parsed strictly, and a well-formed tree is reduced and
/// renumbered (`T1`, `T2`, …). Broken nesting or an unterminated tag falls
/// back to the stripped plain text.
pub fn normalize_markup(text: &str) -> String {
    if !has_tags(text) {
        return text.to_string();
    }
    let (fixed, stripped) = fix_tags(text);
    match parse_fragment(&fixed, ParseMode::Strict) {
        ParsedMarkup::Tree(mut root) => {
            reduce_tree(&mut root);
            root.renumber(TAG_PREFIX);
            root.to_markup()
        }
        ParsedMarkup::Degraded(_) => stripped,
    }
}

/// Per-language-pair entry point for markup handling.
pub struct TagPreprocessor {
    transfer: TagTransfer,
}

impl TagPreprocessor {
    pub fn new(lang_pair: LangPair, tokenizers: Arc<TokenizerRegistry>) -> Self {
        Self {
            transfer: TagTransfer::new(lang_pair, tokenizers),
        }
    }

    pub fn lang_pair(&self) -> &LangPair {
        self.transfer.lang_pair()
    }

    pub fn process(&self, text: &str) -> String {
        normalize_markup(text)
    }

    /// Carry the source's tags over to `target`.
    pub fn transfer_tags(&self, source: &str, target: &str) -> TmResult<String> {
        self.transfer.transfer(source, target)
    }
}
