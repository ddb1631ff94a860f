//! Per-language tokenizer capability.
//!
//! Tag transfer needs to tokenize both sides of a pair so it can align the
//! source's tag placeholders with target positions. Tokenizers are looked
//! up by language code (case-insensitive); tests register a deterministic
//! implementation, production wiring registers whatever the language needs.
//!
//! A tokenizer must leave [`TAG_PLACEHOLDER`](crate::markup::TAG_PLACEHOLDER)
//! and [`SPACE_PLACEHOLDER`](crate::markup::SPACE_PLACEHOLDER) intact as
//! single tokens.

use std::collections::HashMap;
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{TmError, TmResult};
use crate::models::normalize_lang;

/// Turns text into space-separated tokens.
pub trait Tokenizer: Send + Sync {
    fn process(&self, text: &str) -> String;
}

/// Splits on Unicode word boundaries (UAX #29), so punctuation becomes its
/// own token: `"mundo!"` → `"mundo !"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn process(&self, text: &str) -> String {
        text.split_word_bounds()
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Whitespace-only splitting.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn process(&self, text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Tokenizers keyed by primary language subtag.
#[derive(Default, Clone)]
pub struct TokenizerRegistry {
    by_lang: HashMap<String, Arc<dyn Tokenizer>>,
    fallback: Option<Arc<dyn Tokenizer>>,
}

impl TokenizerRegistry {
    /// An empty registry: every lookup fails until something is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that falls back to [`WordTokenizer`] for any language.
    pub fn with_default() -> Self {
        Self {
            by_lang: HashMap::new(),
            fallback: Some(Arc::new(WordTokenizer)),
        }
    }

    pub fn register(&mut self, lang: &str, tokenizer: Arc<dyn Tokenizer>) -> &mut Self {
        self.by_lang.insert(normalize_lang(lang), tokenizer);
        self
    }

    pub fn get(&self, lang: &str) -> TmResult<Arc<dyn Tokenizer>> {
        let key = normalize_lang(lang);
        self.by_lang
            .get(&key)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or(TmError::NoTokenizer { lang: key })
    }
}

impl std::fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut langs: Vec<_> = self.by_lang.keys().collect();
        langs.sort();
        f.debug_struct("TokenizerRegistry")
            .field("languages", &langs)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_tokenizer_splits_punctuation() {
        assert_eq!(WordTokenizer.process("Hola, mundo!"), "Hola , mundo !");
        assert_eq!(
            WordTokenizer.process("a ELASTICTMSPACE ELASTICTMTAG b"),
            "a ELASTICTMSPACE ELASTICTMTAG b"
        );
    }

    #[test]
    fn test_whitespace_tokenizer() {
        assert_eq!(WhitespaceTokenizer.process("  a  b,c "), "a b,c");
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let mut registry = TokenizerRegistry::new();
        registry.register("EN", Arc::new(WhitespaceTokenizer));
        assert!(registry.get("en").is_ok());
        assert!(registry.get("en-GB").is_ok());
    }

    #[test]
    fn test_registry_missing_language() {
        let registry = TokenizerRegistry::new();
        let err = registry.get("xx").err().unwrap();
        assert!(matches!(err, TmError::NoTokenizer { lang } if lang == "xx"));
    }

    #[test]
    fn test_registry_fallback() {
        let registry = TokenizerRegistry::with_default();
        assert_eq!(registry.get("zz").unwrap().process("a.b c"), "a.b c");
    }
}
