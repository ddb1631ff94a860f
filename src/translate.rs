//! Automatic-translation hook.
//!
//! The query path can fall back to machine translation when no usable TM
//! match exists. Only the contract survives here: the shipped
//! implementation translates nothing.

use crate::models::LangPair;

/// Machine translation for one language pair.
pub trait Translator: Send + Sync {
    /// Translated text, or `None` when no translation is available.
    fn translate(&self, text: &str, lang_pair: &LangPair) -> Option<String>;
}

/// Always returns `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpTranslator;

impl NoOpTranslator {
    pub fn new() -> Self {
        tracing::debug!("automatic translation is disabled; queries fall back to no result");
        Self
    }
}

impl Translator for NoOpTranslator {
    fn translate(&self, _text: &str, _lang_pair: &LangPair) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_translates_nothing() {
        let t = NoOpTranslator::new();
        assert_eq!(t.translate("Hello", &LangPair::new("en", "es")), None);
    }
}
