//! Core data models used throughout the matching engine.
//!
//! These types represent the translation units, retrieval candidates, and
//! match results that flow through import, query, and export.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `strftime` pattern of the compact TMX timestamp (`20090914T114332Z`).
pub const COMPACT_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Format a timestamp in the compact `YYYYMMDDTHHMMSSZ` form.
pub fn format_compact(ts: &DateTime<Utc>) -> String {
    ts.format(COMPACT_TS_FORMAT).to_string()
}

/// Parse a compact `YYYYMMDDTHHMMSSZ` timestamp.
pub fn parse_compact(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), COMPACT_TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reduce a language tag to its lowercase primary subtag (`en-GB` → `en`).
pub fn normalize_lang(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// An ordered (source, target) language pair, normalized to primary subtags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LangPair {
    pub source: String,
    pub target: String,
}

impl LangPair {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: normalize_lang(source),
            target: normalize_lang(target),
        }
    }

    /// Parse `en-es`, `en_es`, or `en:es`. Region subtags are not accepted
    /// here because `-` is the pair separator.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(['-', '_', ':']);
        let source = parts.next()?.trim();
        let target = parts.next()?.trim();
        if source.is_empty() || target.is_empty() || parts.next().is_some() {
            return None;
        }
        Some(Self::new(source, target))
    }

    pub fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

/// One source/target text pair plus its metadata: the atomic TM record.
///
/// Units are never mutated by the matching engine; scoring produces
/// [`MatchResult`]s instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub source_text: String,
    pub target_text: String,
    pub source_language: String,
    pub target_language: String,
    /// Tag/domain identifiers. Empty means "no tags".
    #[serde(default)]
    pub domain: Vec<String>,
    pub file_name: Option<String>,
    pub tuid: Option<String>,
    /// Compact timestamp, see [`COMPACT_TS_FORMAT`].
    pub tm_creation_date: Option<String>,
    pub tm_change_date: Option<String>,
    pub industry: Option<String>,
    #[serde(rename = "type")]
    pub unit_type: Option<String>,
    pub organization: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub source_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub target_metadata: BTreeMap<String, String>,
    pub username: Option<String>,
    /// Count of failed cleaning checks, when the unit has been through maintenance.
    pub dirty_score: Option<u32>,
}

impl TranslationUnit {
    pub fn new(source_text: &str, target_text: &str, lang_pair: &LangPair) -> Self {
        Self {
            source_text: source_text.to_string(),
            target_text: target_text.to_string(),
            source_language: lang_pair.source.clone(),
            target_language: lang_pair.target.clone(),
            ..Default::default()
        }
    }

    pub fn lang_pair(&self) -> LangPair {
        LangPair::new(&self.source_language, &self.target_language)
    }

    /// Both texts are non-empty after trimming.
    pub fn is_usable(&self) -> bool {
        !self.source_text.trim().is_empty() && !self.target_text.trim().is_empty()
    }

    /// The same unit seen from the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            source_text: self.target_text.clone(),
            target_text: self.source_text.clone(),
            source_language: self.target_language.clone(),
            target_language: self.source_language.clone(),
            source_metadata: self.target_metadata.clone(),
            target_metadata: self.source_metadata.clone(),
            ..self.clone()
        }
    }

    /// True when any of `tags` is among this unit's domain tags.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.domain.iter().any(|d| tags.contains(d))
    }
}

/// A retrieved unit with its raw relevance score (0–100), before any
/// domain or tag adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub unit: TranslationUnit,
    pub score: f64,
}

impl MatchCandidate {
    pub fn new(unit: TranslationUnit, score: f64) -> Self {
        Self { unit, score }
    }
}

/// Final output for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub tm_src: String,
    pub tm_tgt: String,
    /// Post-adjustment confidence in `[0, 100]`.
    #[serde(rename = "match")]
    pub match_score: f64,
    pub source_metadata: BTreeMap<String, String>,
    pub target_metadata: BTreeMap<String, String>,
    pub domain: Vec<String>,
    pub file_name: Option<String>,
}

impl MatchResult {
    pub fn from_unit(unit: &TranslationUnit, match_score: f64) -> Self {
        Self {
            tm_src: unit.source_text.clone(),
            tm_tgt: unit.target_text.clone(),
            match_score,
            source_metadata: unit.source_metadata.clone(),
            target_metadata: unit.target_metadata.clone(),
            domain: unit.domain.clone(),
            file_name: unit.file_name.clone(),
        }
    }
}
