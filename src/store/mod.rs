//! Candidate retrieval contract.
//!
//! The [`CandidateStore`] trait is the boundary to whatever indexed backend
//! holds the translation memory. The engine only needs four operations:
//! ranked search for one query, a lazy scan for maintenance and export,
//! batched insertion for import, and a listing of provenance file names.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! Failures of the backend itself are reported as
//! [`TmError::Retrieval`](crate::error::TmError::Retrieval), never as an
//! empty result.

pub mod memory;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::TmResult;
use crate::models::{LangPair, MatchCandidate, TranslationUnit};

pub use memory::InMemoryStore;

/// Restrictions applied by the backend before anything is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Keep units carrying at least one of these tags. Empty: no restriction.
    pub domains: Vec<String>,
    /// Keep units whose provenance is one of these. Empty: no restriction.
    pub file_names: Vec<String>,
    /// Scan only: keep units whose (source, target) text occurs more than once.
    pub duplicates_only: bool,
    /// Search only: keep units with the same number of words as the query.
    pub exact_length: bool,
}

impl SearchFilters {
    pub fn for_domains(domains: Vec<String>) -> Self {
        Self {
            domains,
            ..Default::default()
        }
    }

    /// Domain and file-name restrictions. Language and the flags are the
    /// caller's business.
    pub fn accepts(&self, unit: &TranslationUnit) -> bool {
        if !self.domains.is_empty() && !unit.has_any_tag(&self.domains) {
            return false;
        }
        if !self.file_names.is_empty() {
            match &unit.file_name {
                Some(name) if self.file_names.contains(name) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Lazily produced units.
pub type UnitIter<'a> = Box<dyn Iterator<Item = TranslationUnit> + Send + 'a>;

/// Identity of a unit's content: SHA-256 over source and target text.
pub fn content_key(unit: &TranslationUnit) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unit.source_text.as_bytes());
    hasher.update([0u8]);
    hasher.update(unit.target_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Abstract translation-memory backend.
///
/// Units are stored once per direction they were imported in, but every
/// operation answers for the requested `lang_pair` in either direction:
/// a stored `es→en` unit is returned reversed for an `en→es` request.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search`](CandidateStore::search) | Ranked candidates for one query |
/// | [`scan`](CandidateStore::scan) | Lazy iteration over matching units |
/// | [`insert_batch`](CandidateStore::insert_batch) | Add a batch of units |
/// | [`file_names`](CandidateStore::file_names) | Distinct provenance names |
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Up to `limit` candidates with raw scores on a 0–100 scale, best first.
    /// Zero hits is `Ok(vec![])`.
    async fn search(
        &self,
        query: &str,
        lang_pair: &LangPair,
        filters: &SearchFilters,
        limit: usize,
    ) -> TmResult<Vec<MatchCandidate>>;

    /// All units for `lang_pair` passing `filters`, in storage order.
    ///
    /// The iterator is pulled on demand; dropping it early is cancellation.
    fn scan(&self, lang_pair: &LangPair, filters: &SearchFilters) -> TmResult<UnitIter<'_>>;

    /// Store a batch. Returns how many units were accepted.
    async fn insert_batch(&self, units: Vec<TranslationUnit>) -> TmResult<usize>;

    /// Distinct file names of units for `lang_pair` passing `filters`,
    /// sorted.
    async fn file_names(
        &self,
        lang_pair: &LangPair,
        filters: &SearchFilters,
    ) -> TmResult<Vec<String>>;
}
