//! In-memory [`CandidateStore`] implementation for tests and the CLI.
//!
//! Units live in a `Vec` behind `std::sync::RwLock`. Search is brute-force
//! normalized edit-distance similarity over every unit of the pair, which
//! is fine for a few thousand units and useless beyond that.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use async_trait::async_trait;

use crate::error::TmResult;
use crate::markup::strip_tags;
use crate::models::{LangPair, MatchCandidate, TranslationUnit};
use crate::scoring::normalized_similarity;

use super::{content_key, CandidateStore, SearchFilters, UnitIter};

/// In-memory translation memory.
pub struct InMemoryStore {
    units: RwLock<Vec<TranslationUnit>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<TranslationUnit>> {
        // A panicked writer can only have left a partially extended Vec.
        self.units.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `unit` as seen from `lang_pair`, if it belongs to that pair at all.
fn oriented(unit: &TranslationUnit, lang_pair: &LangPair) -> Option<TranslationUnit> {
    let own = unit.lang_pair();
    if own == *lang_pair {
        Some(unit.clone())
    } else if own.reversed() == *lang_pair {
        Some(unit.reversed())
    } else {
        None
    }
}

fn word_count(text: &str) -> usize {
    strip_tags(text).split_whitespace().count()
}

struct ScanIter<'a> {
    store: &'a InMemoryStore,
    pos: usize,
    lang_pair: LangPair,
    filters: SearchFilters,
    /// Content keys occurring more than once, when only duplicates are wanted.
    duplicates: Option<HashSet<String>>,
}

impl Iterator for ScanIter<'_> {
    type Item = TranslationUnit;

    fn next(&mut self) -> Option<TranslationUnit> {
        let units = self.store.read();
        while let Some(unit) = units.get(self.pos) {
            self.pos += 1;
            let Some(unit) = oriented(unit, &self.lang_pair) else {
                continue;
            };
            if !self.filters.accepts(&unit) {
                continue;
            }
            if let Some(dups) = &self.duplicates {
                if !dups.contains(&content_key(&unit)) {
                    continue;
                }
            }
            return Some(unit);
        }
        None
    }
}

#[async_trait]
impl CandidateStore for InMemoryStore {
    async fn search(
        &self,
        query: &str,
        lang_pair: &LangPair,
        filters: &SearchFilters,
        limit: usize,
    ) -> TmResult<Vec<MatchCandidate>> {
        let query_words = word_count(query);
        let units = self.read();
        let mut candidates: Vec<MatchCandidate> = units
            .iter()
            .filter_map(|u| oriented(u, lang_pair))
            .filter(|u| filters.accepts(u))
            .filter(|u| !filters.exact_length || word_count(&u.source_text) == query_words)
            .map(|u| {
                let score = normalized_similarity(query, &u.source_text) * 100.0;
                MatchCandidate::new(u, score)
            })
            .collect();
        // Stable: equal scores keep storage order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn scan(&self, lang_pair: &LangPair, filters: &SearchFilters) -> TmResult<UnitIter<'_>> {
        let duplicates = if filters.duplicates_only {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for unit in self.read().iter() {
                if let Some(u) = oriented(unit, lang_pair).filter(|u| filters.accepts(u)) {
                    *counts.entry(content_key(&u)).or_default() += 1;
                }
            }
            Some(
                counts
                    .into_iter()
                    .filter(|(_, n)| *n > 1)
                    .map(|(key, _)| key)
                    .collect(),
            )
        } else {
            None
        };

        Ok(Box::new(ScanIter {
            store: self,
            pos: 0,
            lang_pair: lang_pair.clone(),
            filters: filters.clone(),
            duplicates,
        }))
    }

    async fn insert_batch(&self, units: Vec<TranslationUnit>) -> TmResult<usize> {
        let mut stored = self.units.write().unwrap_or_else(PoisonError::into_inner);
        let before = stored.len();
        stored.extend(units.into_iter().filter(TranslationUnit::is_usable));
        Ok(stored.len() - before)
    }

    async fn file_names(
        &self,
        lang_pair: &LangPair,
        filters: &SearchFilters,
    ) -> TmResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .read()
            .iter()
            .filter_map(|u| oriented(u, lang_pair))
            .filter(|u| filters.accepts(u))
            .filter_map(|u| u.file_name)
            .collect();
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> LangPair {
        LangPair::new("en", "es")
    }

    fn unit(src: &str, tgt: &str, domain: &str) -> TranslationUnit {
        let mut u = TranslationUnit::new(src, tgt, &pair());
        u.domain = vec![domain.to_string()];
        u.file_name = Some(format!("{domain}.tmx"));
        u
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_batch(vec![
                unit("Hello world", "Hola mundo", "General"),
                unit("Hello there", "Hola", "General"),
                unit("Blood pressure", "Presión arterial", "Medical"),
                unit("Hello world", "Hola mundo", "Medical"),
                TranslationUnit::new("", "skipped", &pair()),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_skips_unusable() {
        let store = seeded().await;
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = seeded().await;
        let hits = store
            .search("Hello world", &pair(), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].score, 100.0);
        assert_eq!(hits[0].unit.domain, vec!["General"]);
        assert_eq!(hits[1].score, 100.0);
        assert_eq!(hits[1].unit.domain, vec!["Medical"]);
        assert!(hits[2].score < 100.0);

        let limited = store
            .search("Hello world", &pair(), &SearchFilters::default(), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search_reverse_direction() {
        let store = seeded().await;
        let hits = store
            .search("Hola mundo", &pair().reversed(), &SearchFilters::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].unit.source_text, "Hola mundo");
        assert_eq!(hits[0].unit.target_text, "Hello world");
        assert_eq!(hits[0].unit.source_language, "es");
    }

    #[tokio::test]
    async fn test_search_exact_length() {
        let store = seeded().await;
        let filters = SearchFilters {
            exact_length: true,
            ..Default::default()
        };
        let hits = store.search("Hello", &pair(), &filters, 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_and_duplicates() {
        let store = seeded().await;
        let medical: Vec<_> = store
            .scan(&pair(), &SearchFilters::for_domains(vec!["Medical".into()]))
            .unwrap()
            .collect();
        assert_eq!(medical.len(), 2);

        let dups: Vec<_> = store
            .scan(
                &pair(),
                &SearchFilters {
                    duplicates_only: true,
                    ..Default::default()
                },
            )
            .unwrap()
            .collect();
        assert_eq!(dups.len(), 2);
        assert!(dups.iter().all(|u| u.source_text == "Hello world"));

        let other: Vec<_> = store
            .scan(&LangPair::new("en", "fr"), &SearchFilters::default())
            .unwrap()
            .collect();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_file_names_sorted_distinct() {
        let store = seeded().await;
        let names = store
            .file_names(&pair(), &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(names, vec!["General.tmx", "Medical.tmx"]);
    }
}
