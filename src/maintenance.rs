//! Maintenance scans: content checks and duplicate detection.
//!
//! Both jobs pull units lazily from [`CandidateStore::scan`] and process
//! them in bounded chunks; neither modifies the store.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::chunk::chunk;
use crate::models::{LangPair, TranslationUnit};
use crate::progress::{JobProgressEvent, ProgressReporter};
use crate::store::{content_key, CandidateStore, SearchFilters};

/// Decides whether texts are acceptable.
pub trait ContentChecker: Send + Sync {
    /// One verdict per input text, in order. `true` means the text passed.
    fn check(&self, texts: &[String]) -> Vec<bool>;
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d ().-]{7,}\d").expect("valid regex"));
static CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").expect("valid regex"));

/// Fails texts containing personal data: e-mail addresses, phone numbers,
/// card-like digit runs, plus any extra patterns supplied.
pub struct PiiChecker {
    extra: Vec<Regex>,
}

impl PiiChecker {
    pub fn new() -> Self {
        Self { extra: Vec::new() }
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.extra.push(pattern);
        self
    }

    fn passes(&self, text: &str) -> bool {
        !(EMAIL_RE.is_match(text)
            || PHONE_RE.is_match(text)
            || CARD_RE.is_match(text)
            || self.extra.iter().any(|re| re.is_match(text)))
    }
}

impl Default for PiiChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentChecker for PiiChecker {
    fn check(&self, texts: &[String]) -> Vec<bool> {
        texts.iter().map(|t| self.passes(t)).collect()
    }
}

/// Outcome of a content check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentCheckSummary {
    pub checked: u64,
    pub passed: u64,
    pub failed: u64,
    /// Failed units with `dirty_score` set to their number of failed texts.
    pub flagged: Vec<TranslationUnit>,
}

/// Check every unit of `domain` for `lang_pair`. A unit passes when both its
/// source and its target pass.
pub fn run_content_check(
    store: &dyn CandidateStore,
    lang_pair: &LangPair,
    domain: &str,
    checker: &dyn ContentChecker,
    chunk_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<ContentCheckSummary> {
    let job = format!("content-check {lang_pair} {domain}");
    progress.report(JobProgressEvent::Scanning { job: job.clone() });

    let units = store
        .scan(lang_pair, &SearchFilters::for_domains(vec![domain.to_string()]))
        .context("Failed to scan units for content check")?;

    let mut summary = ContentCheckSummary::default();
    for batch in chunk(units, chunk_size) {
        let texts: Vec<String> = batch
            .iter()
            .flat_map(|u| [u.source_text.clone(), u.target_text.clone()])
            .collect();
        let verdicts = checker.check(&texts);
        if verdicts.len() != texts.len() {
            bail!(
                "content checker returned {} verdicts for {} texts",
                verdicts.len(),
                texts.len()
            );
        }

        for (unit, pair) in batch.into_iter().zip(verdicts.chunks(2)) {
            let failures = pair.iter().filter(|ok| !**ok).count() as u32;
            if failures == 0 {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                summary.flagged.push(TranslationUnit {
                    dirty_score: Some(failures),
                    ..unit
                });
            }
            summary.checked += 1;
        }
        progress.report(JobProgressEvent::Processing {
            job: job.clone(),
            n: summary.checked,
            total: None,
        });
    }

    tracing::info!(
        lang_pair = %lang_pair,
        domain,
        checked = summary.checked,
        failed = summary.failed,
        "content check finished"
    );
    Ok(summary)
}

/// Units sharing the same source and target text.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DuplicateGroup {
    /// [`content_key`] of the members.
    pub key: String,
    pub source_text: String,
    pub target_text: String,
    pub count: usize,
    pub domains: Vec<String>,
    pub file_names: Vec<String>,
}

/// Duplicate groups (more than one member) in first-seen order.
pub fn find_duplicates(
    store: &dyn CandidateStore,
    lang_pair: &LangPair,
    filters: &SearchFilters,
    progress: &dyn ProgressReporter,
) -> Result<Vec<DuplicateGroup>> {
    let job = format!("dedup {lang_pair}");
    progress.report(JobProgressEvent::Scanning { job: job.clone() });

    let units = store
        .scan(lang_pair, filters)
        .context("Failed to scan units for deduplication")?;

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen = 0u64;
    for unit in units {
        seen += 1;
        let key = content_key(&unit);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(DuplicateGroup {
                key,
                source_text: unit.source_text.clone(),
                target_text: unit.target_text.clone(),
                count: 0,
                domains: Vec::new(),
                file_names: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.count += 1;
        for tag in unit.domain {
            if !group.domains.contains(&tag) {
                group.domains.push(tag);
            }
        }
        if let Some(name) = unit.file_name {
            if !group.file_names.contains(&name) {
                group.file_names.push(name);
            }
        }
    }
    progress.report(JobProgressEvent::Processing {
        job,
        n: seen,
        total: Some(seen),
    });

    groups.retain(|g| g.count > 1);
    tracing::info!(lang_pair = %lang_pair, scanned = seen, groups = groups.len(), "dedup finished");
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::tests::RecordingProgress;
    use crate::progress::NoProgress;
    use crate::store::InMemoryStore;

    fn pair() -> LangPair {
        LangPair::new("en", "es")
    }

    fn unit(src: &str, tgt: &str, domain: &str, file: &str) -> TranslationUnit {
        let mut u = TranslationUnit::new(src, tgt, &pair());
        u.domain = vec![domain.to_string()];
        u.file_name = Some(file.to_string());
        u
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_batch(vec![
                unit("Call me", "Llámame", "Support", "a.tmx"),
                unit("Write to bob@example.com", "Escribe a bob@example.com", "Support", "a.tmx"),
                unit("Dial +34 600 123 456", "Marca +34 600 123 456", "Support", "b.tmx"),
                unit("Call me", "Llámame", "Sales", "b.tmx"),
                unit("Thanks", "Gracias", "Support", "b.tmx"),
                unit("Call me", "Llámame", "Support", "c.tmx"),
            ])
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_pii_checker() {
        let checker = PiiChecker::new();
        let verdicts = checker.check(&[
            "Hello world".to_string(),
            "Mail ana@corp.es today".to_string(),
            "Phone: (555) 123-4567".to_string(),
            "Card 4111 1111 1111 1111".to_string(),
            "Chapter 12, page 3".to_string(),
        ]);
        assert_eq!(verdicts, vec![true, false, false, false, true]);

        let custom = PiiChecker::new().with_pattern(Regex::new("(?i)secret").unwrap());
        assert_eq!(custom.check(&["top SECRET".to_string()]), vec![false]);
    }

    #[tokio::test]
    async fn test_content_check_counts_units() {
        let store = seeded().await;
        let progress = RecordingProgress::default();
        let summary =
            run_content_check(&store, &pair(), "Support", &PiiChecker::new(), 2, &progress).unwrap();

        assert_eq!(summary.checked, 5);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 2);
        assert!(summary.flagged.iter().all(|u| u.dirty_score == Some(2)));
        // Scanning + one event per chunk of 2.
        assert_eq!(progress.0.lock().unwrap().len(), 4);
    }

    struct Broken;

    impl ContentChecker for Broken {
        fn check(&self, _texts: &[String]) -> Vec<bool> {
            vec![true]
        }
    }

    #[tokio::test]
    async fn test_content_check_rejects_short_verdicts() {
        let store = seeded().await;
        let err = run_content_check(&store, &pair(), "Support", &Broken, 50, &NoProgress).unwrap_err();
        assert!(err.to_string().contains("verdicts"));
    }

    #[tokio::test]
    async fn test_find_duplicates() {
        let store = seeded().await;
        let groups =
            find_duplicates(&store, &pair(), &SearchFilters::default(), &NoProgress).unwrap();
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.source_text, "Call me");
        assert_eq!(g.count, 3);
        assert_eq!(g.domains, vec!["Support", "Sales"]);
        assert_eq!(g.file_names, vec!["a.tmx", "b.tmx", "c.tmx"]);

        let support = find_duplicates(
            &store,
            &pair(),
            &SearchFilters::for_domains(vec!["Sales".into()]),
            &NoProgress,
        )
        .unwrap();
        assert!(support.is_empty());
    }
}
