//! Match scoring.
//!
//! Raw candidate scores come from the retrieval backend on a 0–100 scale.
//! [`MatchScorer`] adjusts them for domain and dirty-data mismatches and
//! picks the best candidate. Nothing here fails on ordinary input.
//!
//! # Adjustment
//!
//! ```text
//! domain mismatch:  score = raw × (1 − penalty) − domain_penalty
//! dirty candidate:  score = score − dirty_penalty
//! ```
//!
//! clamped to `[0, 100]`. With the default `domain_penalty` of 5 points a
//! perfect candidate from the wrong domain at `penalty = 0.2` scores 75.

use crate::markup::strip_tags;
use crate::models::{MatchCandidate, MatchResult};

/// Levenshtein distance over Unicode scalar values. Case-sensitive.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// `1 − distance / max_len` over the tag-stripped texts, in `[0, 1]`.
/// Two texts that are both empty after stripping are a perfect match.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let a = strip_tags(a);
    let b = strip_tags(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a, &b) as f64 / max_len as f64
}

/// Point penalties applied on top of the fractional domain penalty.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub domain_penalty: f64,
    pub dirty_penalty: f64,
    /// A candidate is dirty when its `dirty_score` reaches this value.
    pub dirty_threshold: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            domain_penalty: 5.0,
            dirty_penalty: 5.0,
            dirty_threshold: 1,
        }
    }
}

/// What the query asked for, as far as scoring cares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFilters {
    /// `None` or empty means any domain is acceptable.
    pub domains: Option<Vec<String>>,
    pub penalize_dirty: bool,
}

impl MatchFilters {
    pub fn for_domains(domains: Vec<String>) -> Self {
        Self {
            domains: Some(domains),
            penalize_dirty: false,
        }
    }

    fn wanted_domains(&self) -> Option<&[String]> {
        self.domains.as_deref().filter(|d| !d.is_empty())
    }
}

/// Best candidate found by [`MatchScorer::select_best_by`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub score: f64,
    /// The search stopped early on a perfect score.
    pub perfect: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MatchScorer {
    config: ScoringConfig,
}

impl MatchScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Adjusted score of `candidate` under `filters`.
    ///
    /// `penalty` is the fraction of the score lost on a domain mismatch. A
    /// candidate without domain tags mismatches any non-empty filter and
    /// matches an absent one.
    pub fn adjust_match(
        &self,
        candidate: &MatchCandidate,
        filters: &MatchFilters,
        penalty: f64,
    ) -> f64 {
        let mut score = candidate.score;

        if let Some(wanted) = filters.wanted_domains() {
            if !candidate.unit.has_any_tag(wanted) {
                score = score * (1.0 - penalty) - self.config.domain_penalty;
            }
        }

        if filters.penalize_dirty && self.is_dirty(candidate) {
            score -= self.config.dirty_penalty;
        }

        score.clamp(0.0, 100.0)
    }

    pub fn is_dirty(&self, candidate: &MatchCandidate) -> bool {
        candidate
            .unit
            .dirty_score
            .is_some_and(|s| s >= self.config.dirty_threshold)
    }

    /// Pick the best candidate under an arbitrary scoring function.
    ///
    /// Candidates are scored in order. The first one to reach 100 is
    /// returned immediately and later candidates are never scored.
    /// Otherwise the highest score wins and ties go to the earliest.
    pub fn select_best_by<F>(
        &self,
        candidates: &[MatchCandidate],
        mut score: F,
    ) -> Option<Selection>
    where
        F: FnMut(&MatchCandidate) -> f64,
    {
        let mut best: Option<Selection> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let s = score(candidate);
            if s >= 100.0 {
                return Some(Selection {
                    index,
                    score: s,
                    perfect: true,
                });
            }
            if best.map_or(true, |b| s > b.score) {
                best = Some(Selection {
                    index,
                    score: s,
                    perfect: false,
                });
            }
        }
        best
    }

    /// Best candidate by [`adjust_match`](Self::adjust_match).
    pub fn select_best(
        &self,
        candidates: &[MatchCandidate],
        filters: &MatchFilters,
        penalty: f64,
    ) -> Option<MatchResult> {
        self.select_best_by(candidates, |c| self.adjust_match(c, filters, penalty))
            .map(|sel| MatchResult::from_unit(&candidates[sel.index].unit, sel.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LangPair, TranslationUnit};

    fn candidate(src: &str, domain: &[&str], score: f64) -> MatchCandidate {
        let mut unit = TranslationUnit::new(src, "tgt", &LangPair::new("en", "es"));
        unit.domain = domain.iter().map(|d| d.to_string()).collect();
        MatchCandidate::new(unit, score)
    }

    #[test]
    fn test_edit_distance_boundaries() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("", "hello"), 5);
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("hello", "world"), 4);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_edit_distance_is_char_based() {
        assert_eq!(edit_distance("café", "cafe"), 1);
        assert_eq!(edit_distance("日本語", "日本"), 1);
        assert_eq!(edit_distance("Abc", "abc"), 1);
    }

    #[test]
    fn test_normalized_similarity_boundaries() {
        assert_eq!(normalized_similarity("hello", "hello"), 1.0);
        assert_eq!(normalized_similarity("", ""), 1.0);
        assert_eq!(normalized_similarity("", "hello"), 0.0);
        assert_eq!(normalized_similarity("abc", "abcd"), 0.75);
    }

    #[test]
    fn test_normalized_similarity_ignores_tags() {
        assert_eq!(normalized_similarity("<b>hello</b>", "hello"), 1.0);
        assert_eq!(normalized_similarity("<br/>", "  "), 1.0);
    }

    #[test]
    fn test_domain_mismatch_penalty() {
        let scorer = MatchScorer::default();
        let c = candidate("x", &["Medical"], 100.0);
        let filters = MatchFilters::for_domains(vec!["Automotive".into()]);
        assert_eq!(scorer.adjust_match(&c, &filters, 0.2), 75.0);
    }

    #[test]
    fn test_domain_match_unchanged() {
        let scorer = MatchScorer::default();
        let c = candidate("x", &["Medical", "Legal"], 88.0);
        let filters = MatchFilters::for_domains(vec!["Legal".into()]);
        assert_eq!(scorer.adjust_match(&c, &filters, 0.2), 88.0);
        assert_eq!(scorer.adjust_match(&c, &MatchFilters::default(), 0.2), 88.0);
    }

    #[test]
    fn test_untagged_candidate() {
        let scorer = MatchScorer::default();
        let c = candidate("x", &[], 90.0);
        assert_eq!(scorer.adjust_match(&c, &MatchFilters::default(), 0.2), 90.0);
        let filters = MatchFilters::for_domains(vec!["Legal".into()]);
        assert_eq!(scorer.adjust_match(&c, &filters, 0.2), 67.0);
    }

    #[test]
    fn test_dirty_penalty_composes() {
        let scorer = MatchScorer::default();
        let mut c = candidate("x", &["Medical"], 100.0);
        c.unit.dirty_score = Some(2);
        let filters = MatchFilters {
            domains: Some(vec!["Automotive".into()]),
            penalize_dirty: true,
        };
        assert_eq!(scorer.adjust_match(&c, &filters, 0.2), 70.0);

        c.unit.dirty_score = Some(0);
        assert_eq!(scorer.adjust_match(&c, &filters, 0.2), 75.0);
    }

    #[test]
    fn test_adjusted_score_is_clamped() {
        let scorer = MatchScorer::default();
        let c = candidate("x", &[], 3.0);
        let filters = MatchFilters::for_domains(vec!["Legal".into()]);
        assert_eq!(scorer.adjust_match(&c, &filters, 0.5), 0.0);
    }

    #[test]
    fn test_select_best_short_circuits_on_perfect() {
        let scorer = MatchScorer::default();
        let candidates = vec![
            candidate("a", &[], 60.0),
            candidate("b", &[], 100.0),
            candidate("c", &[], 100.0),
            candidate("d", &[], 99.0),
        ];
        let mut calls = 0;
        let sel = scorer
            .select_best_by(&candidates, |c| {
                calls += 1;
                c.score
            })
            .unwrap();
        assert_eq!(sel.index, 1);
        assert!(sel.perfect);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_select_best_ties_go_to_first() {
        let scorer = MatchScorer::default();
        let candidates = vec![
            candidate("a", &[], 80.0),
            candidate("b", &[], 90.0),
            candidate("c", &[], 90.0),
        ];
        let result = scorer
            .select_best(&candidates, &MatchFilters::default(), 0.2)
            .unwrap();
        assert_eq!(result.tm_src, "b");
        assert_eq!(result.match_score, 90.0);
    }

    #[test]
    fn test_select_best_prefers_in_domain() {
        let scorer = MatchScorer::default();
        let candidates = vec![
            candidate("off", &["Medical"], 95.0),
            candidate("on", &["Automotive"], 85.0),
        ];
        let filters = MatchFilters::for_domains(vec!["Automotive".into()]);
        let result = scorer.select_best(&candidates, &filters, 0.2).unwrap();
        assert_eq!(result.tm_src, "on");
    }

    #[test]
    fn test_select_best_empty() {
        let scorer = MatchScorer::default();
        assert!(scorer.select_best(&[], &MatchFilters::default(), 0.2).is_none());
    }
}
