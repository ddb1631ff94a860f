//! Query orchestration.
//!
//! One logical query runs through a small state machine:
//!
//! ```text
//! INIT ─► RETRIEVE_CANDIDATES ─┬─► (none) ─────────────────────► RESULT: no match
//!                              ├─► EXACT_MATCH_FOUND ───────────► RESULT: exact
//!                              └─► FUZZY_SCORE ─┬─► ≥ min_match ► RESULT: fuzzy
//!                                               └─► < min_match ► RESULT: no match
//! ```
//!
//! Retrieval is delegated to a [`CandidateStore`]. Candidates are re-scored
//! with normalized edit distance against the query (backends rank by their
//! own relevance, which is not a match percentage), then adjusted and
//! selected by the [`MatchScorer`]. "No candidates" and "best below
//! threshold" both surface as `None` to the caller but are logged apart and
//! kept apart in [`QueryOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::error::TmResult;
use crate::markup::has_tags;
use crate::models::{LangPair, MatchCandidate, MatchResult};
use crate::scoring::{normalized_similarity, MatchFilters, MatchScorer, ScoringConfig};
use crate::store::{CandidateStore, SearchFilters};
use crate::tag_transfer::TagTransfer;
use crate::tokenizer::TokenizerRegistry;
use crate::translate::{NoOpTranslator, Translator};

/// How query results are rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    /// Tab-separated `source`, `target`, `match` lines.
    Moses,
}

/// Full parameterization of one query request.
///
/// Derive variants with `clone()` and the builder methods; the original is
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub queries: Vec<String>,
    pub lang_pair: LangPair,
    pub output: OutputFormat,
    /// Upper bound on results per query (concordance mode).
    pub limit: usize,
    /// Hard retrieval restriction. Empty: any domain.
    pub domains: Vec<String>,
    /// Soft preference: candidates outside it are penalized, not dropped.
    pub preferred_domain: Option<String>,
    pub min_match: f64,
    pub concordance: bool,
    pub automatic_translation: bool,
    pub exact_length: bool,
    pub source_metadata: BTreeMap<String, String>,
    pub target_metadata: BTreeMap<String, String>,
    pub penalize_dirty: bool,
}

impl QueryParams {
    pub fn new(queries: Vec<String>, lang_pair: LangPair) -> Self {
        Self {
            queries,
            lang_pair,
            output: OutputFormat::default(),
            limit: 10,
            domains: Vec::new(),
            preferred_domain: None,
            min_match: 75.0,
            concordance: false,
            automatic_translation: false,
            exact_length: false,
            source_metadata: BTreeMap::new(),
            target_metadata: BTreeMap::new(),
            penalize_dirty: false,
        }
    }

    pub fn single(query: &str, lang_pair: LangPair) -> Self {
        Self::new(vec![query.to_string()], lang_pair)
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_preferred_domain(mut self, domain: impl Into<String>) -> Self {
        self.preferred_domain = Some(domain.into());
        self
    }

    pub fn with_min_match(mut self, min_match: f64) -> Self {
        self.min_match = min_match;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_concordance(mut self, on: bool) -> Self {
        self.concordance = on;
        self
    }

    pub fn with_automatic_translation(mut self, on: bool) -> Self {
        self.automatic_translation = on;
        self
    }

    pub fn with_exact_length(mut self, on: bool) -> Self {
        self.exact_length = on;
        self
    }

    pub fn with_source_metadata(mut self, key: &str, value: &str) -> Self {
        self.source_metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_target_metadata(mut self, key: &str, value: &str) -> Self {
        self.target_metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_dirty_penalty(mut self, on: bool) -> Self {
        self.penalize_dirty = on;
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn search_filters(&self) -> SearchFilters {
        SearchFilters {
            domains: self.domains.clone(),
            exact_length: self.exact_length,
            ..Default::default()
        }
    }

    pub fn match_filters(&self) -> MatchFilters {
        MatchFilters {
            domains: self.preferred_domain.clone().map(|d| vec![d]),
            penalize_dirty: self.penalize_dirty,
        }
    }

    fn metadata_matches(&self, candidate: &MatchCandidate) -> bool {
        let contains_all = |have: &BTreeMap<String, String>, want: &BTreeMap<String, String>| {
            want.iter().all(|(k, v)| have.get(k) == Some(v))
        };
        contains_all(&candidate.unit.source_metadata, &self.source_metadata)
            && contains_all(&candidate.unit.target_metadata, &self.target_metadata)
    }
}

/// Custom selection among fuzzy candidates, used in place of the default
/// best-score selection when no perfect match exists.
pub trait FuzzyStrategy: Send + Sync {
    /// `candidates` carry their similarity score against `query`.
    fn select(
        &self,
        query: &str,
        candidates: &[MatchCandidate],
        scorer: &MatchScorer,
        filters: &MatchFilters,
    ) -> Option<MatchResult>;
}

/// Terminal state of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Empty query, or retrieval returned nothing usable.
    NoCandidates,
    /// The best candidate scored under the threshold.
    BelowThreshold { best: f64 },
    Exact(MatchResult),
    Fuzzy(MatchResult),
    /// Produced by the automatic-translation fallback.
    Translated(MatchResult),
}

impl QueryOutcome {
    pub fn into_result(self) -> Option<MatchResult> {
        match self {
            QueryOutcome::Exact(r) | QueryOutcome::Fuzzy(r) | QueryOutcome::Translated(r) => Some(r),
            QueryOutcome::NoCandidates | QueryOutcome::BelowThreshold { .. } => None,
        }
    }
}

/// Runs queries against one store.
pub struct QueryOrchestrator {
    store: Arc<dyn CandidateStore>,
    scorer: MatchScorer,
    config: QueryConfig,
    fuzzy: Option<Box<dyn FuzzyStrategy>>,
    translator: Box<dyn Translator>,
    tokenizers: Option<Arc<TokenizerRegistry>>,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn CandidateStore>,
        config: QueryConfig,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            store,
            scorer: MatchScorer::new(scoring),
            config,
            fuzzy: None,
            translator: Box::new(NoOpTranslator::new()),
            tokenizers: None,
        }
    }

    pub fn with_fuzzy_strategy(mut self, strategy: Box<dyn FuzzyStrategy>) -> Self {
        self.fuzzy = Some(strategy);
        self
    }

    pub fn with_translator(mut self, translator: Box<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Carry tags of a tagged query over to the matched target text.
    pub fn with_tag_transfer(mut self, tokenizers: Arc<TokenizerRegistry>) -> Self {
        self.tokenizers = Some(tokenizers);
        self
    }

    /// One result slot per query, `None` where nothing usable was found.
    pub async fn query(&self, params: &QueryParams) -> TmResult<Vec<Option<MatchResult>>> {
        let mut results = Vec::with_capacity(params.queries.len());
        for q in &params.queries {
            results.push(self.query_one(q, params).await?.into_result());
        }
        Ok(results)
    }

    /// Every query in `params`, dispatched on the mode: the best match
    /// (zero or one result) or, with `concordance` set, the concordance list.
    pub async fn run(&self, params: &QueryParams) -> TmResult<Vec<Vec<MatchResult>>> {
        if !params.concordance {
            let best = self.query(params).await?;
            return Ok(best.into_iter().map(|r| r.into_iter().collect()).collect());
        }
        let mut lists = Vec::with_capacity(params.queries.len());
        for q in &params.queries {
            lists.push(self.query_concordance(q, params).await?);
        }
        Ok(lists)
    }

    /// Run the state machine for a single query text.
    pub async fn query_one(&self, query: &str, params: &QueryParams) -> TmResult<QueryOutcome> {
        let outcome = self.match_one(query, params).await?;
        let outcome = match outcome {
            QueryOutcome::NoCandidates | QueryOutcome::BelowThreshold { .. }
                if params.automatic_translation =>
            {
                self.translate_fallback(query, params).unwrap_or(outcome)
            }
            other => other,
        };
        self.with_query_tags(query, params, outcome)
    }

    async fn match_one(&self, query: &str, params: &QueryParams) -> TmResult<QueryOutcome> {
        if query.trim().is_empty() {
            tracing::debug!("empty query");
            return Ok(QueryOutcome::NoCandidates);
        }

        let cap = candidate_cap(self.config.candidate_limit, params.min_match);
        let candidates = self.retrieve(query, params, cap).await?;
        if candidates.is_empty() {
            tracing::info!(lang_pair = %params.lang_pair, "no candidates retrieved");
            return Ok(QueryOutcome::NoCandidates);
        }

        let filters = params.match_filters();
        let penalty = self.config.mismatch_penalty;
        let Some(best) = self
            .scorer
            .select_best_by(&candidates, |c| self.scorer.adjust_match(c, &filters, penalty))
        else {
            return Ok(QueryOutcome::NoCandidates);
        };

        if best.perfect {
            tracing::debug!(lang_pair = %params.lang_pair, "exact match");
            let unit = &candidates[best.index].unit;
            return Ok(QueryOutcome::Exact(MatchResult::from_unit(unit, best.score)));
        }

        let chosen = match &self.fuzzy {
            Some(strategy) => strategy.select(query, &candidates, &self.scorer, &filters),
            None => Some(MatchResult::from_unit(&candidates[best.index].unit, best.score)),
        };
        match chosen {
            Some(result) if result.match_score >= params.min_match => Ok(QueryOutcome::Fuzzy(result)),
            Some(result) => {
                tracing::info!(
                    lang_pair = %params.lang_pair,
                    best = result.match_score,
                    min_match = params.min_match,
                    "best candidate below threshold"
                );
                Ok(QueryOutcome::BelowThreshold {
                    best: result.match_score,
                })
            }
            None => {
                tracing::info!(lang_pair = %params.lang_pair, "fuzzy strategy selected nothing");
                Ok(QueryOutcome::BelowThreshold { best: best.score })
            }
        }
    }

    /// Several differing matches for inspection, best first.
    ///
    /// Keeps at most `params.limit` results scoring at least
    /// `params.min_match`, one per distinct target text.
    pub async fn query_concordance(
        &self,
        query: &str,
        params: &QueryParams,
    ) -> TmResult<Vec<MatchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let candidates = self
            .retrieve(query, params, self.config.concordance_limit.max(params.limit))
            .await?;

        let filters = params.match_filters();
        let mut results: Vec<MatchResult> = candidates
            .iter()
            .map(|c| {
                let score = self
                    .scorer
                    .adjust_match(c, &filters, self.config.mismatch_penalty);
                MatchResult::from_unit(&c.unit, score)
            })
            .filter(|r| r.match_score >= params.min_match)
            .collect();
        results.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = std::collections::HashSet::new();
        results.retain(|r| seen.insert(r.tm_tgt.clone()));
        results.truncate(params.limit);
        Ok(results)
    }

    /// RETRIEVE_CANDIDATES: backend search, metadata filters, similarity
    /// re-scoring. Storage order is preserved.
    async fn retrieve(
        &self,
        query: &str,
        params: &QueryParams,
        limit: usize,
    ) -> TmResult<Vec<MatchCandidate>> {
        let hits = self
            .store
            .search(query, &params.lang_pair, &params.search_filters(), limit)
            .await?;
        tracing::debug!(lang_pair = %params.lang_pair, hits = hits.len(), "retrieved candidates");

        Ok(hits
            .into_iter()
            .filter(|c| params.metadata_matches(c))
            .map(|c| {
                let score = normalized_similarity(query, &c.unit.source_text) * 100.0;
                MatchCandidate::new(c.unit, score)
            })
            .collect())
    }

    fn translate_fallback(&self, query: &str, params: &QueryParams) -> Option<QueryOutcome> {
        let text = self.translator.translate(query, &params.lang_pair)?;
        Some(QueryOutcome::Translated(MatchResult {
            tm_src: query.to_string(),
            tm_tgt: text,
            match_score: 0.0,
            source_metadata: BTreeMap::new(),
            target_metadata: BTreeMap::new(),
            domain: Vec::new(),
            file_name: None,
        }))
    }

    fn with_query_tags(
        &self,
        query: &str,
        params: &QueryParams,
        outcome: QueryOutcome,
    ) -> TmResult<QueryOutcome> {
        let Some(tokenizers) = &self.tokenizers else {
            return Ok(outcome);
        };
        if !has_tags(query) {
            return Ok(outcome);
        }
        let transfer = TagTransfer::new(params.lang_pair.clone(), Arc::clone(tokenizers));
        let retag = |mut r: MatchResult| -> TmResult<MatchResult> {
            r.tm_tgt = transfer.transfer(query, &r.tm_tgt)?;
            Ok(r)
        };
        Ok(match outcome {
            QueryOutcome::Exact(r) => QueryOutcome::Exact(retag(r)?),
            QueryOutcome::Fuzzy(r) => QueryOutcome::Fuzzy(retag(r)?),
            other => other,
        })
    }
}

/// Retrieval cap for a threshold. Lower thresholds accept weaker matches,
/// so more candidates are pulled: `limit` at 100, ten times it at 10 or below.
fn candidate_cap(limit: usize, min_match: f64) -> usize {
    let factor = 100.0 / min_match.clamp(10.0, 100.0);
    let cap = (limit as f64 * factor).ceil();
    if cap.is_finite() {
        (cap as usize).max(limit)
    } else {
        limit
    }
}

/// Render per-query results in the requested format.
///
/// Moses output has one line per result and an empty line for a query
/// without results.
pub fn render(format: OutputFormat, queries: &[String], results: &[Vec<MatchResult>]) -> String {
    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = queries
                .iter()
                .zip(results)
                .map(|(q, hits)| serde_json::json!({ "query": q, "results": hits }))
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_default()
        }
        OutputFormat::Moses => results
            .iter()
            .map(|hits| {
                hits.iter()
                    .map(|r| format!("{}\t{}\t{}", r.tm_src, r.tm_tgt, r.match_score))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
