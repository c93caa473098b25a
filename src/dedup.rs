//! Similarity-based deduplication of combined agent results.
//!
//! # Algorithm
//!
//! 1. Flatten every agent's hits, stamping `source_agent` and `agent_weight`
//!    metadata.
//! 2. Optionally normalise URLs for comparison (the output keeps the
//!    original URL).
//! 3. Walk the list once. Each result not yet grouped becomes a seed and is
//!    compared with every later ungrouped result. Matches join the seed's
//!    group.
//! 4. Each group is consolidated into one result by `merge`, `keep_best` or
//!    `keep_first`. The consolidated result is then compared with the
//!    remaining ungrouped results; matches join and the group is
//!    consolidated again until nothing new joins.
//!
//! Step 4 means a later pass over the output finds nothing the group's
//! representative would have absorbed. Grouping is otherwise single-hop: a
//! result similar only to a duplicate that did not become the primary stays
//! in its own group.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::agents::{AgentCategory, ResearchResult, SearchResult};
use crate::config::DeduplicationConfig;
use crate::similarity::{
    ngram_containment, normalize_url, text_similarity, title_similarity, url_similarity,
};

const TITLE_WEIGHT: f64 = 0.4;
const CONTENT_WEIGHT: f64 = 0.3;
const URL_WEIGHT: f64 = 0.2;
const RELEVANCE_WEIGHT: f64 = 0.1;

/// Overall similarity must reach this fraction of the larger threshold.
const OVERALL_THRESHOLD_RATIO: f64 = 0.8;
/// Groups whose quality spread is below this are merged.
const MERGE_QUALITY_SPREAD: f64 = 0.2;
/// Character n-gram size for topic relevance.
const RELEVANCE_NGRAM: usize = 3;

/// Metadata key carrying the producing agent.
pub const SOURCE_AGENT_KEY: &str = "source_agent";
/// Metadata key carrying the producing agent's weight.
pub const AGENT_WEIGHT_KEY: &str = "agent_weight";
/// Metadata key listing the results absorbed by a merge.
pub const MERGED_FROM_KEY: &str = "merged_from";

/// How a duplicate group was collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStrategy {
    Merge,
    KeepBest,
    KeepFirst,
}

impl ConsolidationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationStrategy::Merge => "merge",
            ConsolidationStrategy::KeepBest => "keep_best",
            ConsolidationStrategy::KeepFirst => "keep_first",
        }
    }
}

/// Pairwise similarity components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityScores {
    pub title: f64,
    pub content: f64,
    pub url: f64,
    pub relevance: f64,
    pub overall: f64,
}

/// A set of near-identical results.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub primary_result: SearchResult,
    pub duplicates: Vec<SearchResult>,
    /// Mean overall similarity of each duplicate to the result that pulled it in
    pub similarity_score: f64,
    pub consolidation_strategy: ConsolidationStrategy,
}

impl DuplicateGroup {
    /// Number of results in the group, primary included.
    pub fn size(&self) -> usize {
        self.duplicates.len() + 1
    }
}

/// Outcome of one deduplication pass.
#[derive(Debug, Clone, Serialize)]
pub struct DeduplicationResult {
    pub original_count: usize,
    pub deduplicated_count: usize,
    pub duplicates_removed: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub deduplicated_results: Vec<SearchResult>,
    pub processing_time_ms: u64,
}

/// Flattened result with everything the comparisons need.
struct Candidate {
    result: SearchResult,
    comparable_url: String,
    topic_relevance: f64,
    quality: f64,
}

/// Groups and consolidates near-duplicate search results.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationEngine {
    config: DeduplicationConfig,
}

impl DeduplicationEngine {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeduplicationConfig {
        &self.config
    }

    /// Weight for an agent: explicit entry, then its category entry, then the category default.
    pub fn agent_weight(&self, agent: &str) -> f64 {
        let category = AgentCategory::from_name(agent);
        self.config
            .agent_source_weighting
            .get(agent)
            .or_else(|| self.config.agent_source_weighting.get(category.as_str()))
            .copied()
            .unwrap_or_else(|| category.default_weight())
    }

    /// Quality score used to pick group primaries.
    pub fn quality_score(result: &SearchResult, agent_weight: f64) -> f64 {
        let content = (result.snippet.chars().count() as f64 / 300.0).min(1.0);
        let title = (result.title.chars().count() as f64 / 80.0).min(1.0);
        0.3 * content + 0.2 * title + 0.3 * result.relevance_score + 0.2 * agent_weight
    }

    /// How much of the topic shows up in a result's title and snippet.
    pub fn topic_relevance(result: &SearchResult, topic: &str) -> f64 {
        let haystack = format!("{} {}", result.title, result.snippet).to_lowercase();
        ngram_containment(&topic.trim().to_lowercase(), &haystack, RELEVANCE_NGRAM)
    }

    /// Similarity components for two results.
    pub fn similarity(&self, a: &SearchResult, b: &SearchResult, topic: &str) -> SimilarityScores {
        let (url_a, url_b) = (self.comparable_url(&a.url), self.comparable_url(&b.url));
        Self::score(
            a,
            b,
            &url_a,
            &url_b,
            Self::topic_relevance(a, topic),
            Self::topic_relevance(b, topic),
        )
    }

    fn score(
        a: &SearchResult,
        b: &SearchResult,
        url_a: &str,
        url_b: &str,
        relevance_a: f64,
        relevance_b: f64,
    ) -> SimilarityScores {
        let title = title_similarity(&a.title, &b.title);
        let content = text_similarity(&a.snippet, &b.snippet);
        let url = url_similarity(url_a, url_b);
        let relevance = 1.0 - (relevance_a - relevance_b).abs();
        let overall = TITLE_WEIGHT * title
            + CONTENT_WEIGHT * content
            + URL_WEIGHT * url
            + RELEVANCE_WEIGHT * relevance;

        SimilarityScores {
            title,
            content,
            url,
            relevance,
            overall,
        }
    }

    /// Whether a pair of scores marks a duplicate.
    pub fn is_duplicate(&self, scores: &SimilarityScores) -> bool {
        let overall_threshold = OVERALL_THRESHOLD_RATIO
            * self
                .config
                .title_similarity_threshold
                .max(self.config.content_similarity_threshold);

        scores.title >= self.config.title_similarity_threshold
            || scores.content >= self.config.content_similarity_threshold
            || scores.overall >= overall_threshold
    }

    fn flatten(&self, results: &[ResearchResult], topic: &str) -> Vec<Candidate> {
        results
            .iter()
            .flat_map(|research| {
                let weight = self.agent_weight(&research.agent);
                research.results.iter().map(move |hit| {
                    let result = hit
                        .clone()
                        .with_metadata(SOURCE_AGENT_KEY, research.agent.as_str())
                        .with_metadata(AGENT_WEIGHT_KEY, weight);
                    (result, weight)
                })
            })
            .map(|(result, weight)| Candidate {
                comparable_url: self.comparable_url(&result.url),
                topic_relevance: Self::topic_relevance(&result, topic),
                quality: Self::quality_score(&result, weight),
                result,
            })
            .collect()
    }

    /// Group and consolidate near-duplicates across all agents' results.
    pub fn deduplicate_results(&self, results: &[ResearchResult], topic: &str) -> DeduplicationResult {
        let started = Instant::now();
        let candidates = self.flatten(results, topic);
        let original_count = candidates.len();

        let mut grouped = vec![false; candidates.len()];
        let mut deduplicated = Vec::with_capacity(candidates.len());
        let mut groups = Vec::new();

        for seed in 0..candidates.len() {
            if grouped[seed] {
                continue;
            }
            grouped[seed] = true;

            let mut members = vec![seed];
            let mut similarities = Vec::new();
            let seed_candidate = &candidates[seed];
            self.absorb(
                (
                    &seed_candidate.result,
                    seed_candidate.comparable_url.as_str(),
                    seed_candidate.topic_relevance,
                ),
                &candidates,
                seed + 1,
                &mut grouped,
                &mut members,
                &mut similarities,
            );

            if members.len() == 1 {
                deduplicated.push(candidates[seed].result.clone());
                continue;
            }

            let (mut consolidated, mut group) = self.consolidate(&candidates, &members, &similarities);
            loop {
                let url = self.comparable_url(&consolidated.url);
                let relevance = Self::topic_relevance(&consolidated, topic);
                let joined = self.absorb(
                    (&consolidated, url.as_str(), relevance),
                    &candidates,
                    seed + 1,
                    &mut grouped,
                    &mut members,
                    &mut similarities,
                );
                if !joined {
                    break;
                }
                (consolidated, group) = self.consolidate(&candidates, &members, &similarities);
            }

            deduplicated.push(consolidated);
            groups.push(group);
        }

        let deduplicated_count = deduplicated.len();
        let processing_time_ms = started.elapsed().as_millis() as u64;

        info!(
            original = original_count,
            deduplicated = deduplicated_count,
            groups = groups.len(),
            processing_time_ms,
            "Deduplication complete"
        );

        DeduplicationResult {
            original_count,
            deduplicated_count,
            duplicates_removed: original_count - deduplicated_count,
            duplicate_groups: groups,
            deduplicated_results: deduplicated,
            processing_time_ms,
        }
    }

    /// Pull every ungrouped candidate from `start` on that duplicates `target`
    /// into `members`. Returns whether anything joined.
    fn absorb(
        &self,
        target: (&SearchResult, &str, f64),
        candidates: &[Candidate],
        start: usize,
        grouped: &mut [bool],
        members: &mut Vec<usize>,
        similarities: &mut Vec<f64>,
    ) -> bool {
        let (result, url, relevance) = target;
        let before = members.len();

        for other in start..candidates.len() {
            if grouped[other] {
                continue;
            }
            let candidate = &candidates[other];
            let scores = Self::score(
                result,
                &candidate.result,
                url,
                &candidate.comparable_url,
                relevance,
                candidate.topic_relevance,
            );
            if self.is_duplicate(&scores) {
                debug!(
                    seed = %result.title,
                    duplicate = %candidate.result.title,
                    title = scores.title,
                    content = scores.content,
                    url = scores.url,
                    overall = scores.overall,
                    "Duplicate detected"
                );
                grouped[other] = true;
                members.push(other);
                similarities.push(scores.overall);
            }
        }

        members.len() > before
    }

    fn comparable_url(&self, url: &str) -> String {
        if self.config.url_normalization {
            normalize_url(url)
        } else {
            url.to_string()
        }
    }

    fn consolidate(
        &self,
        candidates: &[Candidate],
        members: &[usize],
        similarities: &[f64],
    ) -> (SearchResult, DuplicateGroup) {
        let primary = if self.config.preserve_best_quality {
            // First member wins ties.
            members
                .iter()
                .copied()
                .fold(members[0], |best, i| {
                    if candidates[i].quality > candidates[best].quality {
                        i
                    } else {
                        best
                    }
                })
        } else {
            members[0]
        };

        let qualities = members.iter().map(|&i| candidates[i].quality);
        let spread = qualities.clone().fold(f64::MIN, f64::max) - qualities.fold(f64::MAX, f64::min);

        let strategy = if spread < MERGE_QUALITY_SPREAD {
            ConsolidationStrategy::Merge
        } else if self.config.preserve_best_quality {
            ConsolidationStrategy::KeepBest
        } else {
            ConsolidationStrategy::KeepFirst
        };

        let duplicates: Vec<SearchResult> = members
            .iter()
            .filter(|&&i| i != primary)
            .map(|&i| candidates[i].result.clone())
            .collect();

        let consolidated = match strategy {
            ConsolidationStrategy::Merge => Self::merge(&candidates[primary].result, members, candidates),
            ConsolidationStrategy::KeepBest | ConsolidationStrategy::KeepFirst => {
                candidates[primary].result.clone()
            }
        };

        let group = DuplicateGroup {
            primary_result: candidates[primary].result.clone(),
            duplicates,
            similarity_score: similarities.iter().sum::<f64>() / similarities.len() as f64,
            consolidation_strategy: strategy,
        };

        (consolidated, group)
    }

    fn merge(primary: &SearchResult, members: &[usize], candidates: &[Candidate]) -> SearchResult {
        let mut merged = primary.clone();

        if let Some(longest) = members
            .iter()
            .map(|&i| &candidates[i].result.snippet)
            .max_by_key(|s| s.chars().count())
        {
            merged.snippet = longest.clone();
        }

        merged.relevance_score = members
            .iter()
            .map(|&i| candidates[i].result.relevance_score)
            .sum::<f64>()
            / members.len() as f64;

        let absorbed: Vec<Value> = members
            .iter()
            .map(|&i| &candidates[i].result)
            .filter(|r| !std::ptr::eq(*r, primary))
            .map(|r| {
                json!({
                    "title": r.title,
                    "url": r.url,
                    "source": r.source,
                    "agent": r.metadata_str(SOURCE_AGENT_KEY),
                })
            })
            .collect();
        merged
            .metadata
            .insert(MERGED_FROM_KEY.to_string(), Value::Array(absorbed));

        merged
    }

    /// Redistribute deduplicated hits back to the agents that produced them.
    ///
    /// Each input result keeps its summary and status; its hits become the
    /// surviving results stamped with its agent. If an agent name appears
    /// more than once, the first occurrence receives the hits.
    pub fn apply_deduplication(
        &self,
        results: &[ResearchResult],
        dedup: &DeduplicationResult,
    ) -> Vec<ResearchResult> {
        let mut by_agent: HashMap<&str, Vec<SearchResult>> = HashMap::new();
        for hit in &dedup.deduplicated_results {
            if let Some(agent) = hit.metadata_str(SOURCE_AGENT_KEY) {
                by_agent.entry(agent).or_default().push(hit.clone());
            }
        }

        results
            .iter()
            .map(|research| {
                let mut research = research.clone();
                research.results = by_agent.remove(research.agent.as_str()).unwrap_or_default();
                research
            })
            .collect()
    }
}
