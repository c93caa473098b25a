//! Source attribution: who contributed what to the final result set.
//!
//! Pure reporting over the raw agent results and the deduplication outcome.
//! Nothing here feeds back into orchestration.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::agents::{AgentCategory, ResearchResult, SearchResult};
use crate::dedup::{DeduplicationEngine, DeduplicationResult, AGENT_WEIGHT_KEY, SOURCE_AGENT_KEY};
use crate::similarity::url_identity;

/// Content kinds a well-rounded result set is expected to contain.
const EXPECTED_CONTENT_TYPES: [&str; 5] = ["academic", "tutorial", "documentation", "video", "discussion"];
/// Entries kept in the most-duplicated list.
const MOST_DUPLICATED_LIMIT: usize = 5;

/// Sub-scores describing one agent's usefulness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceScores {
    /// Share of the agent's hits that survived deduplication
    pub uniqueness: f64,
    /// Mean quality score of the agent's hits
    pub quality: f64,
    /// 1.0 for the first agent to finish, decreasing with completion rank
    pub speed: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentContribution {
    pub agent: String,
    pub category: AgentCategory,
    pub total_results: usize,
    pub unique_results: usize,
    pub duplicate_results: usize,
    pub average_quality: f64,
    pub average_relevance: f64,
    pub performance: PerformanceScores,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineContribution {
    pub engine: String,
    pub total_results: usize,
    pub unique_results: usize,
    pub average_relevance: f64,
}

/// Histogram of result quality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    /// quality >= 0.8
    pub excellent: usize,
    /// quality >= 0.6
    pub good: usize,
    /// quality >= 0.4
    pub fair: usize,
    pub poor: usize,
}

impl QualityDistribution {
    fn record(&mut self, quality: f64) {
        if quality >= 0.8 {
            self.excellent += 1;
        } else if quality >= 0.6 {
            self.good += 1;
        } else if quality >= 0.4 {
            self.fair += 1;
        } else {
            self.poor += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageAnalysis {
    pub agent_types_present: Vec<String>,
    pub missing_agent_types: Vec<String>,
    pub content_types_present: Vec<String>,
    pub missing_content_types: Vec<String>,
    /// Share of expected agent and content types that are present
    pub coverage_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicatedContent {
    pub title: String,
    pub occurrences: usize,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineOverlap {
    pub engine_a: String,
    pub engine_b: String,
    /// Jaccard overlap of the two engines' normalised URLs
    pub overlap_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedundancyAnalysis {
    pub duplicate_rate: f64,
    pub most_duplicated: Vec<DuplicatedContent>,
    /// Duplicate groups spanning more than one agent
    pub cross_agent_duplicates: usize,
    pub engine_overlap: Vec<EngineOverlap>,
}

/// Full attribution report for one session.
#[derive(Debug, Clone, Serialize)]
pub struct AttributionReport {
    pub topic: String,
    pub original_count: usize,
    pub aggregated_count: usize,
    pub agents: Vec<AgentContribution>,
    pub engines: Vec<EngineContribution>,
    pub quality_distribution: QualityDistribution,
    pub coverage: CoverageAnalysis,
    pub redundancy: RedundancyAnalysis,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn agent_of(result: &SearchResult) -> Option<&str> {
    result.metadata_str(SOURCE_AGENT_KEY)
}

/// Best-effort content classification from metadata, URL and title.
pub fn content_type(result: &SearchResult) -> Option<&'static str> {
    if let Some(declared) = result.metadata_str("type") {
        let declared = declared.to_lowercase();
        if let Some(known) = EXPECTED_CONTENT_TYPES.iter().find(|t| **t == declared) {
            return Some(*known);
        }
    }

    let text = format!("{} {}", result.url, result.title).to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["arxiv", "doi.org", ".edu", "scholar", "paper", "journal"]) {
        Some("academic")
    } else if has(&["youtube", "vimeo", "video"]) {
        Some("video")
    } else if has(&["reddit", "stackoverflow", "forum", "discussion", "news.ycombinator"]) {
        Some("discussion")
    } else if has(&["docs.", "/docs", "documentation", "reference", "manual"]) {
        Some("documentation")
    } else if has(&["tutorial", "guide", "how to", "learn", "introduction"]) {
        Some("tutorial")
    } else {
        None
    }
}

/// Computes attribution reports.
#[derive(Debug, Clone, Default)]
pub struct SourceAttributionAnalyzer {
    weights: DeduplicationEngine,
}

impl SourceAttributionAnalyzer {
    /// Analyzer that weights agents like `engine` does.
    pub fn new(engine: DeduplicationEngine) -> Self {
        Self { weights: engine }
    }

    fn quality(&self, result: &SearchResult, agent: &str) -> f64 {
        let weight = result
            .metadata
            .get(AGENT_WEIGHT_KEY)
            .and_then(|v| v.as_f64())
            .unwrap_or_else(|| self.weights.agent_weight(agent));
        DeduplicationEngine::quality_score(result, weight)
    }

    /// Build the report for `original` agent results and their deduplication.
    pub fn analyze(
        &self,
        original: &[ResearchResult],
        aggregated: &DeduplicationResult,
        topic: &str,
    ) -> AttributionReport {
        AttributionReport {
            topic: topic.to_string(),
            original_count: original.iter().map(|r| r.results.len()).sum(),
            aggregated_count: aggregated.deduplicated_results.len(),
            agents: self.agent_contributions(original, aggregated),
            engines: self.engine_contributions(original, aggregated),
            quality_distribution: self.quality_distribution(aggregated),
            coverage: self.coverage(original, aggregated),
            redundancy: self.redundancy(original, aggregated),
        }
    }

    /// Per-agent contribution, sorted by overall performance (best first).
    pub fn agent_contributions(
        &self,
        original: &[ResearchResult],
        aggregated: &DeduplicationResult,
    ) -> Vec<AgentContribution> {
        let mut survivors: HashMap<&str, usize> = HashMap::new();
        for result in &aggregated.deduplicated_results {
            if let Some(agent) = agent_of(result) {
                *survivors.entry(agent).or_default() += 1;
            }
        }

        let mut finish_order: Vec<&ResearchResult> =
            original.iter().filter(|r| r.is_success()).collect();
        finish_order.sort_by_key(|r| r.timestamp);
        let agent_count = finish_order.len().max(1) as f64;

        // Entries sharing an agent name are reported as one agent.
        let mut by_agent: Vec<(&str, Vec<&ResearchResult>)> = Vec::new();
        for research in original {
            match by_agent.iter_mut().find(|(name, _)| *name == research.agent) {
                Some((_, entries)) => entries.push(research),
                None => by_agent.push((research.agent.as_str(), vec![research])),
            }
        }

        let mut contributions: Vec<AgentContribution> = by_agent
            .into_iter()
            .map(|(agent, entries)| {
                let hits: Vec<&SearchResult> =
                    entries.iter().flat_map(|r| r.results.iter()).collect();
                let total = hits.len();
                let unique = survivors.get(agent).copied().unwrap_or(0).min(total);
                let average_quality = mean(hits.iter().map(|r| self.quality(r, agent)));
                let uniqueness = if total == 0 {
                    0.0
                } else {
                    unique as f64 / total as f64
                };
                let speed = finish_order
                    .iter()
                    .position(|r| entries.iter().any(|e| std::ptr::eq(*r, *e)))
                    .map(|rank| 1.0 - rank as f64 / agent_count)
                    .unwrap_or(0.0);

                AgentContribution {
                    agent: agent.to_string(),
                    category: AgentCategory::from_name(agent),
                    total_results: total,
                    unique_results: unique,
                    duplicate_results: total - unique,
                    average_quality,
                    average_relevance: mean(hits.iter().map(|r| r.relevance_score)),
                    performance: PerformanceScores {
                        uniqueness,
                        quality: average_quality,
                        speed,
                        overall: 0.4 * uniqueness + 0.4 * average_quality + 0.2 * speed,
                    },
                }
            })
            .collect();

        contributions.sort_by(|a, b| b.performance.overall.total_cmp(&a.performance.overall));
        contributions
    }

    /// Per-engine (the `source` field) contribution, sorted by name.
    pub fn engine_contributions(
        &self,
        original: &[ResearchResult],
        aggregated: &DeduplicationResult,
    ) -> Vec<EngineContribution> {
        let mut engines: BTreeMap<&str, (usize, usize, f64)> = BTreeMap::new();
        for hit in original.iter().flat_map(|r| r.results.iter()) {
            let entry = engines.entry(hit.source.as_str()).or_default();
            entry.0 += 1;
            entry.2 += hit.relevance_score;
        }
        for hit in &aggregated.deduplicated_results {
            if let Some(entry) = engines.get_mut(hit.source.as_str()) {
                entry.1 += 1;
            }
        }

        engines
            .into_iter()
            .map(|(engine, (total, unique, relevance))| EngineContribution {
                engine: engine.to_string(),
                total_results: total,
                unique_results: unique.min(total),
                average_relevance: if total == 0 { 0.0 } else { relevance / total as f64 },
            })
            .collect()
    }

    pub fn quality_distribution(&self, aggregated: &DeduplicationResult) -> QualityDistribution {
        let mut distribution = QualityDistribution::default();
        for result in &aggregated.deduplicated_results {
            let agent = agent_of(result).unwrap_or(result.source.as_str());
            distribution.record(self.quality(result, agent));
        }
        distribution
    }

    /// Which agent categories and content types are represented.
    pub fn coverage(
        &self,
        original: &[ResearchResult],
        aggregated: &DeduplicationResult,
    ) -> CoverageAnalysis {
        let agent_types: BTreeSet<AgentCategory> = original
            .iter()
            .filter(|r| r.is_success() && !r.results.is_empty())
            .map(|r| AgentCategory::from_name(&r.agent))
            .collect();
        let content_types: BTreeSet<&str> = aggregated
            .deduplicated_results
            .iter()
            .filter_map(content_type)
            .collect();

        let missing_agent_types: Vec<String> = AgentCategory::RANKED
            .iter()
            .filter(|c| !agent_types.contains(*c))
            .map(|c| c.as_str().to_string())
            .collect();
        let missing_content_types: Vec<String> = EXPECTED_CONTENT_TYPES
            .iter()
            .filter(|t| !content_types.contains(*t))
            .map(|t| t.to_string())
            .collect();

        let expected = AgentCategory::RANKED.len() + EXPECTED_CONTENT_TYPES.len();
        let missing = missing_agent_types.len() + missing_content_types.len();

        CoverageAnalysis {
            agent_types_present: agent_types.iter().map(|c| c.as_str().to_string()).collect(),
            missing_agent_types,
            content_types_present: content_types.iter().map(|t| t.to_string()).collect(),
            missing_content_types,
            coverage_score: (expected - missing) as f64 / expected as f64,
        }
    }

    /// Duplicate rate, most duplicated content and engine overlap.
    pub fn redundancy(
        &self,
        original: &[ResearchResult],
        aggregated: &DeduplicationResult,
    ) -> RedundancyAnalysis {
        let duplicate_rate = if aggregated.original_count == 0 {
            0.0
        } else {
            aggregated.duplicates_removed as f64 / aggregated.original_count as f64
        };

        let group_agents = |primary: &SearchResult, duplicates: &[SearchResult]| -> Vec<String> {
            std::iter::once(primary)
                .chain(duplicates.iter())
                .filter_map(agent_of)
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        let mut most_duplicated: Vec<DuplicatedContent> = aggregated
            .duplicate_groups
            .iter()
            .map(|group| DuplicatedContent {
                title: group.primary_result.title.clone(),
                occurrences: group.size(),
                agents: group_agents(&group.primary_result, &group.duplicates),
            })
            .collect();
        let cross_agent_duplicates = most_duplicated.iter().filter(|d| d.agents.len() > 1).count();
        most_duplicated.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        most_duplicated.truncate(MOST_DUPLICATED_LIMIT);

        let mut urls_by_engine: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for hit in original.iter().flat_map(|r| r.results.iter()) {
            urls_by_engine
                .entry(hit.source.as_str())
                .or_default()
                .insert(url_identity(&hit.url));
        }
        let engines: Vec<_> = urls_by_engine.iter().collect();
        let mut engine_overlap = Vec::new();
        for (i, (engine_a, urls_a)) in engines.iter().enumerate() {
            for (engine_b, urls_b) in engines.iter().skip(i + 1) {
                let union = urls_a.union(urls_b).count();
                let overlap_rate = if union == 0 {
                    0.0
                } else {
                    urls_a.intersection(urls_b).count() as f64 / union as f64
                };
                engine_overlap.push(EngineOverlap {
                    engine_a: engine_a.to_string(),
                    engine_b: engine_b.to_string(),
                    overlap_rate,
                });
            }
        }

        RedundancyAnalysis {
            duplicate_rate,
            most_duplicated,
            cross_agent_duplicates,
            engine_overlap,
        }
    }
}
