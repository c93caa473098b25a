//! Content synthesis.
//!
//! Builds one prompt from the deduplicated results, asks a [`TextGenerator`]
//! for a structured answer and scores the result set with keyword bias
//! heuristics and a factuality estimate. Generation failures and unparseable
//! output fall back to a templated answer built from the results themselves.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agents::{AgentCategory, ResearchResult, SearchResult};
use crate::attribution::content_type;
use crate::config::SynthesisConfig;
use crate::dedup::SOURCE_AGENT_KEY;
use crate::error::LlmResult;
use crate::prompts::{SYNTHESIS_RESULTS_HEADING, SYNTHESIS_SUMMARIES_HEADING, SYNTHESIS_SYSTEM_PROMPT};

/// Share of results from one source above which the set counts as concentrated.
const SOURCE_CONCENTRATION_LIMIT: f64 = 0.6;
const SNIPPET_PROMPT_CHARS: usize = 400;

const PROMOTIONAL_WORDS: &[&str] = &["best", "ultimate", "revolutionary", "guaranteed", "unbeatable", "leading"];
const SENSATIONAL_WORDS: &[&str] = &["shocking", "amazing", "unbelievable", "incredible", "outrageous", "terrible"];
const ABSOLUTE_WORDS: &[&str] = &["always", "never", "everyone", "nobody", "definitely", "undeniably"];

/// Black-box text generation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
    ) -> LlmResult<String>;
}

/// Structured answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisContent {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub perspectives: Vec<String>,
    #[serde(default)]
    pub factual_highlights: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    Promotional,
    Sensational,
    Absolute,
    SourceConcentration,
}

/// One detected bias signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasIndicator {
    pub kind: BiasKind,
    /// Matching results (or, for concentration, results from the dominant source)
    pub occurrences: usize,
    pub description: String,
}

/// Final synthesised answer for a topic.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisResult {
    pub topic: String,
    pub content: SynthesisContent,
    pub bias_indicators: Vec<BiasIndicator>,
    pub factuality_score: f64,
    pub confidence: f64,
    pub source_count: usize,
    /// True when the templated fallback was used instead of generated text
    pub fallback: bool,
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Pull the JSON object out of a model reply that may be fenced or chatty.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model reply into structured content.
pub fn parse_content(text: &str) -> Option<SynthesisContent> {
    let json = extract_json(text)?;
    let content: SynthesisContent = serde_json::from_str(json).ok()?;
    (!content.summary.trim().is_empty()).then_some(content)
}

/// Keyword and concentration bias signals over all hits.
pub fn detect_bias(results: &[&SearchResult]) -> Vec<BiasIndicator> {
    let mut indicators = Vec::new();

    for (kind, vocabulary, label) in [
        (BiasKind::Promotional, PROMOTIONAL_WORDS, "promotional language"),
        (BiasKind::Sensational, SENSATIONAL_WORDS, "sensational language"),
        (BiasKind::Absolute, ABSOLUTE_WORDS, "absolute claims"),
    ] {
        let occurrences = results
            .iter()
            .filter(|r| {
                words(&r.title)
                    .chain(words(&r.snippet))
                    .any(|w| vocabulary.contains(&w.as_str()))
            })
            .count();
        if occurrences > 0 {
            indicators.push(BiasIndicator {
                kind,
                occurrences,
                description: format!("{} result(s) use {}", occurrences, label),
            });
        }
    }

    if results.len() > 1 {
        let mut per_source: HashMap<&str, usize> = HashMap::new();
        for result in results {
            *per_source.entry(result.source.as_str()).or_default() += 1;
        }
        if let Some((source, count)) = per_source.into_iter().max_by_key(|(_, c)| *c) {
            if count as f64 / results.len() as f64 > SOURCE_CONCENTRATION_LIMIT {
                indicators.push(BiasIndicator {
                    kind: BiasKind::SourceConcentration,
                    occurrences: count,
                    description: format!(
                        "{} of {} results come from {}",
                        count,
                        results.len(),
                        source
                    ),
                });
            }
        }
    }

    indicators
}

/// Factuality estimate from source mix and bias signals.
pub fn factuality_score(results: &[&SearchResult], bias: &[BiasIndicator]) -> f64 {
    let has_academic = results.iter().any(|r| {
        r.metadata_str(SOURCE_AGENT_KEY)
            .map(|agent| AgentCategory::from_name(agent) == AgentCategory::Academic)
            .unwrap_or(false)
            || content_type(r) == Some("academic")
    });
    let distinct_sources: BTreeSet<&str> = results.iter().map(|r| r.source.as_str()).collect();
    let bias_kinds: BTreeSet<BiasKind> = bias.iter().map(|b| b.kind).collect();

    let mut score = 0.5;
    if has_academic {
        score += 0.2;
    }
    score += (0.1 * distinct_sources.len().saturating_sub(1) as f64).min(0.3);
    score -= 0.05 * bias_kinds.len() as f64;
    score.clamp(0.0, 1.0)
}

/// `success_rate * 0.4 + average_relevance * 0.6`.
pub fn confidence_score(results: &[ResearchResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let success_rate =
        results.iter().filter(|r| r.is_success()).count() as f64 / results.len() as f64;
    let hits: Vec<f64> = results
        .iter()
        .flat_map(|r| r.results.iter().map(|h| h.relevance_score))
        .collect();
    let average_relevance = if hits.is_empty() {
        0.0
    } else {
        hits.iter().sum::<f64>() / hits.len() as f64
    };
    success_rate * 0.4 + average_relevance * 0.6
}

/// Turns research results into one answer.
#[derive(Clone, Default)]
pub struct SynthesisEngine {
    generator: Option<Arc<dyn TextGenerator>>,
    config: SynthesisConfig,
}

impl SynthesisEngine {
    /// Engine that calls `generator`; `None` always uses the templated answer.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: SynthesisConfig) -> Self {
        Self { generator, config }
    }

    /// The user prompt for `topic`: top results by relevance plus agent summaries.
    pub fn build_prompt(&self, topic: &str, results: &[ResearchResult]) -> String {
        let mut hits: Vec<&SearchResult> = results.iter().flat_map(|r| r.results.iter()).collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(self.config.max_prompt_results);

        let mut prompt = format!("Topic: {}\n\n{}:\n", topic, SYNTHESIS_RESULTS_HEADING);
        for (i, hit) in hits.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "[{}] {} ({}) {}\n    {}",
                i + 1,
                hit.title,
                hit.source,
                hit.url,
                truncate(&hit.snippet, SNIPPET_PROMPT_CHARS)
            );
        }

        let summaries: Vec<_> = results
            .iter()
            .filter_map(|r| r.summary.as_ref().map(|s| (r.agent.as_str(), s)))
            .collect();
        if !summaries.is_empty() {
            let _ = write!(prompt, "\n{}:\n", SYNTHESIS_SUMMARIES_HEADING);
            for (agent, summary) in summaries {
                let _ = writeln!(prompt, "- {}: {}", agent, summary);
            }
        }

        prompt
    }

    /// Answer built from the results alone.
    pub fn fallback_content(&self, topic: &str, results: &[ResearchResult]) -> SynthesisContent {
        let mut hits: Vec<&SearchResult> = results.iter().flat_map(|r| r.results.iter()).collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        let contributing: BTreeSet<&str> = results
            .iter()
            .filter(|r| !r.results.is_empty())
            .map(|r| r.agent.as_str())
            .collect();

        let mut summary = format!(
            "Research on \"{}\" gathered {} result(s) from {} agent(s).",
            topic,
            hits.len(),
            contributing.len()
        );
        for agent_summary in results.iter().filter_map(|r| r.summary.as_deref()) {
            summary.push(' ');
            summary.push_str(agent_summary);
        }

        let perspectives = contributing
            .iter()
            .map(|agent| {
                let titles: Vec<&str> = results
                    .iter()
                    .filter(|r| r.agent == *agent)
                    .flat_map(|r| r.results.iter().take(2).map(|h| h.title.as_str()))
                    .collect();
                format!(
                    "{} sources: {}",
                    AgentCategory::from_name(agent),
                    titles.join("; ")
                )
            })
            .collect();

        SynthesisContent {
            summary,
            key_points: hits.iter().take(5).map(|h| h.title.clone()).collect(),
            perspectives,
            factual_highlights: hits
                .iter()
                .take(3)
                .map(|h| format!("{} ({})", truncate(&h.snippet, 200), h.source))
                .collect(),
        }
    }

    /// Synthesise `results` for `topic`. Never fails.
    pub async fn synthesize(&self, topic: &str, results: &[ResearchResult]) -> SynthesisResult {
        let hits: Vec<&SearchResult> = results.iter().flat_map(|r| r.results.iter()).collect();
        let bias_indicators = detect_bias(&hits);
        let factuality = factuality_score(&hits, &bias_indicators);
        let confidence = confidence_score(results);
        let source_count = hits
            .iter()
            .map(|h| h.source.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let generated = match &self.generator {
            Some(generator) if !hits.is_empty() => {
                let prompt = self.build_prompt(topic, results);
                debug!(topic = %topic, prompt_chars = prompt.len(), "Requesting synthesis");
                match generator
                    .generate(SYNTHESIS_SYSTEM_PROMPT, &prompt, self.config.temperature)
                    .await
                {
                    Ok(text) => {
                        let parsed = parse_content(&text);
                        if parsed.is_none() {
                            warn!(topic = %topic, "Synthesis reply was not valid JSON, using fallback");
                        }
                        parsed
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Synthesis generation failed, using fallback");
                        None
                    }
                }
            }
            _ => None,
        };

        let fallback = generated.is_none();
        let content = generated.unwrap_or_else(|| self.fallback_content(topic, results));

        info!(
            topic = %topic,
            fallback,
            confidence,
            factuality,
            bias_indicators = bias_indicators.len(),
            "Synthesis complete"
        );

        SynthesisResult {
            topic: topic.to_string(),
            content,
            bias_indicators,
            factuality_score: factuality,
            confidence,
            source_count,
            fallback,
        }
    }
}

impl std::fmt::Debug for SynthesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("generator", &self.generator.is_some())
            .field("config", &self.config)
            .finish()
    }
}
