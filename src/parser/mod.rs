//! Query Spec Parser
//!
//! Turns a free-text analytical question into a [`QuerySpec`] with a
//! confidence per resolved field. Anything the registry cannot resolve stays
//! unresolved: the parser asks for clarification instead of guessing.

pub mod fuzzy;
pub mod temporal;
pub mod text;

use crate::error::{Nl2SqlError, Result};
use crate::query_spec::{ComparisonMode, QuerySpec, RankOrder};
use crate::registry::Registry;
use fuzzy::FuzzyMatcher;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use temporal::TemporalAnchor;
use text::{normalize, raw_words, tokenize};
use tracing::debug;

lazy_static! {
    static ref TOP_N_RE: Regex = Regex::new(
        r"\b(?:top\s*(\d{1,3})|(?:los|las|primeros|primeras)\s+(\d{1,3})\s+(?:mejores|peores|mayores|menores|bancos|primeros)|(\d{1,3})\s+(?:mejores|peores|mayores|menores))\b"
    )
    .expect("valid top-n pattern");
}

const RANKING_CUES: &[&str] = &["ranking", "top", "clasificacion", "mejores", "peores", "mayores", "menores", "lideres"];
const COMPARE_CUES: &[&str] = &[
    "compara", "comparar", "comparalo", "comparala", "comparacion", "comparativo", "vs", "versus",
    "contra", "frente", "tambien", "agrega", "agregale", "anade",
];

/// Words that are never metric or bank names, even when typed in capitals
const STOPWORDS: &[&str] = &[
    "a", "al", "con", "cual", "cuales", "dame", "de", "del", "desde", "durante", "el", "en", "entre",
    "es", "la", "las", "lo", "los", "me", "mes", "meses", "muestra", "muestrame", "para", "por", "que",
    "un", "una", "y", "ahora", "ano", "anos", "trimestre", "ultimo", "ultimos", "ultima", "ultimas",
    "hasta", "ver", "grafica", "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio",
    "agosto", "octubre", "banco", "bancos", "indice", "nivel", "cifra", "cifras", "total",
];

/// Parser settings
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Fuzzy metric matches below this score stay unresolved
    pub metric_threshold: f64,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self { metric_threshold: 0.88 }
    }
}

/// Per-invocation inputs that must not be read from ambient state
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub anchor: TemporalAnchor,
    /// Spec from the previous turn, passed explicitly by the caller
    pub prior: Option<QuerySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub metric: f64,
    pub banks: f64,
    pub time_range: f64,
    pub dimension_filters: f64,
    pub comparison_mode: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub spec: QuerySpec,
    pub confidence: FieldConfidence,
}

/// Terminal, non-error request for disambiguating input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub reason: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Resolved(ParsedQuery),
    Clarification(ClarificationRequest),
}

/// Alias expressed as normalized tokens, pointing at a registry entry
struct AliasEntry {
    tokens: Vec<String>,
    index: usize,
}

/// Build an alias index sorted longest-first. The sort is stable, so among
/// aliases of equal length the earlier registry entry is tried first.
fn alias_index<'a>(entries: impl Iterator<Item = (usize, &'a str)>) -> Vec<AliasEntry> {
    let mut index: Vec<AliasEntry> = entries
        .map(|(index, form)| AliasEntry {
            tokens: tokenize(&normalize(form)),
            index,
        })
        .filter(|e| !e.tokens.is_empty())
        .collect();
    index.sort_by(|a, b| b.tokens.len().cmp(&a.tokens.len()));
    index
}

pub struct QuerySpecParser {
    registry: Arc<Registry>,
    options: ParserOptions,
    matcher: FuzzyMatcher,
    bank_aliases: Vec<AliasEntry>,
    metric_aliases: Vec<AliasEntry>,
    filter_aliases: Vec<AliasEntry>,
    unsupported_aliases: Vec<AliasEntry>,
}

impl QuerySpecParser {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_options(registry, ParserOptions::default())
    }

    pub fn with_options(registry: Arc<Registry>, options: ParserOptions) -> Self {
        let bank_aliases = alias_index(
            registry
                .banks
                .iter()
                .enumerate()
                .flat_map(|(i, b)| b.surface_forms().map(move |f| (i, f))),
        );
        let metric_aliases = alias_index(
            registry
                .metrics
                .iter()
                .enumerate()
                .flat_map(|(i, m)| m.surface_forms().map(move |f| (i, f))),
        );
        let filter_aliases = alias_index(
            registry
                .filters
                .iter()
                .enumerate()
                .flat_map(|(i, f)| f.surface_forms().map(move |s| (i, s))),
        );
        let unsupported_aliases = alias_index(
            registry
                .unsupported_terms
                .iter()
                .enumerate()
                .map(|(i, t)| (i, t.as_str())),
        );

        Self {
            matcher: FuzzyMatcher::new(options.metric_threshold),
            registry,
            options,
            bank_aliases,
            metric_aliases,
            filter_aliases,
            unsupported_aliases,
        }
    }

    /// Parse raw text. `UnsupportedMetric` / `UnsupportedBank` come back as
    /// errors; missing information comes back as a clarification outcome.
    pub fn parse(&self, query_text: &str, ctx: &ParseContext) -> Result<ParseOutcome> {
        let normalized = normalize(query_text);
        if normalized.is_empty() {
            return Ok(ParseOutcome::Clarification(self.clarify(
                "La consulta está vacía.",
                Vec::new(),
            )));
        }

        let tokens = tokenize(&normalized);
        let mut consumed = vec![false; tokens.len()];
        let token_set: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();

        let banks: Vec<String> = scan_aliases(&tokens, &mut consumed, &self.bank_aliases)
            .into_iter()
            .map(|i| self.registry.banks[i].id.clone())
            .collect();

        let (metric, metric_confidence) = self.resolve_metric(&tokens, &mut consumed);

        let filters: Vec<String> = scan_aliases(&tokens, &mut consumed, &self.filter_aliases)
            .into_iter()
            .map(|i| self.registry.filters[i].id.clone())
            .collect();

        let temporal = temporal::resolve(&normalized, &ctx.anchor);

        let ranking_cue = RANKING_CUES.iter().any(|c| token_set.contains(c));
        let compare_cue = COMPARE_CUES.iter().any(|c| token_set.contains(c));
        let top_n = extract_top_n(&normalized);

        // An unsupported term in a follow-up is reported, never replaced by the prior field
        if ctx.prior.is_some() {
            if metric.is_none() {
                if let Some(requested) = self.known_unsupported_term(&tokens, &consumed) {
                    return Err(Nl2SqlError::UnsupportedMetric {
                        requested,
                        supported: self.registry.supported_metric_codes(),
                    });
                }
            }
            if banks.is_empty() {
                if let Some(requested) = self.unknown_acronym(query_text) {
                    return Err(Nl2SqlError::UnsupportedBank {
                        requested,
                        supported: self.registry.supported_bank_ids(),
                    });
                }
            }
        }

        // Follow-up merge: fields from this turn win, the rest carry over
        let prior = ctx.prior.as_ref();
        let metric = metric.or_else(|| prior.and_then(|p| p.metric.clone()));
        let metric_confidence = if metric_confidence == 0.0 && metric.is_some() {
            0.9
        } else {
            metric_confidence
        };

        let banks = match prior {
            Some(p) if banks.is_empty() => p.banks.clone(),
            Some(p) if compare_cue => {
                let mut merged = p.banks.clone();
                for bank in banks {
                    if !merged.contains(&bank) {
                        merged.push(bank);
                    }
                }
                merged
            }
            _ => banks,
        };

        let time_range = match prior {
            Some(p) if !temporal.explicit => p.time_range,
            _ => temporal.range,
        };
        let dimension_filters = match prior {
            Some(p) if filters.is_empty() => p.dimension_filters.clone(),
            _ => filters,
        };

        let comparison_mode = if ranking_cue || top_n.is_some() {
            ComparisonMode::Ranking
        } else if compare_cue || banks.len() >= 2 {
            ComparisonMode::Compare
        } else {
            match prior {
                Some(p) if p.comparison_mode == ComparisonMode::Ranking && banks.is_empty() => {
                    ComparisonMode::Ranking
                }
                _ => ComparisonMode::Single,
            }
        };

        let higher_is_worse = metric
            .as_deref()
            .and_then(|code| self.registry.metric(code))
            .map(|m| m.higher_is_worse)
            .unwrap_or(false);
        let rank_order = rank_order(&token_set, &normalized, higher_is_worse);

        debug!(
            metric = ?metric,
            banks = ?banks,
            mode = %comparison_mode,
            time_rule = temporal.rule,
            "Parsed query"
        );

        // Resolution checks, most specific outcome first
        if metric.is_none() && banks.is_empty() && comparison_mode != ComparisonMode::Ranking {
            return Ok(ParseOutcome::Clarification(self.clarify(
                "No identifiqué la métrica ni el banco de la consulta.",
                Vec::new(),
            )));
        }

        let metric = match metric {
            Some(m) => m,
            None => {
                if let Some(requested) = self.unsupported_metric_term(query_text, &tokens, &consumed) {
                    return Err(Nl2SqlError::UnsupportedMetric {
                        requested,
                        supported: self.registry.supported_metric_codes(),
                    });
                }
                let options = self
                    .registry
                    .metrics
                    .iter()
                    .map(|m| format!("{} ({})", m.code, m.display_name))
                    .collect();
                return Ok(ParseOutcome::Clarification(
                    self.clarify("¿Qué métrica te interesa?", options),
                ));
            }
        };

        if banks.is_empty() && comparison_mode != ComparisonMode::Ranking {
            if let Some(requested) = self.unknown_acronym(query_text) {
                return Err(Nl2SqlError::UnsupportedBank {
                    requested,
                    supported: self.registry.supported_bank_ids(),
                });
            }
            let options = self
                .registry
                .banks
                .iter()
                .map(|b| format!("{} de {}", metric, b.display_name))
                .collect();
            return Ok(ParseOutcome::Clarification(
                self.clarify("¿De qué banco quieres ver la métrica?", options),
            ));
        }

        if !dimension_filters.is_empty() {
            let segmented = self.registry.metric(&metric).map(|m| m.segmented).unwrap_or(false);
            if !segmented {
                return Ok(ParseOutcome::Clarification(self.clarify(
                    &format!("{} no se publica por segmento de crédito.", metric),
                    vec![format!("{} de {} sin filtro de segmento", metric, banks.join(", "))],
                )));
            }
        }

        let spec = QuerySpec {
            metric: Some(metric),
            banks,
            time_range,
            dimension_filters,
            comparison_mode,
            top_n: if comparison_mode == ComparisonMode::Ranking { top_n } else { None },
            rank_order,
        };

        let confidence = FieldConfidence {
            metric: metric_confidence,
            banks: if spec.banks.is_empty() { 0.0 } else { 1.0 },
            time_range: if temporal.explicit { 1.0 } else { 0.5 },
            dimension_filters: 1.0,
            comparison_mode: if ranking_cue || compare_cue { 1.0 } else { 0.8 },
        };

        Ok(ParseOutcome::Resolved(ParsedQuery { spec, confidence }))
    }

    /// Exact alias match first, then fuzzy over the words left unconsumed
    fn resolve_metric(&self, tokens: &[String], consumed: &mut [bool]) -> (Option<String>, f64) {
        if let Some(&idx) = scan_aliases(tokens, consumed, &self.metric_aliases).first() {
            return (Some(self.registry.metrics[idx].code.clone()), 1.0);
        }

        let candidates: Vec<(usize, &str)> = self
            .registry
            .metrics
            .iter()
            .enumerate()
            .flat_map(|(i, m)| m.surface_forms().map(move |f| (i, f)))
            .collect();

        let mut best: Option<(usize, usize, f64)> = None;
        for (pos, token) in tokens.iter().enumerate() {
            if consumed[pos] || STOPWORDS.contains(&token.as_str()) || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Some((idx, score)) = self.matcher.find_best_match(token, candidates.iter().copied()) {
                if best.map(|(_, _, s)| score > s).unwrap_or(true) {
                    best = Some((pos, idx, score));
                }
            }
        }

        match best {
            Some((pos, idx, score)) if score >= self.options.metric_threshold => {
                consumed[pos] = true;
                (Some(self.registry.metrics[idx].code.clone()), score)
            }
            _ => (None, 0.0),
        }
    }

    /// A known-but-unsupported financial term, or a capitalised acronym that
    /// resolves to nothing in the registry
    fn unsupported_metric_term(&self, raw: &str, tokens: &[String], consumed: &[bool]) -> Option<String> {
        self.known_unsupported_term(tokens, consumed)
            .or_else(|| self.unknown_acronym(raw))
    }

    /// A registry term such as ROE that is recognised but not served
    fn known_unsupported_term(&self, tokens: &[String], consumed: &[bool]) -> Option<String> {
        let mut scratch = consumed.to_vec();
        scan_aliases(tokens, &mut scratch, &self.unsupported_aliases)
            .first()
            .map(|&idx| self.registry.unsupported_terms[idx].to_uppercase())
    }

    fn unknown_acronym(&self, raw: &str) -> Option<String> {
        raw_words(raw)
            .into_iter()
            .filter(|w| {
                let len = w.chars().count();
                (2..=8).contains(&len) && w.chars().all(|c| c.is_uppercase())
            })
            .find(|w| {
                let norm = normalize(w);
                !STOPWORDS.contains(&norm.as_str())
                    && !RANKING_CUES.contains(&norm.as_str())
                    && !COMPARE_CUES.contains(&norm.as_str())
                    && self.registry.resolve_bank_alias(w).is_none()
                    && self.registry.resolve_metric_alias(w).is_none()
                    && self.registry.resolve_filter_alias(w).is_none()
            })
            .map(|w| w.to_string())
    }

    fn clarify(&self, reason: &str, mut options: Vec<String>) -> ClarificationRequest {
        if options.is_empty() {
            options = vec![
                "IMOR de INVEX en 2024".to_string(),
                "Compara IMOR de INVEX vs Sistema en 2024".to_string(),
                "Ranking top 5 de ICAP en 2024".to_string(),
                "Cartera vencida automotriz de BBVA en los últimos 6 meses".to_string(),
            ];
        }
        ClarificationRequest {
            reason: reason.to_string(),
            options,
        }
    }
}

/// Greedy left-to-right scan; returns matched registry indices in order of
/// first appearance, without duplicates, and marks matched tokens consumed.
fn scan_aliases(tokens: &[String], consumed: &mut [bool], aliases: &[AliasEntry]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut pos = 0;

    while pos < tokens.len() {
        let hit = aliases.iter().find(|alias| {
            let end = pos + alias.tokens.len();
            end <= tokens.len()
                && !consumed[pos..end].iter().any(|c| *c)
                && tokens[pos..end] == alias.tokens[..]
        });

        match hit {
            Some(alias) => {
                let end = pos + alias.tokens.len();
                consumed[pos..end].iter_mut().for_each(|c| *c = true);
                if !found.contains(&alias.index) {
                    found.push(alias.index);
                }
                pos = end;
            }
            None => pos += 1,
        }
    }

    found
}

fn extract_top_n(normalized: &str) -> Option<u32> {
    let caps = TOP_N_RE.captures(normalized)?;
    (1..=3)
        .filter_map(|i| caps.get(i))
        .find_map(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

fn rank_order(tokens: &HashSet<&str>, normalized: &str, higher_is_worse: bool) -> RankOrder {
    let lowest = tokens.contains("menor")
        || tokens.contains("menores")
        || normalized.contains("mas bajo")
        || normalized.contains("mas baja");
    let highest = tokens.contains("mayor")
        || tokens.contains("mayores")
        || normalized.contains("mas alto")
        || normalized.contains("mas alta");

    if lowest {
        RankOrder::Ascending
    } else if highest {
        RankOrder::Descending
    } else if tokens.contains("mejores") {
        if higher_is_worse { RankOrder::Ascending } else { RankOrder::Descending }
    } else if tokens.contains("peores") {
        if higher_is_worse { RankOrder::Descending } else { RankOrder::Ascending }
    } else {
        RankOrder::Descending
    }
}
