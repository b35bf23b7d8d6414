//! Candidate-to-action matching.
//!
//! Each candidate is tried against the catalog with three strategies in
//! order: exact, fuzzy, synonym. The first hit wins.

use tracing::debug;

use crate::definition::ActionDefinition;
use crate::types::MatchType;

/// At most this many candidates are considered, primary first.
pub const MAX_CANDIDATES: usize = 2;

/// Result of matching a set of candidates against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub action: Option<ActionDefinition>,
    pub match_type: MatchType,
    /// The candidate string that produced the hit.
    pub candidate: Option<String>,
    /// Similarity of the hit; 1.0 for exact and synonym matches.
    pub score: f64,
}

impl MatchOutcome {
    fn hit(action: &ActionDefinition, match_type: MatchType, candidate: &str, score: f64) -> Self {
        Self {
            action: Some(action.clone()),
            match_type,
            candidate: Some(candidate.to_string()),
            score,
        }
    }

    pub fn not_found() -> Self {
        Self {
            action: None,
            match_type: MatchType::NotFound,
            candidate: None,
            score: 0.0,
        }
    }
}

/// Pure, deterministic resolver from free-text candidates to catalog actions.
#[derive(Debug, Clone)]
pub struct ActionMatcher {
    fuzzy_threshold: f64,
}

impl ActionMatcher {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    pub fn resolve(&self, candidates: &[String], actions: &[ActionDefinition]) -> MatchOutcome {
        for candidate in candidates
            .iter()
            .take(MAX_CANDIDATES)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
        {
            if let Some(action) = actions.iter().find(|a| a.canonical_name == candidate) {
                debug!(candidate, action = %action.canonical_name, "Exact match");
                return MatchOutcome::hit(action, MatchType::Exact, candidate, 1.0);
            }

            if let Some((action, score)) = self.best_fuzzy(candidate, actions) {
                debug!(candidate, action = %action.canonical_name, score, "Fuzzy match");
                return MatchOutcome::hit(action, MatchType::Fuzzy, candidate, score);
            }

            let lowered = candidate.to_lowercase();
            if let Some(action) = actions
                .iter()
                .find(|a| a.synonyms.iter().any(|s| s.to_lowercase() == lowered))
            {
                debug!(candidate, action = %action.canonical_name, "Synonym match");
                return MatchOutcome::hit(action, MatchType::Synonym, candidate, 1.0);
            }
        }
        debug!(?candidates, "No action matched");
        MatchOutcome::not_found()
    }

    /// Highest-scoring action at or above the threshold; earlier actions win ties.
    fn best_fuzzy<'a>(
        &self,
        candidate: &str,
        actions: &'a [ActionDefinition],
    ) -> Option<(&'a ActionDefinition, f64)> {
        let lowered = candidate.to_lowercase();
        let mut best: Option<(&ActionDefinition, f64)> = None;
        for action in actions {
            let score =
                strsim::normalized_levenshtein(&lowered, &action.canonical_name.to_lowercase());
            // Tolerate float error at the exact cutoff.
            if score + 1e-9 < self.fuzzy_threshold {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((action, score)),
            }
        }
        best
    }
}
