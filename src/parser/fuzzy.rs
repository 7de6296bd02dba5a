use super::text::normalize;
use strsim::jaro_winkler;

/// Fuzzy matcher for metric names typed with typos or partial words
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for considering two strings as matches
    pub similarity_threshold: f64,
    /// Shorter inputs are too noisy to fuzzy-match ("de", "el", "roe")
    pub min_length: usize,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
            min_length: 4,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
            ..Self::default()
        }
    }

    /// Calculate similarity between two strings
    /// Returns a score between 0.0 and 1.0 (higher = more similar)
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        let norm1 = normalize(s1);
        let norm2 = normalize(s2);

        if norm1.is_empty() || norm2.is_empty() {
            return 0.0;
        }

        let jw_score = jaro_winkler(&norm1, &norm2);

        // Substring bonus ("morosidad" inside "indice de morosidad"), scaled by length ratio
        let is_substring = norm1.contains(&norm2) || norm2.contains(&norm1);
        let substring_bonus = if is_substring {
            let len_diff = (norm1.len() as f64 - norm2.len() as f64).abs();
            let max_len = norm1.len().max(norm2.len()) as f64;
            (1.0 - (len_diff / max_len)) * 0.1
        } else {
            0.0
        };

        (jw_score + substring_bonus).min(1.0)
    }

    pub fn is_match(&self, s1: &str, s2: &str) -> bool {
        self.similarity(s1, s2) >= self.similarity_threshold
    }

    /// Best candidate above threshold. Candidates are `(key, surface form)`;
    /// equal scores keep the earliest candidate.
    pub fn find_best_match<'a, K: Copy>(
        &self,
        target: &str,
        candidates: impl IntoIterator<Item = (K, &'a str)>,
    ) -> Option<(K, f64)> {
        if normalize(target).chars().count() < self.min_length {
            return None;
        }

        let mut best: Option<(K, f64)> = None;
        for (key, form) in candidates {
            let score = self.similarity(target, form);
            if score < self.similarity_threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((key, score)),
            }
        }
        best
    }
}
