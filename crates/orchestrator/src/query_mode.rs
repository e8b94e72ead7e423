//! Query mode classification.
//!
//! Decided once per run from the user's message. Analytical queries get a
//! larger iteration budget and more thorough directive wording.

use quarry_config::{OrchestratorConfig, QueryModeConfig};
use serde::{Deserialize, Serialize};

use crate::dates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Simple,
    Analytical,
}

impl QueryMode {
    /// Classify a user message.
    ///
    /// A message is analytical when it contains a configured keyword or
    /// phrase, reaches the word-count threshold, or mentions more than one
    /// date.
    pub fn classify(message: &str, rules: &QueryModeConfig) -> Self {
        let words: Vec<String> = message
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        if words.len() >= rules.analytical_min_words {
            return Self::Analytical;
        }

        let padded = format!(" {} ", words.join(" "));
        let keyword_hit = rules.analytical_keywords.iter().any(|keyword| {
            let keyword = keyword.trim().to_lowercase();
            !keyword.is_empty() && padded.contains(&format!(" {keyword} "))
        });
        if keyword_hit {
            return Self::Analytical;
        }

        if dates::extract(message).len() > 1 {
            return Self::Analytical;
        }

        Self::Simple
    }

    /// Iteration cap for this mode.
    pub fn max_iterations(self, config: &OrchestratorConfig) -> u32 {
        match self {
            Self::Simple => config.max_iterations_simple,
            Self::Analytical => config.max_iterations_analytical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Analytical => "analytical",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> QueryModeConfig {
        QueryModeConfig::default()
    }

    #[test]
    fn short_lookup_is_simple() {
        assert_eq!(
            QueryMode::classify("show me revenue for 2024", &rules()),
            QueryMode::Simple
        );
    }

    #[test]
    fn keyword_makes_analytical() {
        assert_eq!(
            QueryMode::classify("Compare regional revenue", &rules()),
            QueryMode::Analytical
        );
        assert_eq!(
            QueryMode::classify("How did churn change over time?", &rules()),
            QueryMode::Analytical
        );
    }

    #[test]
    fn keyword_must_be_a_whole_word() {
        // "growth" is a keyword, "overgrowth" is not
        assert_eq!(
            QueryMode::classify("list overgrowth incidents", &rules()),
            QueryMode::Simple
        );
    }

    #[test]
    fn multiple_dates_make_analytical() {
        assert_eq!(
            QueryMode::classify("revenue in 2023 and 2024", &rules()),
            QueryMode::Analytical
        );
    }

    #[test]
    fn long_message_is_analytical() {
        let rules = QueryModeConfig {
            analytical_keywords: vec![],
            analytical_min_words: 5,
        };
        assert_eq!(
            QueryMode::classify("list all the open orders please", &rules),
            QueryMode::Analytical
        );
        assert_eq!(QueryMode::classify("list open orders", &rules), QueryMode::Simple);
    }

    #[test]
    fn max_iterations_follow_mode() {
        let config = OrchestratorConfig::default();
        assert_eq!(QueryMode::Simple.max_iterations(&config), 5);
        assert_eq!(QueryMode::Analytical.max_iterations(&config), 10);
    }
}
