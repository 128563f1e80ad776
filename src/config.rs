use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::*;

/// Scoring context shared by every pattern node.
///
/// One `PatternConfig` is attached (behind an `Arc`) to each node when it is
/// built, either by a parser front-end or by a programmatic constructor.
/// Score-threshold brackets in a query replace the threshold for the nodes
/// inside their span; everything else comes from this struct unchanged.
///
/// Mismatch scoring is case-blind. Letter case only matters to combinators:
/// an uppercase pattern letter may never be consumed by operand overlap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    /// Score added per aligned symbol whose wildcard masks intersect.
    pub match_score: i64,
    /// Score added per aligned symbol pair with disjoint masks.
    pub mismatch_score: i64,
    /// Score added per inserted or deleted symbol (linear gaps).
    pub gap_score: i64,
    /// Matches scoring below this are dropped.
    pub score_threshold: i64,
    /// Error budget for the bit-parallel search stage and for repeat runs.
    pub bitap_max_errors: usize,
    /// Most symbols two combined operand ranges may share.
    pub max_overlap: usize,
    /// Score added per overlapped symbol when combining operand ranges.
    pub single_overlap_penalty: i64,
    /// Score added per skipped symbol between consecutive operands of a
    /// sequence combination.
    pub insertion_penalty: i64,
    /// Most matches pulled per operand in unfair combination.
    pub unfair_limit: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            match_score: 0,
            mismatch_score: -9,
            gap_score: -10,
            score_threshold: -20,
            bitap_max_errors: 2,
            max_overlap: 2,
            single_overlap_penalty: -10,
            insertion_penalty: -10,
            unfair_limit: 8,
        }
    }
}

impl PatternConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Same config with a replaced score threshold, for bracket overrides.
    pub fn with_score_threshold(&self, score_threshold: i64) -> Arc<Self> {
        Arc::new(Self {
            score_threshold,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_yaml() {
        let conf = PatternConfig::default();
        let yaml = serde_yaml::to_string(&conf).unwrap();
        let back = PatternConfig::from_yaml(&yaml).unwrap();
        assert_eq!(conf, back);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let conf = PatternConfig::from_yaml("score_threshold: -5\nmax_overlap: 1\n").unwrap();
        assert_eq!(conf.score_threshold, -5);
        assert_eq!(conf.max_overlap, 1);
        assert_eq!(conf.mismatch_score, PatternConfig::default().mismatch_score);
    }

    #[test]
    fn unknown_yaml_field_is_rejected() {
        assert!(PatternConfig::from_yaml("scorethreshold: -5\n").is_err());
    }

    #[test]
    fn threshold_override_keeps_other_fields() {
        let conf = PatternConfig::default();
        let tighter = conf.with_score_threshold(-3);
        assert_eq!(tighter.score_threshold, -3);
        assert_eq!(tighter.gap_score, conf.gap_score);
    }
}
