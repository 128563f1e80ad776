//! Filters wrapping another pattern and pruning its match stream.

use std::iter;

use crate::errors::*;
use crate::groups::BorderPosition;
use crate::matches::MatchStream;
use crate::pattern::{MultiPattern, SearchContext, SinglePattern};
use crate::sequence::TargetSet;

/// Predicate applied to every candidate match of the wrapped pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Keeps matches scoring at least the given value.
    Score(i64),
    /// Keeps matches whose span starts (`left`) or ends exactly on the given
    /// target position.
    Stick { left: bool, position: BorderPosition },
}

/// Filter over a single-read pattern.
#[derive(Debug)]
pub struct FilterPattern {
    filter: Filter,
    operand: Box<SinglePattern>,
}

impl FilterPattern {
    pub fn new(filter: Filter, operand: SinglePattern) -> Self {
        Self {
            filter,
            operand: Box::new(operand),
        }
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn operand(&self) -> &SinglePattern {
        &self.operand
    }

    pub(crate) fn map_operand(mut self, f: impl FnOnce(SinglePattern) -> SinglePattern) -> Self {
        self.operand = Box::new(f(*self.operand));
        self
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        let stream = self.operand.match_stream(ctx);
        match self.filter {
            Filter::Score(threshold) => Box::new(stream.filter(move |m| m.score >= threshold)),
            Filter::Stick { left, position } => match position.resolve(ctx.target.len()) {
                None => Box::new(iter::empty()),
                Some(p) => Box::new(stream.filter(move |m| {
                    m.overall_range()
                        .is_some_and(|(from, to)| if left { from == p } else { to - 1 == p })
                })),
            },
        }
    }
}

/// Filter over a multi-read pattern. Stick filters anchor to a position
/// within one read and are rejected here.
#[derive(Debug)]
pub struct MultiFilterPattern {
    filter: Filter,
    operand: Box<MultiPattern>,
}

impl MultiFilterPattern {
    pub fn new(filter: Filter, operand: MultiPattern) -> Result<Self> {
        if matches!(filter, Filter::Stick { .. }) {
            return Err(ConfigError::InvalidFilter {
                construct: "MultiFilterPattern",
                reason: "stick filters apply to single-read patterns only",
            }
            .into());
        }
        Ok(Self {
            filter,
            operand: Box::new(operand),
        })
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn operand(&self) -> &MultiPattern {
        &self.operand
    }

    pub(crate) fn map_operand(mut self, f: impl FnOnce(MultiPattern) -> MultiPattern) -> Self {
        self.operand = Box::new(f(*self.operand));
        self
    }

    pub(crate) fn match_stream<'a>(
        &'a self,
        targets: &'a TargetSet<'a>,
        fair: bool,
    ) -> MatchStream<'a> {
        let stream = self.operand.match_stream(targets, fair);
        match self.filter {
            Filter::Score(threshold) => Box::new(stream.filter(move |m| m.score >= threshold)),
            Filter::Stick { .. } => unreachable!("stick filter rejected at construction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::PatternConfig;
    use crate::pattern::FuzzyMatchPattern;
    use crate::sequence::Target;

    fn fuzzy(seq: &[u8]) -> SinglePattern {
        let conf = Arc::new(PatternConfig::default());
        SinglePattern::Fuzzy(FuzzyMatchPattern::new(conf, seq, vec![]).unwrap())
    }

    fn ranges(p: &SinglePattern, target: &[u8]) -> Vec<(i64, usize, usize)> {
        let t = Target::new(target);
        p.find(t, 0, t.len(), false)
            .map(|m| {
                let (from, to) = m.range().unwrap();
                (m.score(), from, to)
            })
            .collect()
    }

    #[test]
    fn score_filter_prunes_weak_matches() {
        let p = SinglePattern::Filter(FilterPattern::new(Filter::Score(0), fuzzy(b"ATTA")));
        let all = ranges(&p, b"ATTACATTC");
        assert!(all.contains(&(0, 0, 4)));
        assert!(all.iter().all(|&(s, _, _)| s >= 0));
    }

    #[test]
    fn stick_left_keeps_matches_starting_on_the_position() {
        let p = SinglePattern::Filter(FilterPattern::new(
            Filter::Stick {
                left: true,
                position: BorderPosition::FromStart(4),
            },
            fuzzy(b"ACGT"),
        ));
        let all = ranges(&p, b"ACGTACGT");
        assert!(all.contains(&(0, 4, 8)));
        assert!(all.iter().all(|&(_, from, _)| from == 4));
    }

    #[test]
    fn stick_right_counts_from_the_end() {
        let p = SinglePattern::Filter(FilterPattern::new(
            Filter::Stick {
                left: false,
                position: BorderPosition::FromEnd(0),
            },
            fuzzy(b"ACGT"),
        ));
        let all = ranges(&p, b"ACGTACGT");
        assert!(all.contains(&(0, 4, 8)));
        assert!(all.iter().all(|&(_, _, to)| to == 8));
    }

    #[test]
    fn unresolvable_stick_position_matches_nothing() {
        let p = SinglePattern::Filter(FilterPattern::new(
            Filter::Stick {
                left: true,
                position: BorderPosition::FromStart(100),
            },
            fuzzy(b"ACGT"),
        ));
        assert!(ranges(&p, b"ACGTACGT").is_empty());
    }

    #[test]
    fn multi_filter_rejects_stick() {
        let conf = Arc::new(PatternConfig::default());
        let operand = MultiPattern::Multi(
            crate::pattern::MultiReadPattern::new(
                conf,
                vec![SinglePattern::FullRead(crate::pattern::FullReadPattern::new(
                    fuzzy(b"ATTA"),
                ))],
            )
            .unwrap(),
        );
        let err = MultiFilterPattern::new(
            Filter::Stick {
                left: true,
                position: BorderPosition::FromStart(0),
            },
            operand,
        );
        assert!(matches!(
            err,
            Err(Error::Config(ConfigError::InvalidFilter { .. }))
        ));
    }
}
