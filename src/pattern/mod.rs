//! The pattern tree: leaf matchers, combinators and filters.
//!
//! Patterns come in two families. [`SinglePattern`] nodes match one read;
//! [`MultiPattern`] nodes combine full-read patterns across all reads of a
//! record. A finished tree is immutable and can be shared across threads and
//! reused for any number of searches.

mod any;
mod combinators;
mod filter;
mod full_read;
mod fuzzy;
mod repeat;

pub use any::*;
pub use combinators::*;
pub use filter::*;
pub use full_read::*;
pub use fuzzy::*;
pub use repeat::*;

use rustc_hash::FxHashSet;

use crate::errors::*;
use crate::groups::{default_group_name, GroupEdge};
use crate::matches::{Match, MatchStream, Matches};
use crate::sequence::{Target, TargetSet};

/// Per-call parameters threaded through a single-target subtree.
#[derive(Clone, Copy)]
pub(crate) struct SearchContext<'a> {
    pub target: Target<'a>,
    pub target_id: usize,
    pub from: usize,
    pub to: usize,
    pub fair: bool,
}

impl<'a> SearchContext<'a> {
    pub fn full(target: Target<'a>, target_id: usize, fair: bool) -> Self {
        Self {
            target,
            target_id,
            from: 0,
            to: target.len(),
            fair,
        }
    }
}

/// A pattern matching within one read.
#[derive(Debug)]
pub enum SinglePattern {
    Fuzzy(FuzzyMatchPattern),
    Repeat(RepeatPattern),
    RepeatN(RepeatNPattern),
    Any(AnyPattern),
    And(AndPattern),
    Sequence(SequencePattern),
    Or(OrPattern),
    FullRead(FullReadPattern),
    Filter(FilterPattern),
}

impl SinglePattern {
    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        use SinglePattern::*;
        match self {
            Fuzzy(p) => p.match_stream(ctx),
            Repeat(p) => p.match_stream(ctx),
            RepeatN(p) => p.match_stream(ctx),
            Any(p) => p.match_stream(ctx),
            And(p) => p.match_stream(ctx),
            Sequence(p) => p.match_stream(ctx),
            Or(p) => p.match_stream(ctx),
            FullRead(p) => p.match_stream(ctx),
            Filter(p) => p.match_stream(ctx),
        }
    }

    /// Lazy matches of this pattern against a slice of one target.
    ///
    /// The programmatic entry point for single-target subtrees; target id 1
    /// is stamped on the results.
    pub fn find<'a>(&'a self, target: Target<'a>, from: usize, to: usize, fair: bool) -> Matches<'a> {
        let ctx = SearchContext {
            target,
            target_id: 1,
            from,
            to: to.min(target.len()),
            fair,
        };
        Matches::new(self.match_stream(ctx))
    }

    /// Longest span a match of this pattern can cover, when estimable.
    pub fn estimate_max_length(&self) -> Option<usize> {
        use SinglePattern::*;
        match self {
            Fuzzy(p) => p.estimate_max_length(),
            Repeat(p) => p.estimate_max_length(),
            RepeatN(p) => p.estimate_max_length(),
            Any(_) => None,
            And(p) => p
                .operands()
                .iter()
                .map(|o| o.estimate_max_length())
                .try_fold(0usize, |acc, l| l.map(|l| acc.max(l))),
            Sequence(p) => p
                .operands()
                .iter()
                .map(|o| o.estimate_max_length())
                .try_fold(0usize, |acc, l| l.map(|l| acc + l)),
            Or(p) => p
                .operands()
                .iter()
                .map(|o| o.estimate_max_length())
                .try_fold(0usize, |acc, l| l.map(|l| acc.max(l))),
            FullRead(p) => p.operand().estimate_max_length(),
            Filter(p) => p.operand().estimate_max_length(),
        }
    }

    /// Relative cost heuristic used to order operands in unfair combination.
    pub(crate) fn estimate_complexity(&self) -> u64 {
        use SinglePattern::*;
        match self {
            Fuzzy(p) => p.estimate_complexity(),
            Repeat(p) => p.estimate_complexity(),
            RepeatN(p) => p.estimate_complexity(),
            Any(_) => 1,
            And(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            Sequence(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            Or(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            FullRead(p) => p.operand().estimate_complexity(),
            Filter(p) => p.operand().estimate_complexity(),
        }
    }

    pub(crate) fn collect_edges(&self, out: &mut Vec<GroupEdge>) {
        use SinglePattern::*;
        match self {
            Fuzzy(p) => out.extend(p.group_edges().iter().map(|g| g.edge.clone())),
            Repeat(p) => out.extend(p.group_edges().iter().map(|g| g.edge.clone())),
            RepeatN(p) => out.extend(p.group_edges().iter().map(|g| g.edge.clone())),
            Any(p) => out.extend(p.group_edges().iter().cloned()),
            And(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            Sequence(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            Or(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            FullRead(p) => p.operand().collect_edges(out),
            Filter(p) => p.operand().collect_edges(out),
        }
    }

    fn assign_target_ids(self, target_id: usize) -> Self {
        use SinglePattern::*;
        match self {
            FullRead(p) => FullRead(p.assign_target_id(target_id)),
            And(p) => And(p.map_operands(|o| o.assign_target_ids(target_id))),
            Sequence(p) => Sequence(p.map_operands(|o| o.assign_target_ids(target_id))),
            Or(p) => Or(p.map_operands(|o| o.assign_target_ids(target_id))),
            Filter(p) => Filter(p.map_operand(|o| o.assign_target_ids(target_id))),
            leaf => leaf,
        }
    }
}

/// A pattern matching across all reads of a record.
#[derive(Debug)]
pub enum MultiPattern {
    Multi(MultiReadPattern),
    And(AndOperator),
    Or(OrOperator),
    Not(NotOperator),
    Filter(MultiFilterPattern),
}

impl MultiPattern {
    pub(crate) fn match_stream<'a>(
        &'a self,
        targets: &'a TargetSet<'a>,
        fair: bool,
    ) -> MatchStream<'a> {
        use MultiPattern::*;
        match self {
            Multi(p) => p.match_stream(targets, fair),
            And(p) => p.match_stream(targets, fair),
            Or(p) => p.match_stream(targets, fair),
            Not(p) => p.match_stream(targets, fair),
            Filter(p) => p.match_stream(targets, fair),
        }
    }

    pub(crate) fn collect_edges(&self, out: &mut Vec<GroupEdge>) {
        use MultiPattern::*;
        match self {
            Multi(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            And(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            Or(p) => p.operands().iter().for_each(|o| o.collect_edges(out)),
            Not(p) => p.operand().collect_edges(out),
            Filter(p) => p.operand().collect_edges(out),
        }
    }

    pub(crate) fn estimate_complexity(&self) -> u64 {
        use MultiPattern::*;
        match self {
            Multi(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            And(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            Or(p) => p.operands().iter().map(|o| o.estimate_complexity()).sum(),
            Not(p) => p.operand().estimate_complexity(),
            Filter(p) => p.operand().estimate_complexity(),
        }
    }

    fn assign_target_ids(self) -> Self {
        use MultiPattern::*;
        match self {
            Multi(p) => Multi(p.map_operands(|ops| {
                ops.into_iter()
                    .enumerate()
                    .map(|(i, o)| o.assign_target_ids(i + 1))
                    .collect()
            })),
            And(p) => And(p.map_operands(|ops| {
                ops.into_iter().map(|o| o.assign_target_ids()).collect()
            })),
            Or(p) => Or(p.map_operands(|ops| {
                ops.into_iter().map(|o| o.assign_target_ids()).collect()
            })),
            Not(p) => Not(p.map_operand(|o| o.assign_target_ids())),
            Filter(p) => Filter(p.map_operand(|o| o.assign_target_ids())),
        }
    }
}

/// A complete, searchable pattern tree.
#[derive(Debug)]
pub enum Pattern {
    Single(SinglePattern),
    Multi(MultiPattern),
}

impl Pattern {
    /// Final builder step: stamps target ids onto full-read wrappers, one per
    /// read in multi-read patterns, and decides which wrappers synthesize
    /// their default `R<n>` group.
    ///
    /// Parser front-ends run this automatically; programmatically built trees
    /// must call it before searching.
    pub fn assign_target_ids(self) -> Pattern {
        match self {
            Pattern::Single(p) => Pattern::Single(p.assign_target_ids(1)),
            Pattern::Multi(p) => Pattern::Multi(p.assign_target_ids()),
        }
    }

    /// Searches all reads of a record. Matching work happens lazily as the
    /// returned result's streams are pulled.
    ///
    /// Panics when the number of reads does not fit the pattern: a
    /// single-target pattern expects exactly one read, a multi-read pattern
    /// one read per operand.
    pub fn search<'a>(&'a self, targets: &'a TargetSet<'a>) -> SearchResult<'a> {
        SearchResult {
            pattern: self,
            targets,
        }
    }

    /// Every group edge declared anywhere in the tree, in declaration order.
    pub fn group_edges(&self) -> Vec<GroupEdge> {
        let mut out = Vec::new();
        match self {
            Pattern::Single(p) => p.collect_edges(&mut out),
            Pattern::Multi(p) => p.collect_edges(&mut out),
        }
        out
    }
}

/// One search call bound to a pattern and a target set. Streams are created
/// per `matches` call; fair ordering is fixed when a stream is created.
pub struct SearchResult<'a> {
    pattern: &'a Pattern,
    targets: &'a TargetSet<'a>,
}

impl<'a> SearchResult<'a> {
    fn stream(&self, fair: bool) -> MatchStream<'a> {
        match self.pattern {
            Pattern::Single(p) => {
                assert!(
                    self.targets.len() == 1,
                    "single-target pattern searched against {} reads",
                    self.targets.len()
                );
                p.match_stream(SearchContext::full(self.targets.get(1), 1, fair))
            }
            Pattern::Multi(p) => p.match_stream(self.targets, fair),
        }
    }

    /// All matches, best-first under fair ordering, discovery order otherwise.
    pub fn matches(&self, fair: bool) -> Matches<'a> {
        Matches::new(self.stream(fair))
    }

    /// The single best match under the requested ordering.
    pub fn best_match(&self, fair: bool) -> Option<Match<'a>> {
        self.matches(fair).next()
    }

    /// Cheap hit test: pulls one unfair match.
    pub fn matched(&self) -> bool {
        self.stream(false).next().is_some()
    }
}

/// Checks that every group is declared exactly once: one start and one end
/// edge reachable from the root, with alternation branches required to carry
/// identical edge sets so any branch yields a fully paired match.
pub(crate) fn validate_group_edges(pattern: &Pattern) -> Result<()> {
    let edges = match pattern {
        Pattern::Single(p) => validate_single(p)?,
        Pattern::Multi(p) => validate_multi(p)?,
    };
    let names: Vec<&str> = {
        let mut seen = Vec::new();
        for e in &edges {
            if !seen.contains(&e.name()) {
                seen.push(e.name());
            }
        }
        seen
    };
    for name in names {
        let has_start = edges.iter().any(|e| e.name() == name && e.is_start());
        let has_end = edges.iter().any(|e| e.name() == name && !e.is_start());
        if !has_start || !has_end {
            return Err(ParseError::UnpairedGroupEdge {
                name: name.to_owned(),
                missing_start: !has_start,
            }
            .into());
        }
    }
    Ok(())
}

fn merge_exclusive(mut acc: Vec<GroupEdge>, other: Vec<GroupEdge>) -> Result<Vec<GroupEdge>> {
    for e in other {
        if acc.contains(&e) {
            return Err(ParseError::DuplicateGroupEdge {
                name: e.name().to_owned(),
                is_start: e.is_start(),
            }
            .into());
        }
        acc.push(e);
    }
    Ok(acc)
}

fn merge_alternation(arms: Vec<Vec<GroupEdge>>) -> Result<Vec<GroupEdge>> {
    let first: FxHashSet<&GroupEdge> = arms[0].iter().collect();
    for arm in &arms[1..] {
        let set: FxHashSet<&GroupEdge> = arm.iter().collect();
        if let Some(e) = set.symmetric_difference(&first).next() {
            return Err(ParseError::AlternationGroupMismatch {
                name: e.name().to_owned(),
            }
            .into());
        }
    }
    Ok(arms.into_iter().next().unwrap())
}

fn validate_single(p: &SinglePattern) -> Result<Vec<GroupEdge>> {
    use SinglePattern::*;
    match p {
        Or(or) => {
            let arms = or
                .operands()
                .iter()
                .map(validate_single)
                .collect::<Result<Vec<_>>>()?;
            merge_alternation(arms)
        }
        And(and) => and
            .operands()
            .iter()
            .map(validate_single)
            .try_fold(Vec::new(), |acc, arm| merge_exclusive(acc, arm?)),
        Sequence(seq) => seq
            .operands()
            .iter()
            .map(validate_single)
            .try_fold(Vec::new(), |acc, arm| merge_exclusive(acc, arm?)),
        FullRead(fr) => validate_single(fr.operand()),
        Filter(f) => validate_single(f.operand()),
        leaf => {
            let mut out = Vec::new();
            leaf.collect_edges(&mut out);
            merge_exclusive(Vec::new(), out)
        }
    }
}

fn validate_multi(p: &MultiPattern) -> Result<Vec<GroupEdge>> {
    use MultiPattern::*;
    match p {
        Multi(m) => m
            .operands()
            .iter()
            .map(validate_single)
            .try_fold(Vec::new(), |acc, arm| merge_exclusive(acc, arm?)),
        And(a) => a
            .operands()
            .iter()
            .map(validate_multi)
            .try_fold(Vec::new(), |acc, arm| merge_exclusive(acc, arm?)),
        Or(o) => {
            let arms = o
                .operands()
                .iter()
                .map(validate_multi)
                .collect::<Result<Vec<_>>>()?;
            merge_alternation(arms)
        }
        Not(n) => {
            // A negation match never carries edges, but its operand's
            // declarations still must be well formed.
            validate_multi(n.operand())?;
            Ok(Vec::new())
        }
        Filter(f) => validate_multi(f.operand()),
    }
}

pub(crate) fn subtree_declares_default_group(operand: &SinglePattern, target_id: usize) -> bool {
    let mut edges = Vec::new();
    operand.collect_edges(&mut edges);
    let name = default_group_name(target_id);
    edges.iter().any(|e| e.name() == name)
}
