//! Combinators joining operand patterns within one read and across reads.

use std::iter;
use std::sync::Arc;

use crate::config::PatternConfig;
use crate::errors::*;
use crate::matches::{MatchIntermediate, MatchStream};
use crate::pattern::{MultiPattern, SearchContext, SinglePattern};
use crate::sequence::TargetSet;
use crate::sorter::{combine, CombinePolicy, OperandInput};

fn check_operand_count(construct: &'static str, required: usize, count: usize) -> Result<()> {
    if count < required {
        return Err(ConfigError::FewOperands {
            construct,
            required,
            count,
        }
        .into());
    }
    Ok(())
}

fn operand_inputs<'a>(
    operands: &'a [SinglePattern],
    ctx: SearchContext<'a>,
) -> Vec<OperandInput<'a>> {
    operands
        .iter()
        .map(|o| OperandInput {
            stream: o.match_stream(ctx),
            complexity: o.estimate_complexity(),
        })
        .collect()
}

/// All operands must match the same read, in any order. Range overlaps
/// within the configured limit are penalized, wider overlaps kill the
/// combination.
#[derive(Debug)]
pub struct AndPattern {
    conf: Arc<PatternConfig>,
    operands: Vec<SinglePattern>,
}

impl AndPattern {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<SinglePattern>) -> Result<Self> {
        check_operand_count("AndPattern", 2, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[SinglePattern] {
        &self.operands
    }

    pub(crate) fn map_operands(mut self, f: impl FnMut(SinglePattern) -> SinglePattern) -> Self {
        self.operands = self.operands.into_iter().map(f).collect();
        self
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        combine(
            self.conf.clone(),
            CombinePolicy::Intersection,
            ctx.fair,
            1,
            operand_inputs(&self.operands, ctx),
        )
    }
}

/// Operands must match the same read in left-to-right order. Gaps between
/// consecutive operand ranges cost insertion penalties, overlaps follow the
/// same rules as [`AndPattern`].
#[derive(Debug)]
pub struct SequencePattern {
    conf: Arc<PatternConfig>,
    operands: Vec<SinglePattern>,
}

impl SequencePattern {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<SinglePattern>) -> Result<Self> {
        check_operand_count("SequencePattern", 2, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[SinglePattern] {
        &self.operands
    }

    pub(crate) fn map_operands(mut self, f: impl FnMut(SinglePattern) -> SinglePattern) -> Self {
        self.operands = self.operands.into_iter().map(f).collect();
        self
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        combine(
            self.conf.clone(),
            CombinePolicy::Following,
            ctx.fair,
            1,
            operand_inputs(&self.operands, ctx),
        )
    }
}

/// Any one operand match is a match of the alternation; results carry the
/// operand's index.
#[derive(Debug)]
pub struct OrPattern {
    conf: Arc<PatternConfig>,
    operands: Vec<SinglePattern>,
}

impl OrPattern {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<SinglePattern>) -> Result<Self> {
        check_operand_count("OrPattern", 2, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[SinglePattern] {
        &self.operands
    }

    pub(crate) fn map_operands(mut self, f: impl FnMut(SinglePattern) -> SinglePattern) -> Self {
        self.operands = self.operands.into_iter().map(f).collect();
        self
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        combine(
            self.conf.clone(),
            CombinePolicy::First,
            ctx.fair,
            1,
            operand_inputs(&self.operands, ctx),
        )
    }
}

/// One single-read operand per read of the record; every operand must match
/// its read.
#[derive(Debug)]
pub struct MultiReadPattern {
    conf: Arc<PatternConfig>,
    operands: Vec<SinglePattern>,
}

impl MultiReadPattern {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<SinglePattern>) -> Result<Self> {
        check_operand_count("MultiReadPattern", 1, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[SinglePattern] {
        &self.operands
    }

    pub(crate) fn map_operands(
        mut self,
        f: impl FnOnce(Vec<SinglePattern>) -> Vec<SinglePattern>,
    ) -> Self {
        self.operands = f(self.operands);
        self
    }

    pub(crate) fn match_stream<'a>(
        &'a self,
        targets: &'a TargetSet<'a>,
        fair: bool,
    ) -> MatchStream<'a> {
        assert!(
            self.operands.len() == targets.len(),
            "pattern expects {} reads, got {}",
            self.operands.len(),
            targets.len()
        );
        let inputs = self
            .operands
            .iter()
            .enumerate()
            .map(|(i, o)| OperandInput {
                stream: o.match_stream(SearchContext::full(targets.get(i + 1), i + 1, fair)),
                complexity: o.estimate_complexity(),
            })
            .collect();
        combine(
            self.conf.clone(),
            CombinePolicy::LogicalAnd,
            fair,
            targets.len(),
            inputs,
        )
    }
}

fn multi_inputs<'a>(
    operands: &'a [MultiPattern],
    targets: &'a TargetSet<'a>,
    fair: bool,
) -> Vec<OperandInput<'a>> {
    operands
        .iter()
        .map(|o| OperandInput {
            stream: o.match_stream(targets, fair),
            complexity: o.estimate_complexity(),
        })
        .collect()
}

/// Both multi-read operands must match the record.
#[derive(Debug)]
pub struct AndOperator {
    conf: Arc<PatternConfig>,
    operands: Vec<MultiPattern>,
}

impl AndOperator {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<MultiPattern>) -> Result<Self> {
        check_operand_count("AndOperator", 2, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[MultiPattern] {
        &self.operands
    }

    pub(crate) fn map_operands(
        mut self,
        f: impl FnOnce(Vec<MultiPattern>) -> Vec<MultiPattern>,
    ) -> Self {
        self.operands = f(self.operands);
        self
    }

    pub(crate) fn match_stream<'a>(
        &'a self,
        targets: &'a TargetSet<'a>,
        fair: bool,
    ) -> MatchStream<'a> {
        combine(
            self.conf.clone(),
            CombinePolicy::LogicalAnd,
            fair,
            targets.len(),
            multi_inputs(&self.operands, targets, fair),
        )
    }
}

/// At least one multi-read operand must match the record; groups of the
/// absent operands stay unmatched.
#[derive(Debug)]
pub struct OrOperator {
    conf: Arc<PatternConfig>,
    operands: Vec<MultiPattern>,
}

impl OrOperator {
    pub fn new(conf: Arc<PatternConfig>, operands: Vec<MultiPattern>) -> Result<Self> {
        check_operand_count("OrOperator", 2, operands.len())?;
        Ok(Self { conf, operands })
    }

    pub fn operands(&self) -> &[MultiPattern] {
        &self.operands
    }

    pub(crate) fn map_operands(
        mut self,
        f: impl FnOnce(Vec<MultiPattern>) -> Vec<MultiPattern>,
    ) -> Self {
        self.operands = f(self.operands);
        self
    }

    pub(crate) fn match_stream<'a>(
        &'a self,
        targets: &'a TargetSet<'a>,
        fair: bool,
    ) -> MatchStream<'a> {
        combine(
            self.conf.clone(),
            CombinePolicy::LogicalOr,
            fair,
            targets.len(),
            multi_inputs(&self.operands, targets, fair),
        )
    }
}

/// Inverts its operand: the record matches exactly when the operand finds
/// nothing. The produced match has score 0 and carries no ranges or groups.
#[derive(Debug)]
pub struct NotOperator {
    operand: Box<MultiPattern>,
}

impl NotOperator {
    pub fn new(operand: MultiPattern) -> Self {
        Self {
            operand: Box::new(operand),
        }
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
        _fair: bool,
    ) -> MatchStream<'a> {
        // One unfair pull decides; ordering cannot matter for a hit test.
        if self.operand.match_stream(targets, false).next().is_some() {
            Box::new(iter::empty())
        } else {
            Box::new(iter::once(MatchIntermediate::empty(targets.len())))
        }
    }
}
