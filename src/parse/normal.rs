//! The human-facing query grammar.
//!
//! Parsing is a series of rewrite passes over a [`TokenizedString`]. Score
//! threshold headers and group markers are read first, then leaves are built
//! from the letters (repeats, fuzzy literals, wildcards), then brackets are
//! reduced innermost first and operator runs are joined by precedence:
//! juxtaposition binds tightest, then `&`, then `|`, then the read-level
//! operators `\`, `~`, `&&`, `||` loosest.

use std::sync::Arc;

use crate::config::PatternConfig;
use crate::errors::{ParseError, Result};
use crate::groups::{BorderPosition, GroupEdge, GroupEdgePosition};
use crate::parse::scanner::{self, BracketKind, BracketPair, QuoteSpan};
use crate::parse::tokens::{Token, TokenizedString};
use crate::pattern::{
    validate_group_edges, AndOperator, AndPattern, AnyPattern, Filter, FilterPattern,
    FullReadPattern, FuzzyMatchPattern, MultiPattern, MultiReadPattern, NotOperator, OrOperator,
    OrPattern, Pattern, RepeatNPattern, RepeatPattern, SequencePattern, SinglePattern,
};
use crate::sequence::is_nucleotide;

pub(crate) fn parse(query: &str, conf: Arc<PatternConfig>) -> Result<Pattern> {
    if query.trim().is_empty() {
        return Err(ParseError::EmptyQuery.into());
    }
    if let Some(position) = query.bytes().position(|b| !b.is_ascii()) {
        return Err(ParseError::NonAscii { position }.into());
    }
    let quotes = scanner::find_all_quotes(query)?;
    let parens = scanner::find_all_brackets(query, BracketKind::Paren)?;
    let squares = scanner::find_all_brackets(query, BracketKind::Square)?;
    let braces = scanner::find_all_brackets(query, BracketKind::Brace)?;

    let mut parser = NormalParser {
        query,
        conf,
        quotes,
        braces,
        ts: TokenizedString::new(query),
        thresholds: Vec::new(),
        pending: Vec::new(),
        group_parens: Vec::new(),
    };
    parser.read_thresholds(&squares)?;
    parser.read_groups(&parens)?;
    parser.snap_pending_groups();
    parser.build_repeats()?;
    parser.build_fuzzy()?;
    parser.build_wildcards()?;
    parser.check_dangling_groups()?;
    let pattern = parser.assemble(&parens, &squares)?;
    validate_group_edges(&pattern)?;
    Ok(pattern.assign_target_ids())
}

/// A `[threshold: ...]` bracket. Patterns built strictly inside it use a
/// config with the overridden score threshold; the reduced content is also
/// wrapped in a score filter.
struct ThresholdSpan {
    open: usize,
    close: usize,
    content_from: usize,
    nested_level: usize,
    threshold: i64,
    conf: Arc<PatternConfig>,
}

/// A named group whose markers have been consumed but whose edges have not
/// yet attached to a leaf. `from..to` is the content span snapped to its
/// first and last significant characters.
struct PendingGroup {
    name: String,
    open: usize,
    from: usize,
    to: usize,
    taken_start: bool,
    taken_end: bool,
}

struct NormalParser<'q> {
    query: &'q str,
    conf: Arc<PatternConfig>,
    quotes: Vec<QuoteSpan>,
    braces: Vec<BracketPair>,
    ts: TokenizedString<'q>,
    thresholds: Vec<ThresholdSpan>,
    pending: Vec<PendingGroup>,
    group_parens: Vec<(usize, usize)>,
}

#[derive(Clone, Copy)]
enum Joiner {
    Sequence,
    And,
    Or,
}

impl<'q> NormalParser<'q> {
    fn read_thresholds(&mut self, squares: &[BracketPair]) -> Result<()> {
        for b in squares {
            let colon = scanner::non_quoted_find(&self.quotes, self.query, ":", b.open + 1)
                .filter(|&c| c < b.close)
                .ok_or_else(|| ParseError::MalformedArguments {
                    construct: String::from("score threshold bracket"),
                    position: b.open,
                    reason: "expected '[threshold: pattern]'",
                })?;
            let text = self.query[b.open + 1..colon].trim();
            let threshold: i64 = text.parse().map_err(|_| ParseError::InvalidNumber {
                text: text.to_owned(),
                position: b.open + 1,
            })?;
            self.thresholds.push(ThresholdSpan {
                open: b.open,
                close: b.close,
                content_from: colon + 1,
                nested_level: b.nested_level,
                threshold,
                conf: self.conf.with_score_threshold(threshold),
            });
        }
        Ok(())
    }

    fn read_groups(&mut self, parens: &[BracketPair]) -> Result<()> {
        let bytes = self.query.as_bytes();
        for b in parens {
            let mut i = b.open + 1;
            while i < b.close && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let name_start = i;
            while i < b.close && bytes[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let name_end = i;
            while i < b.close && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= b.close || bytes[i] != b':' {
                continue;
            }
            if name_end == name_start {
                return Err(ParseError::EmptyGroupName { position: b.open }.into());
            }
            let name = &self.query[name_start..name_end];
            for pos in i + 1..b.close {
                let c = bytes[pos];
                if matches!(c, b'|' | b'&' | b'\\' | b'~')
                    && !scanner::is_in_quotes(&self.quotes, pos)
                {
                    return Err(ParseError::GroupOverOperator {
                        name: name.to_owned(),
                        operator: c as char,
                    }
                    .into());
                }
            }
            self.pending.push(PendingGroup {
                name: name.to_owned(),
                open: b.open,
                from: i + 1,
                to: b.close,
                taken_start: false,
                taken_end: false,
            });
            self.group_parens.push((b.open, b.close));
            self.ts.replace(b.open, i + 1, Token::Null);
            self.ts.replace(b.close, b.close + 1, Token::Null);
        }
        Ok(())
    }

    /// Narrows each pending group to its significant content so edges land
    /// on the construct they adjoin, not on whitespace or consumed markers.
    fn snap_pending_groups(&mut self) {
        let bytes = self.query.as_bytes();
        for g in &mut self.pending {
            while g.from < g.to
                && (self.ts.is_null_at(g.from) || bytes[g.from].is_ascii_whitespace())
            {
                g.from += 1;
            }
            while g.to > g.from
                && (self.ts.is_null_at(g.to - 1) || bytes[g.to - 1].is_ascii_whitespace())
            {
                g.to -= 1;
            }
        }
    }

    /// Group edges falling on a construct spanning `start..end`. The start
    /// edge attaches where the group content begins, the end edge where it
    /// ends; `offset` maps a query position to the leaf-local position.
    fn take_edges<F: Fn(usize) -> usize>(
        &mut self,
        start: usize,
        end: usize,
        offset: F,
    ) -> Vec<GroupEdgePosition> {
        let mut out = Vec::new();
        for g in &mut self.pending {
            if !g.taken_start && start <= g.from && g.from < end {
                out.push(GroupEdgePosition::new(
                    GroupEdge::known_valid(g.name.clone(), true),
                    offset(g.from),
                ));
                g.taken_start = true;
            }
            if !g.taken_end && start < g.to && g.to <= end {
                out.push(GroupEdgePosition::new(
                    GroupEdge::known_valid(g.name.clone(), false),
                    offset(g.to),
                ));
                g.taken_end = true;
            }
        }
        out
    }

    fn check_dangling_groups(&self) -> Result<()> {
        for g in &self.pending {
            if !g.taken_start || !g.taken_end {
                return Err(ParseError::Misplaced {
                    found: format!("group '{}'", g.name),
                    position: g.open,
                    reason: "group markers do not enclose a pattern",
                }
                .into());
            }
        }
        Ok(())
    }

    fn build_repeats(&mut self) -> Result<()> {
        let braces = self.braces.clone();
        for b in &braces {
            if b.open == 0 {
                continue;
            }
            let letter_pos = b.open - 1;
            let letter = match self.ts.text_char(letter_pos) {
                Some(c) if is_nucleotide(c) && !scanner::is_in_quotes(&self.quotes, letter_pos) => c,
                // cut braces and stray counts are handled by later stages
                _ => continue,
            };
            let (min, max) = self.parse_repeat_bounds(b)?;
            let mut start = letter_pos;
            let mut end = b.close + 1;
            let mut fixed_left = None;
            let mut fixed_right = None;
            if let Some((p, b'^')) = self.prev_text_char(start) {
                fixed_left = Some(BorderPosition::FromStart(0));
                start = p;
            }
            if let Some((p, b'$')) = self.next_text_char(end) {
                fixed_right = Some(BorderPosition::FromEnd(0));
                end = p + 1;
            }
            let end_offset = max.unwrap_or(usize::MAX);
            let edges =
                self.take_edges(start, end, |p| if p <= letter_pos { 0 } else { end_offset });
            let conf = self.conf_for(start, end);
            let node = if matches!(letter, b'N' | b'n') {
                SinglePattern::RepeatN(RepeatNPattern::with_borders(
                    conf, letter, min, max, fixed_left, fixed_right, edges,
                )?)
            } else {
                SinglePattern::Repeat(RepeatPattern::with_borders(
                    conf, letter, min, max, fixed_left, fixed_right, edges,
                )?)
            };
            self.ts.replace(start, end, Token::Pattern(node));
        }
        Ok(())
    }

    fn parse_repeat_bounds(&self, pair: &BracketPair) -> Result<(usize, Option<usize>)> {
        let content = self.query[pair.open + 1..pair.close].trim();
        if content == "*" {
            return Ok((1, None));
        }
        if let Some((lo, hi)) = content.split_once(':') {
            let min = match lo.trim() {
                "" => 1,
                n => self.parse_usize(n, pair.open + 1)?,
            };
            let max = match hi.trim() {
                "" => None,
                n => Some(self.parse_usize(n, pair.open + 1)?),
            };
            return Ok((min, max));
        }
        let n = self.parse_usize(content, pair.open + 1)?;
        Ok((n, Some(n)))
    }

    fn build_fuzzy(&mut self) -> Result<()> {
        let bytes = self.query.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let is_letter = !scanner::is_in_quotes(&self.quotes, pos)
                && self.ts.text_char(pos).map_or(false, is_nucleotide);
            if !is_letter {
                pos += 1;
                continue;
            }
            // letters bridged only by consumed group markers are one literal
            let mut letters = vec![pos];
            let mut cursor = pos + 1;
            loop {
                if self.ts.is_null_at(cursor) {
                    cursor += 1;
                    continue;
                }
                match self.ts.text_char(cursor) {
                    Some(c) if is_nucleotide(c) && !scanner::is_in_quotes(&self.quotes, cursor) => {
                        letters.push(cursor);
                        cursor += 1;
                    }
                    _ => break,
                }
            }
            let last = *letters.last().unwrap_or(&pos);

            let mut start = pos;
            let mut left_cut = 0usize;
            match self.prev_text_char(start) {
                Some((p, b'}')) => {
                    if let Some(pair) = self.brace_closing_at(p) {
                        if let Some((lp, b'<')) = self.prev_text_char(pair.open) {
                            left_cut = self.parse_usize(
                                self.query[pair.open + 1..pair.close].trim(),
                                pair.open + 1,
                            )?;
                            start = lp;
                        }
                    }
                }
                Some((p, b'<')) => {
                    left_cut = 1;
                    start = p;
                    while let Some((q, b'<')) = self.prev_text_char(start) {
                        left_cut += 1;
                        start = q;
                    }
                }
                _ => {}
            }
            let mut fixed_left = None;
            if let Some((p, b'^')) = self.prev_text_char(start) {
                fixed_left = Some(BorderPosition::FromStart(0));
                start = p;
            }

            let mut end = last + 1;
            let mut right_cut = 0usize;
            if let Some((p, b'>')) = self.next_text_char(end) {
                if let Some((bp, b'{')) = self.next_text_char(p + 1) {
                    if let Some(pair) = self.brace_opening_at(bp) {
                        right_cut = self.parse_usize(
                            self.query[pair.open + 1..pair.close].trim(),
                            pair.open + 1,
                        )?;
                        end = pair.close + 1;
                    }
                } else {
                    right_cut = 1;
                    end = p + 1;
                    while let Some((q, b'>')) = self.next_text_char(end) {
                        right_cut += 1;
                        end = q + 1;
                    }
                }
            }
            let mut fixed_right = None;
            if let Some((p, b'$')) = self.next_text_char(end) {
                fixed_right = Some(BorderPosition::FromEnd(0));
                end = p + 1;
            }

            let seq: Vec<u8> = letters.iter().map(|&p| bytes[p]).collect();
            let edges = self.take_edges(start, end, |p| letters.partition_point(|&lp| lp < p));
            let conf = self.conf_for(start, end);
            let node = FuzzyMatchPattern::with_borders(
                conf,
                &seq,
                left_cut,
                right_cut,
                fixed_left,
                fixed_right,
                edges,
            )?;
            self.ts
                .replace(start, end, Token::Pattern(SinglePattern::Fuzzy(node)));
            pos = end;
        }
        Ok(())
    }

    fn build_wildcards(&mut self) -> Result<()> {
        let mut pos = 0;
        while pos < self.query.len() {
            if self.ts.text_char(pos) == Some(b'*') && !scanner::is_in_quotes(&self.quotes, pos) {
                let edges = self.take_edges(pos, pos + 1, |_| 0);
                let edges = edges.into_iter().map(|gp| gp.edge).collect();
                let node = SinglePattern::Any(AnyPattern::new(edges)?);
                self.ts.replace(pos, pos + 1, Token::Pattern(node));
            }
            pos += 1;
        }
        Ok(())
    }

    fn assemble(&mut self, parens: &[BracketPair], squares: &[BracketPair]) -> Result<Pattern> {
        #[derive(Clone, Copy)]
        enum Unit {
            Paren(BracketPair),
            Square(BracketPair),
        }
        let mut units: Vec<Unit> = Vec::new();
        for &b in parens {
            if !self.group_parens.contains(&(b.open, b.close)) {
                units.push(Unit::Paren(b));
            }
        }
        for &b in squares {
            units.push(Unit::Square(b));
        }
        units.sort_by_key(|u| match u {
            Unit::Paren(b) | Unit::Square(b) => b.close - b.open,
        });

        for unit in units {
            match unit {
                Unit::Paren(b) => {
                    self.check_no_multi_ops(b.open + 1, b.close)?;
                    self.reduce_range(b.open + 1, b.close)?;
                    let node = self.take_single_in(b.open + 1, b.close)?;
                    self.ts
                        .replace(b.open, b.close + 1, Token::Pattern(node));
                }
                Unit::Square(b) => {
                    let (content_from, threshold) = self
                        .thresholds
                        .iter()
                        .find(|t| t.open == b.open)
                        .map(|t| (t.content_from, t.threshold))
                        .unwrap_or_else(|| {
                            panic!("no threshold recorded for bracket at {}", b.open)
                        });
                    self.check_no_multi_ops(content_from, b.close)?;
                    self.reduce_range(content_from, b.close)?;
                    let node = self.take_single_in(content_from, b.close)?;
                    let node = SinglePattern::Filter(FilterPattern::new(
                        Filter::Score(threshold),
                        node,
                    ));
                    self.ts
                        .replace(b.open, b.close + 1, Token::Pattern(node));
                }
            }
            self.apply_sticks();
        }
        self.top_pattern()
    }

    fn top_pattern(&mut self) -> Result<Pattern> {
        let len = self.query.len();
        let has_multi = ["||", "&&", "\\", "~"]
            .iter()
            .any(|op| self.find_op(op, 0, len).is_some());
        if !has_multi {
            self.reduce_range(0, len)?;
            let node = self.take_single_in(0, len)?;
            return Ok(Pattern::Single(SinglePattern::FullRead(
                FullReadPattern::new(node),
            )));
        }
        Ok(Pattern::Multi(self.or_level(0, len)?))
    }

    fn or_level(&mut self, from: usize, to: usize) -> Result<MultiPattern> {
        let parts = self.split_by(from, to, "||");
        if parts.len() == 1 {
            return self.and_level(from, to);
        }
        let mut ops = Vec::with_capacity(parts.len());
        for (f, t) in parts {
            ops.push(self.and_level(f, t)?);
        }
        Ok(MultiPattern::Or(OrOperator::new(self.conf.clone(), ops)?))
    }

    fn and_level(&mut self, from: usize, to: usize) -> Result<MultiPattern> {
        let parts = self.split_by(from, to, "&&");
        if parts.len() == 1 {
            return self.not_level(from, to);
        }
        let mut ops = Vec::with_capacity(parts.len());
        for (f, t) in parts {
            ops.push(self.not_level(f, t)?);
        }
        Ok(MultiPattern::And(AndOperator::new(self.conf.clone(), ops)?))
    }

    fn not_level(&mut self, from: usize, to: usize) -> Result<MultiPattern> {
        if let Some(p) = self.leading_tilde(from, to) {
            let inner = self.not_level(p + 1, to)?;
            return Ok(MultiPattern::Not(NotOperator::new(inner)));
        }
        self.multi_level(from, to)
    }

    fn multi_level(&mut self, from: usize, to: usize) -> Result<MultiPattern> {
        let parts = self.split_by(from, to, "\\");
        let mut ops = Vec::with_capacity(parts.len());
        for (f, t) in parts {
            self.reduce_range(f, t)?;
            let node = self.take_single_in(f, t)?;
            ops.push(SinglePattern::FullRead(FullReadPattern::new(node)));
        }
        Ok(MultiPattern::Multi(MultiReadPattern::new(
            self.conf.clone(),
            ops,
        )?))
    }

    fn leading_tilde(&self, from: usize, to: usize) -> Option<usize> {
        let mut pos = from;
        while pos < to {
            if self.ts.is_null_at(pos) {
                pos += 1;
                continue;
            }
            match self.ts.text_char(pos) {
                Some(c) if c.is_ascii_whitespace() => pos += 1,
                Some(b'~') => return Some(pos),
                _ => return None,
            }
        }
        None
    }

    fn split_by(&self, from: usize, to: usize, op: &str) -> Vec<(usize, usize)> {
        let mut parts = Vec::new();
        let mut cursor = from;
        let mut search = from;
        while let Some(p) = self.find_op(op, search, to) {
            parts.push((cursor, p));
            cursor = p + op.len();
            search = cursor;
        }
        parts.push((cursor, to));
        parts
    }

    /// First occurrence of `op` in `from..to` still covered by raw text.
    fn find_op(&self, op: &str, from: usize, to: usize) -> Option<usize> {
        let mut search = from;
        while let Some(p) = scanner::non_quoted_find(&self.quotes, self.query, op, search) {
            if p + op.len() > to {
                return None;
            }
            if (p..p + op.len()).all(|q| self.ts.text_char(q).is_some()) {
                return Some(p);
            }
            search = p + 1;
        }
        None
    }

    fn check_no_multi_ops(&self, from: usize, to: usize) -> Result<()> {
        for op in ["&&", "||", "\\", "~"] {
            if let Some(p) = self.find_op(op, from, to) {
                return Err(ParseError::Misplaced {
                    found: op.to_owned(),
                    position: p,
                    reason: "read-level operators cannot appear inside brackets",
                }
                .into());
            }
        }
        Ok(())
    }

    /// Joins operator runs inside `from..to`, tightest first.
    fn reduce_range(&mut self, from: usize, to: usize) -> Result<()> {
        self.apply_sticks();
        self.reduce_runs(from, to, Joiner::Sequence)?;
        self.reduce_runs(from, to, Joiner::And)?;
        self.reduce_runs(from, to, Joiner::Or)
    }

    fn reduce_runs(&mut self, from: usize, to: usize, joiner: Joiner) -> Result<()> {
        loop {
            self.ts.cleanup();
            let Some(run) = self.find_run(from, to, joiner) else {
                return Ok(());
            };
            let (span_start, span_end) = {
                let entries = self.ts.entries();
                (entries[run[0]].start, entries[*run.last().unwrap()].end)
            };
            let mut ops = Vec::with_capacity(run.len());
            for &idx in &run {
                match self.ts.take_token(idx) {
                    Token::Pattern(p) => ops.push(p),
                    _ => unreachable!(),
                }
            }
            check_no_wildcard(&ops, span_start)?;
            let conf = self.conf_for(span_start, span_end);
            let node = match joiner {
                Joiner::Sequence => {
                    SinglePattern::Sequence(SequencePattern::new(conf, ops)?)
                }
                Joiner::And => SinglePattern::And(AndPattern::new(conf, ops)?),
                Joiner::Or => SinglePattern::Or(OrPattern::new(conf, ops)?),
            };
            self.ts.replace(span_start, span_end, Token::Pattern(node));
        }
    }

    /// Indices of the first maximal run of two or more patterns joined by
    /// the given operator inside `from..to`.
    fn find_run(&self, from: usize, to: usize, joiner: Joiner) -> Option<Vec<usize>> {
        let mut i = 0;
        while i < self.ts.entries().len() {
            if !self.pattern_in_range(i, from, to) {
                i += 1;
                continue;
            }
            let mut run = vec![i];
            let mut j = i + 1;
            loop {
                let next = match joiner {
                    // adjacency or an explicit `+`
                    Joiner::Sequence => {
                        if self.pattern_in_range(j, from, to) {
                            Some(j)
                        } else if self.separator_is(j, "+", to)
                            && self.pattern_in_range(j + 1, from, to)
                        {
                            Some(j + 1)
                        } else {
                            None
                        }
                    }
                    Joiner::And => (self.separator_is(j, "&", to)
                        && self.pattern_in_range(j + 1, from, to))
                    .then_some(j + 1),
                    Joiner::Or => (self.separator_is(j, "|", to)
                        && self.pattern_in_range(j + 1, from, to))
                    .then_some(j + 1),
                };
                let Some(next) = next else { break };
                run.push(next);
                j = next + 1;
            }
            if run.len() >= 2 {
                return Some(run);
            }
            i = j;
        }
        None
    }

    fn pattern_in_range(&self, idx: usize, from: usize, to: usize) -> bool {
        self.ts.entries().get(idx).map_or(false, |e| {
            e.start >= from && e.end <= to && matches!(e.token, Token::Pattern(_))
        })
    }

    fn separator_is(&self, idx: usize, op: &str, to: usize) -> bool {
        self.ts.entries().get(idx).map_or(false, |e| {
            e.end <= to
                && matches!(e.token, Token::Text)
                && self.query[e.start..e.end].trim() == op
        })
    }

    /// The single pattern covering `from..to`; anything else left in the
    /// range is a grammar error.
    fn take_single_in(&mut self, from: usize, to: usize) -> Result<SinglePattern> {
        let mut found: Option<usize> = None;
        for (i, e) in self.ts.entries().iter().enumerate() {
            if e.end <= from || e.start >= to {
                continue;
            }
            let bad = match &e.token {
                Token::Pattern(_) => {
                    if found.is_some() {
                        true
                    } else {
                        found = Some(i);
                        false
                    }
                }
                Token::Null => false,
                Token::Text => {
                    let lo = e.start.max(from);
                    let hi = e.end.min(to);
                    !self.query[lo..hi].trim().is_empty()
                }
                _ => true,
            };
            if bad {
                return Err(ParseError::UnconsumedTokens {
                    tokens: self.range_text(from, to),
                }
                .into());
            }
        }
        let Some(i) = found else {
            return Err(ParseError::MalformedArguments {
                construct: String::from("query"),
                position: from,
                reason: "expected a pattern here",
            }
            .into());
        };
        match self.ts.take_token(i) {
            Token::Pattern(p) => Ok(p),
            _ => unreachable!(),
        }
    }

    fn range_text(&self, from: usize, to: usize) -> String {
        let parts: Vec<String> = self
            .ts
            .entries()
            .iter()
            .filter(|e| matches!(e.token, Token::Text) && e.start < to && e.end > from)
            .map(|e| self.query[e.start.max(from)..e.end.min(to)].trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("'{s}'"))
            .collect();
        if parts.is_empty() {
            String::from("adjacent patterns with no joining operator")
        } else {
            parts.join(", ")
        }
    }

    /// Wraps bracket-reduced patterns adjoined by `^` or `$` in stick
    /// filters. Anchors adjacent to letters were consumed as fixed borders
    /// already; only bracket nodes reach this pass.
    fn apply_sticks(&mut self) {
        loop {
            let mut action: Option<(usize, usize, usize, bool)> = None;
            for (i, e) in self.ts.entries().iter().enumerate() {
                if !matches!(e.token, Token::Text) {
                    continue;
                }
                let content = &self.query[e.start..e.end];
                let trimmed_end = content.trim_end();
                if trimmed_end.ends_with('^') {
                    if let Some(next) = self.ts.entries().get(i + 1) {
                        if matches!(next.token, Token::Pattern(_)) {
                            let caret = e.start + trimmed_end.len() - 1;
                            action = Some((i + 1, caret, next.end, true));
                        }
                    }
                }
                if action.is_none() {
                    let trimmed_start = content.trim_start();
                    if trimmed_start.starts_with('$') && i > 0 {
                        let prev = &self.ts.entries()[i - 1];
                        if matches!(prev.token, Token::Pattern(_)) {
                            let dollar = e.start + (content.len() - trimmed_start.len());
                            action = Some((i - 1, prev.start, dollar + 1, false));
                        }
                    }
                }
                if action.is_some() {
                    break;
                }
            }
            let Some((idx, start, end, left)) = action else { return };
            let Token::Pattern(p) = self.ts.take_token(idx) else {
                unreachable!()
            };
            let position = if left {
                BorderPosition::FromStart(0)
            } else {
                BorderPosition::FromEnd(0)
            };
            let node =
                SinglePattern::Filter(FilterPattern::new(Filter::Stick { left, position }, p));
            self.ts.replace(start, end, Token::Pattern(node));
        }
    }

    /// The config for a pattern built over `start..end`: the deepest score
    /// threshold bracket strictly containing the span, if any.
    fn conf_for(&self, start: usize, end: usize) -> Arc<PatternConfig> {
        let mut best: Option<&ThresholdSpan> = None;
        for t in &self.thresholds {
            let node_inside = t.open < start && end <= t.close;
            let bracket_inside = start <= t.open && t.close < end;
            let disjoint = end <= t.open || start > t.close;
            assert!(
                node_inside || bracket_inside || disjoint,
                "pattern span {start}..{end} crosses a score threshold bracket"
            );
            if node_inside && best.map_or(true, |b| t.nested_level > b.nested_level) {
                best = Some(t);
            }
        }
        best.map_or_else(|| self.conf.clone(), |t| t.conf.clone())
    }

    fn parse_usize(&self, text: &str, position: usize) -> Result<usize> {
        text.parse().map_err(|_| {
            ParseError::InvalidNumber {
                text: text.to_owned(),
                position,
            }
            .into()
        })
    }

    fn brace_closing_at(&self, pos: usize) -> Option<BracketPair> {
        self.braces.iter().find(|b| b.close == pos).copied()
    }

    fn brace_opening_at(&self, pos: usize) -> Option<BracketPair> {
        self.braces.iter().find(|b| b.open == pos).copied()
    }

    /// Nearest preceding position still held by raw text, looking through
    /// consumed group markers.
    fn prev_text_char(&self, pos: usize) -> Option<(usize, u8)> {
        let mut p = pos;
        while p > 0 {
            p -= 1;
            if self.ts.is_null_at(p) {
                continue;
            }
            return self.ts.text_char(p).map(|c| (p, c));
        }
        None
    }

    fn next_text_char(&self, pos: usize) -> Option<(usize, u8)> {
        let mut p = pos;
        while p < self.query.len() {
            if self.ts.is_null_at(p) {
                p += 1;
                continue;
            }
            return self.ts.text_char(p).map(|c| (p, c));
        }
        None
    }
}

fn check_no_wildcard(ops: &[SinglePattern], position: usize) -> Result<()> {
    if ops.iter().any(|op| matches!(op, SinglePattern::Any(_))) {
        return Err(ParseError::Misplaced {
            found: String::from("*"),
            position,
            reason: "a lone wildcard matches the whole read and cannot be combined",
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, ScanError};
    use crate::sequence::TargetSet;

    fn conf() -> Arc<PatternConfig> {
        Arc::new(PatternConfig::default())
    }

    fn single(pattern: &Pattern) -> &SinglePattern {
        let Pattern::Single(SinglePattern::FullRead(full)) = pattern else {
            panic!("expected a single-read pattern, got {pattern:?}");
        };
        full.operand()
    }

    fn edge(name: &str, is_start: bool, position: usize) -> GroupEdgePosition {
        GroupEdgePosition::new(GroupEdge::new(name, is_start).unwrap(), position)
    }

    fn best_score(pattern: &Pattern, seq: &[u8]) -> Option<i64> {
        let seqs = [seq];
        let targets = TargetSet::from_seqs(seqs);
        pattern.search(&targets).best_match(true).map(|m| m.score())
    }

    #[test]
    fn plain_literal_becomes_a_full_read_fuzzy_pattern() {
        let p = parse("ATTA", conf()).unwrap();
        assert!(matches!(single(&p), SinglePattern::Fuzzy(_)));
        assert_eq!(best_score(&p, b"GGATTAGG"), Some(0));
    }

    #[test]
    fn juxtaposition_binds_tighter_than_and_which_beats_or() {
        let p = parse("ATTA GACA & TTTT | CCCC", conf()).unwrap();
        let SinglePattern::Or(or) = single(&p) else {
            panic!("expected an alternation at the top");
        };
        assert_eq!(or.operands().len(), 2);
        let SinglePattern::And(and) = &or.operands()[0] else {
            panic!("expected a conjunction on the left");
        };
        assert!(matches!(&and.operands()[0], SinglePattern::Sequence(s) if s.operands().len() == 2));
        assert!(matches!(&and.operands()[1], SinglePattern::Fuzzy(_)));
        assert!(matches!(&or.operands()[1], SinglePattern::Fuzzy(_)));
    }

    #[test]
    fn plus_is_the_explicit_sequence_operator() {
        let p = parse("ATTA + GACA", conf()).unwrap();
        let SinglePattern::Sequence(seq) = single(&p) else {
            panic!("expected a sequence");
        };
        assert_eq!(seq.operands().len(), 2);
    }

    #[test]
    fn group_markers_collate_into_one_literal() {
        let p = parse("(G1:ATTA(G2:GACA))", conf()).unwrap();
        let SinglePattern::Fuzzy(fuzzy) = single(&p) else {
            panic!("expected one collated literal");
        };
        assert_eq!(fuzzy.seq(), b"ATTAGACA");
        assert_eq!(
            fuzzy.group_edges(),
            &[
                edge("G1", true, 0),
                edge("G1", false, 8),
                edge("G2", true, 4),
                edge("G2", false, 8),
            ]
        );
    }

    #[test]
    fn groups_may_span_adjacent_constructs() {
        let p = parse("(G:ATTA C{2})", conf()).unwrap();
        let SinglePattern::Sequence(seq) = single(&p) else {
            panic!("expected a sequence inside the group");
        };
        let SinglePattern::Fuzzy(fuzzy) = &seq.operands()[0] else {
            panic!("expected a literal first");
        };
        assert_eq!(fuzzy.group_edges(), &[edge("G", true, 0)]);
        let SinglePattern::Repeat(rep) = &seq.operands()[1] else {
            panic!("expected a repeat second");
        };
        assert_eq!(rep.group_edges(), &[edge("G", false, 2)]);
    }

    #[test]
    fn empty_group_name_is_rejected() {
        let err = parse("(:ACGT)", conf()).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::EmptyGroupName { position: 0 })
        ));
    }

    #[test]
    fn unterminated_quote_is_a_scan_error() {
        let err = parse("ACGT'", conf()).unwrap_err();
        assert!(matches!(
            err,
            Error::Scan(ScanError::UnterminatedQuote { .. })
        ));
    }

    #[test]
    fn group_over_an_operator_is_rejected() {
        let err = parse("(G:ATTA|GACA)", conf()).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::GroupOverOperator {
                operator: '|',
                ..
            })
        ));
    }

    #[test]
    fn alternation_branches_must_declare_the_same_groups() {
        let err = parse("(G:ATTA)|GACA", conf()).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::AlternationGroupMismatch { .. })
        ));
    }

    #[test]
    fn score_threshold_brackets_tighten_the_config() {
        let p = parse("[-5: ATTA]", conf()).unwrap();
        let SinglePattern::Filter(filter) = single(&p) else {
            panic!("expected a score filter wrapper");
        };
        assert_eq!(filter.filter(), Filter::Score(-5));
        // one substitution scores -9: under the default -20 it would match
        assert_eq!(best_score(&p, b"GGATTCGG"), None);
        let base = parse("ATTA", conf()).unwrap();
        assert!(best_score(&base, b"GGATTCGG").is_some());
    }

    #[test]
    fn repeats_carry_their_bounds_and_group_edges() {
        let p = parse("(UMI:N{4})ATTA", conf()).unwrap();
        let SinglePattern::Sequence(seq) = single(&p) else {
            panic!("expected repeat and literal in sequence");
        };
        let SinglePattern::RepeatN(rep) = &seq.operands()[0] else {
            panic!("expected an N repeat first");
        };
        assert_eq!(
            rep.group_edges(),
            &[edge("UMI", true, 0), edge("UMI", false, 4)]
        );
        assert!(matches!(&seq.operands()[1], SinglePattern::Fuzzy(_)));
    }

    #[test]
    fn open_ended_repeat_bounds() {
        let p = parse("A{2:}", conf()).unwrap();
        let SinglePattern::Repeat(rep) = single(&p) else {
            panic!("expected a repeat");
        };
        assert_eq!((rep.min_repeats(), rep.max_repeats()), (2, None));

        let p = parse("A{*}", conf()).unwrap();
        let SinglePattern::Repeat(rep) = single(&p) else {
            panic!("expected a repeat");
        };
        assert_eq!((rep.min_repeats(), rep.max_repeats()), (1, None));
    }

    #[test]
    fn anchors_adjacent_to_letters_become_fixed_borders() {
        let p = parse("^ATTA$", conf()).unwrap();
        assert!(matches!(single(&p), SinglePattern::Fuzzy(_)));
        assert_eq!(best_score(&p, b"ATTA"), Some(0));
        // Both borders fixed force one global alignment over the whole
        // read; the extra C costs a single gap.
        assert_eq!(best_score(&p, b"CATTA"), Some(-10));
        // Three extra symbols fall below the default score threshold.
        assert_eq!(best_score(&p, b"CCCATTA"), None);
    }

    #[test]
    fn left_cut_allows_a_truncated_start() {
        let p = parse("<ATTA", conf()).unwrap();
        assert_eq!(best_score(&p, b"TTAGGG"), Some(0));
        let plain = parse("ATTA", conf()).unwrap();
        assert!(best_score(&plain, b"TTAGGG").unwrap_or(i64::MIN) < 0);
    }

    #[test]
    fn counted_cut_uses_brace_syntax() {
        let p = parse("<{2}ATTAGC", conf()).unwrap();
        assert!(matches!(single(&p), SinglePattern::Fuzzy(_)));
        assert_eq!(best_score(&p, b"TAGCGGG"), Some(0));
    }

    #[test]
    fn sticks_wrap_bracketed_patterns() {
        let p = parse("^(ATTA GACA)", conf()).unwrap();
        let SinglePattern::Filter(filter) = single(&p) else {
            panic!("expected a stick wrapper");
        };
        assert_eq!(
            filter.filter(),
            Filter::Stick {
                left: true,
                position: BorderPosition::FromStart(0)
            }
        );
        assert!(matches!(filter.operand(), SinglePattern::Sequence(_)));
    }

    #[test]
    fn wildcard_matches_a_whole_read() {
        let p = parse("(G:*)", conf()).unwrap();
        let SinglePattern::Any(any) = single(&p) else {
            panic!("expected a wildcard");
        };
        assert_eq!(any.group_edges().len(), 2);
    }

    #[test]
    fn wildcard_cannot_be_combined() {
        let err = parse("ATTA & *", conf()).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Misplaced { .. })));
    }

    #[test]
    fn read_operators_split_outermost_first() {
        let p = parse("ATTA \\ GACA && TTTT \\ CCCC || ~AAAA", conf()).unwrap();
        let Pattern::Multi(MultiPattern::Or(or)) = &p else {
            panic!("expected a record-level alternation");
        };
        assert_eq!(or.operands().len(), 2);
        let MultiPattern::And(and) = &or.operands()[0] else {
            panic!("expected a record-level conjunction on the left");
        };
        assert!(matches!(
            &and.operands()[0],
            MultiPattern::Multi(m) if m.operands().len() == 2
        ));
        assert!(matches!(&or.operands()[1], MultiPattern::Not(_)));
    }

    #[test]
    fn read_operators_are_banned_inside_brackets() {
        let err = parse("(ATTA && GACA)", conf()).unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError::Misplaced { reason, .. })
                if reason.contains("inside brackets")
        ));
    }

    #[test]
    fn group_around_a_score_bracket_has_nothing_to_hold() {
        let err = parse("(G:[0:ATTA])", conf()).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Misplaced { .. })));
    }

    #[test]
    fn non_ascii_and_empty_queries_are_rejected() {
        assert!(matches!(
            parse("   ", conf()).unwrap_err(),
            Error::Parse(ParseError::EmptyQuery)
        ));
        assert!(matches!(
            parse("ATT\u{c5}", conf()).unwrap_err(),
            Error::Parse(ParseError::NonAscii { position: 3 })
        ));
    }

    #[test]
    fn leftover_text_is_named_in_the_error() {
        let err = parse("ATTA @#", conf()).unwrap_err();
        let Error::Parse(ParseError::UnconsumedTokens { tokens }) = err else {
            panic!("expected an unconsumed-token error");
        };
        assert!(tokens.contains("@#"), "{tokens}");
    }

    #[test]
    fn searching_a_parsed_multi_pattern() {
        let p = parse("ATTA \\ GACA", conf()).unwrap();
        let seqs: [&[u8]; 2] = [b"CCATTACC", b"GACATTTT"];
        let targets = TargetSet::from_seqs(seqs);
        let m = p.search(&targets).best_match(true).unwrap();
        assert_eq!(m.score(), 0);
        assert_eq!(m.target_count(), 2);
    }
}
