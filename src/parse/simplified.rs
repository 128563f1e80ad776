//! The constructor-form grammar, the exact notation the display code emits.
//!
//! A query names pattern constructors explicitly, for example
//! `FullReadPattern(FuzzyMatchPattern(ATTA, 0, 0, -1, -1, []))`. Pairs are
//! reduced innermost first, so by the time a constructor's arguments are
//! split on commas every nested construct is already a reduced token.
//! Borders are written as sentinels: -1 unset, `p` counted from the read
//! start, `-2-k` counted from the read end.

use std::sync::Arc;

use crate::config::PatternConfig;
use crate::errors::{ParseError, Result};
use crate::groups::{BorderPosition, GroupEdge, GroupEdgePosition};
use crate::parse::scanner::{self, BracketKind, QuoteSpan};
use crate::parse::tokens::{Token, TokenizedString};
use crate::pattern::{
    validate_group_edges, AndOperator, AndPattern, AnyPattern, Filter, FilterPattern,
    FullReadPattern, FuzzyMatchPattern, MultiFilterPattern, MultiPattern, MultiReadPattern,
    NotOperator, OrOperator, OrPattern, Pattern, RepeatNPattern, RepeatPattern, SequencePattern,
    SinglePattern,
};

pub(crate) fn parse(query: &str, conf: Arc<PatternConfig>) -> Result<Pattern> {
    if query.trim().is_empty() {
        return Err(ParseError::EmptyQuery.into());
    }
    if let Some(position) = query.bytes().position(|b| !b.is_ascii()) {
        return Err(ParseError::NonAscii { position }.into());
    }
    let quotes = scanner::find_all_quotes(query)?;
    let mut pairs = scanner::find_all_brackets(query, BracketKind::Paren)?;
    pairs.sort_by_key(|p| p.close - p.open);

    let mut parser = SimplifiedParser {
        query,
        conf,
        quotes,
        ts: TokenizedString::new(query),
    };
    for pair in pairs {
        parser.reduce_call(pair.open, pair.close)?;
    }
    let pattern = parser.ts.into_pattern()?;
    validate_group_edges(&pattern)?;
    Ok(pattern.assign_target_ids())
}

/// One parsed argument: a reduced construct, a literal, or a bracket list.
enum ArgValue {
    Token(Token),
    Text(String),
    List(Vec<ArgValue>),
}

struct SimplifiedParser<'q> {
    query: &'q str,
    conf: Arc<PatternConfig>,
    quotes: Vec<QuoteSpan>,
    ts: TokenizedString<'q>,
}

impl<'q> SimplifiedParser<'q> {
    fn reduce_call(&mut self, open: usize, close: usize) -> Result<()> {
        let mut name_start = open;
        while name_start > 0
            && self.ts.text_char(name_start - 1).map_or(false, |c| c.is_ascii_alphabetic())
        {
            name_start -= 1;
        }
        if name_start == open {
            return Err(ParseError::Misplaced {
                found: String::from("("),
                position: open,
                reason: "expected a constructor name before the parenthesis",
            }
            .into());
        }
        let name = &self.query[name_start..open];

        let args = self.parse_args(open + 1, close)?;
        let token = self.build(name, open, args)?;
        self.ts.replace(name_start, close + 1, token);
        Ok(())
    }

    fn parse_args(&mut self, from: usize, to: usize) -> Result<Vec<ArgValue>> {
        let (lo, hi) = self.significant_bounds(from, to);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        for (f, t) in self.split_on_commas(from, to) {
            args.push(self.arg_value(f, t)?);
        }
        Ok(args)
    }

    /// Splits on commas outside quotes and square brackets. Characters
    /// belonging to reduced tokens are no longer text and cannot split.
    fn split_on_commas(&self, from: usize, to: usize) -> Vec<(usize, usize)> {
        let mut parts = Vec::new();
        let mut depth = 0i64;
        let mut cursor = from;
        let mut pos = from;
        while pos < to {
            let outside = scanner::next_outside_quotes(&self.quotes, pos);
            if outside > pos {
                pos = outside;
                continue;
            }
            match self.ts.text_char(pos) {
                Some(b'[') => depth += 1,
                Some(b']') => depth -= 1,
                Some(b',') if depth == 0 => {
                    parts.push((cursor, pos));
                    cursor = pos + 1;
                }
                _ => {}
            }
            pos += 1;
        }
        parts.push((cursor, to));
        parts
    }

    fn arg_value(&mut self, from: usize, to: usize) -> Result<ArgValue> {
        let (lo, hi) = self.significant_bounds(from, to);
        if lo >= hi {
            return Err(ParseError::MalformedArguments {
                construct: String::from("constructor"),
                position: from,
                reason: "empty argument",
            }
            .into());
        }
        if let Some(idx) = self.reduced_entry_at(lo, hi) {
            return Ok(ArgValue::Token(self.ts.take_token(idx)));
        }
        if self.ts.text_char(lo) == Some(b'[') && self.ts.text_char(hi - 1) == Some(b']') {
            let (ilo, ihi) = self.significant_bounds(lo + 1, hi - 1);
            if ilo >= ihi {
                return Ok(ArgValue::List(Vec::new()));
            }
            let mut items = Vec::new();
            for (f, t) in self.split_on_commas(lo + 1, hi - 1) {
                items.push(self.arg_value(f, t)?);
            }
            return Ok(ArgValue::List(items));
        }
        for pos in lo..hi {
            if self.ts.text_char(pos).is_none() {
                return Err(ParseError::MalformedArguments {
                    construct: String::from("constructor"),
                    position: lo,
                    reason: "argument mixes a construct with loose text",
                }
                .into());
            }
        }
        Ok(ArgValue::Text(self.query[lo..hi].trim().to_owned()))
    }

    /// The index of a reduced token spanning exactly `lo..hi`, if any.
    fn reduced_entry_at(&self, lo: usize, hi: usize) -> Option<usize> {
        self.ts.entries().iter().position(|e| {
            e.start == lo
                && e.end == hi
                && !matches!(e.token, Token::Text | Token::Null)
        })
    }

    fn significant_bounds(&self, from: usize, to: usize) -> (usize, usize) {
        let mut lo = from;
        while lo < to
            && matches!(self.ts.text_char(lo), Some(c) if c.is_ascii_whitespace())
        {
            lo += 1;
        }
        let mut hi = to;
        while hi > lo
            && matches!(self.ts.text_char(hi - 1), Some(c) if c.is_ascii_whitespace())
        {
            hi -= 1;
        }
        (lo, hi)
    }

    fn build(&self, name: &str, open: usize, args: Vec<ArgValue>) -> Result<Token> {
        let token = match name {
            "FuzzyMatchPattern" => {
                let (fixed, edges) = split_trailing_list(args);
                let edges = edge_positions(name, open, edges)?;
                let mut it = fixed.into_iter();
                let seq = text_arg(name, open, it.next())?;
                let rest = it.len();
                if rest != 0 && rest != 2 && rest != 4 {
                    return Err(bad_args(name, open, "expected 1, 3 or 5 leading arguments"));
                }
                let (left_cut, right_cut) = if rest >= 2 {
                    (usize_arg(name, open, it.next())?, usize_arg(name, open, it.next())?)
                } else {
                    (0, 0)
                };
                let (fixed_left, fixed_right) = if rest == 4 {
                    (border_arg(name, open, it.next())?, border_arg(name, open, it.next())?)
                } else {
                    (None, None)
                };
                Token::Pattern(SinglePattern::Fuzzy(FuzzyMatchPattern::with_borders(
                    self.conf.clone(),
                    seq.as_bytes(),
                    left_cut,
                    right_cut,
                    fixed_left,
                    fixed_right,
                    edges,
                )?))
            }
            "RepeatPattern" | "RepeatNPattern" => {
                let (fixed, edges) = split_trailing_list(args);
                let edges = edge_positions(name, open, edges)?;
                let mut it = fixed.into_iter();
                let letter = letter_arg(name, open, it.next())?;
                let min = usize_arg(name, open, it.next())?;
                let max = match i64_arg(name, open, it.next())? {
                    -1 => None,
                    n if n >= 0 => Some(n as usize),
                    _ => return Err(bad_args(name, open, "negative repeat bound")),
                };
                let (fixed_left, fixed_right) = match it.len() {
                    0 => (None, None),
                    2 => (
                        border_arg(name, open, it.next())?,
                        border_arg(name, open, it.next())?,
                    ),
                    _ => return Err(bad_args(name, open, "expected 3 or 5 leading arguments")),
                };
                let node = if name == "RepeatNPattern" {
                    SinglePattern::RepeatN(RepeatNPattern::with_borders(
                        self.conf.clone(),
                        letter,
                        min,
                        max,
                        fixed_left,
                        fixed_right,
                        edges,
                    )?)
                } else {
                    SinglePattern::Repeat(RepeatPattern::with_borders(
                        self.conf.clone(),
                        letter,
                        min,
                        max,
                        fixed_left,
                        fixed_right,
                        edges,
                    )?)
                };
                Token::Pattern(node)
            }
            "AnyPattern" => {
                let edges = match one_optional_list(name, open, args)? {
                    Some(items) => plain_edges(name, open, items)?,
                    None => Vec::new(),
                };
                Token::Pattern(SinglePattern::Any(AnyPattern::new(edges)?))
            }
            "AndPattern" | "SequencePattern" | "OrPattern" | "MultiReadPattern" => {
                let ops = singles(name, open, one_list(name, open, args)?)?;
                let conf = self.conf.clone();
                let node = match name {
                    "AndPattern" => SinglePattern::And(AndPattern::new(conf, ops)?),
                    "SequencePattern" => {
                        SinglePattern::Sequence(SequencePattern::new(conf, ops)?)
                    }
                    "OrPattern" => SinglePattern::Or(OrPattern::new(conf, ops)?),
                    _ => {
                        return Ok(Token::Multi(MultiPattern::Multi(MultiReadPattern::new(
                            conf, ops,
                        )?)))
                    }
                };
                Token::Pattern(node)
            }
            "AndOperator" | "OrOperator" => {
                let ops = multis(name, open, one_list(name, open, args)?)?;
                let conf = self.conf.clone();
                if name == "AndOperator" {
                    Token::Multi(MultiPattern::And(AndOperator::new(conf, ops)?))
                } else {
                    Token::Multi(MultiPattern::Or(OrOperator::new(conf, ops)?))
                }
            }
            "NotOperator" => {
                let m = multi_arg(name, open, Some(one_arg(name, open, args)?))?;
                Token::Multi(MultiPattern::Not(NotOperator::new(m)))
            }
            "FullReadPattern" => {
                let p = single_arg(name, open, Some(one_arg(name, open, args)?))?;
                Token::Pattern(SinglePattern::FullRead(FullReadPattern::new(p)))
            }
            "FilterPattern" | "MultiFilterPattern" => {
                let mut it = exactly(name, open, args, 2)?.into_iter();
                let filter = filter_arg(name, open, it.next())?;
                let operand = it.next();
                if name == "FilterPattern" {
                    let p = single_arg(name, open, operand)?;
                    Token::Pattern(SinglePattern::Filter(FilterPattern::new(filter, p)))
                } else {
                    let m = multi_arg(name, open, operand)?;
                    Token::Multi(MultiPattern::Filter(MultiFilterPattern::new(filter, m)?))
                }
            }
            "ScoreFilter" => {
                let n = i64_arg(name, open, Some(one_arg(name, open, args)?))?;
                Token::Filter(Filter::Score(n))
            }
            "StickFilter" => {
                let mut it = exactly(name, open, args, 2)?.into_iter();
                let left = bool_arg(name, open, it.next())?;
                let sentinel = i64_arg(name, open, it.next())?;
                let Some(position) = BorderPosition::from_sentinel(sentinel) else {
                    return Err(bad_args(name, open, "stick filter needs a concrete position"));
                };
                Token::Filter(Filter::Stick { left, position })
            }
            "GroupEdge" => {
                let mut it = exactly(name, open, args, 2)?.into_iter();
                let group = quoted_arg(name, open, it.next())?;
                let is_start = bool_arg(name, open, it.next())?;
                Token::Edge(GroupEdge::new(group, is_start)?)
            }
            "GroupEdgePosition" => {
                let mut it = exactly(name, open, args, 2)?.into_iter();
                let edge = match it.next() {
                    Some(ArgValue::Token(Token::Edge(e))) => e,
                    _ => return Err(bad_args(name, open, "expected a group edge")),
                };
                let position = usize_arg(name, open, it.next())?;
                Token::EdgePosition(GroupEdgePosition::new(edge, position))
            }
            _ => {
                return Err(ParseError::UnknownConstructor {
                    name: name.to_owned(),
                    position: open,
                }
                .into())
            }
        };
        Ok(token)
    }
}

/// Detaches a trailing bracket list from positional arguments.
fn split_trailing_list(mut args: Vec<ArgValue>) -> (Vec<ArgValue>, Vec<ArgValue>) {
    if matches!(args.last(), Some(ArgValue::List(_))) {
        let Some(ArgValue::List(items)) = args.pop() else {
            unreachable!()
        };
        (args, items)
    } else {
        (args, Vec::new())
    }
}

fn bad_args(construct: &str, position: usize, reason: &'static str) -> crate::errors::Error {
    ParseError::MalformedArguments {
        construct: construct.to_owned(),
        position,
        reason,
    }
    .into()
}

fn exactly(
    name: &str,
    open: usize,
    args: Vec<ArgValue>,
    n: usize,
) -> Result<Vec<ArgValue>> {
    if args.len() != n {
        return Err(bad_args(name, open, "wrong number of arguments"));
    }
    Ok(args)
}

fn one_arg(name: &str, open: usize, args: Vec<ArgValue>) -> Result<ArgValue> {
    let mut args = exactly(name, open, args, 1)?;
    Ok(args.pop().unwrap_or_else(|| unreachable!()))
}

fn one_list(name: &str, open: usize, args: Vec<ArgValue>) -> Result<Vec<ArgValue>> {
    match one_arg(name, open, args)? {
        ArgValue::List(items) => Ok(items),
        _ => Err(bad_args(name, open, "expected a bracket list")),
    }
}

fn one_optional_list(
    name: &str,
    open: usize,
    args: Vec<ArgValue>,
) -> Result<Option<Vec<ArgValue>>> {
    if args.is_empty() {
        return Ok(None);
    }
    one_list(name, open, args).map(Some)
}

fn text_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<String> {
    match arg {
        Some(ArgValue::Text(t)) => Ok(t),
        _ => Err(bad_args(name, open, "expected a literal argument")),
    }
}

fn letter_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<u8> {
    let text = text_arg(name, open, arg)?;
    match text.as_bytes() {
        [c] => Ok(*c),
        _ => Err(bad_args(name, open, "expected a single letter")),
    }
}

fn i64_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<i64> {
    let text = text_arg(name, open, arg)?;
    text.parse().map_err(|_| {
        ParseError::InvalidNumber {
            text,
            position: open,
        }
        .into()
    })
}

fn usize_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<usize> {
    let n = i64_arg(name, open, arg)?;
    usize::try_from(n).map_err(|_| bad_args(name, open, "expected a non-negative number"))
}

fn bool_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<bool> {
    match text_arg(name, open, arg)?.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(bad_args(name, open, "expected true or false")),
    }
}

fn border_arg(
    name: &str,
    open: usize,
    arg: Option<ArgValue>,
) -> Result<Option<BorderPosition>> {
    Ok(BorderPosition::from_sentinel(i64_arg(name, open, arg)?))
}

fn quoted_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<String> {
    let text = text_arg(name, open, arg)?;
    let bytes = text.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'\'' || bytes[bytes.len() - 1] != b'\'' {
        return Err(bad_args(name, open, "expected a quoted name"));
    }
    let mut out = String::with_capacity(text.len());
    let mut escape = false;
    for c in text[1..text.len() - 1].chars() {
        if escape {
            out.push(c);
            escape = false;
        } else if c == '\\' {
            escape = true;
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn single_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<SinglePattern> {
    match arg {
        Some(ArgValue::Token(Token::Pattern(p))) => Ok(p),
        _ => Err(bad_args(name, open, "expected a single-read pattern argument")),
    }
}

fn multi_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<MultiPattern> {
    match arg {
        Some(ArgValue::Token(Token::Multi(m))) => Ok(m),
        _ => Err(bad_args(name, open, "expected a record-level pattern argument")),
    }
}

fn filter_arg(name: &str, open: usize, arg: Option<ArgValue>) -> Result<Filter> {
    match arg {
        Some(ArgValue::Token(Token::Filter(f))) => Ok(f),
        _ => Err(bad_args(name, open, "expected a filter argument")),
    }
}

fn singles(
    name: &str,
    open: usize,
    items: Vec<ArgValue>,
) -> Result<Vec<SinglePattern>> {
    items
        .into_iter()
        .map(|item| single_arg(name, open, Some(item)))
        .collect()
}

fn multis(name: &str, open: usize, items: Vec<ArgValue>) -> Result<Vec<MultiPattern>> {
    items
        .into_iter()
        .map(|item| multi_arg(name, open, Some(item)))
        .collect()
}

fn edge_positions(
    name: &str,
    open: usize,
    items: Vec<ArgValue>,
) -> Result<Vec<GroupEdgePosition>> {
    items
        .into_iter()
        .map(|item| match item {
            ArgValue::Token(Token::EdgePosition(gp)) => Ok(gp),
            _ => Err(bad_args(name, open, "expected group edge positions")),
        })
        .collect()
}

fn plain_edges(name: &str, open: usize, items: Vec<ArgValue>) -> Result<Vec<GroupEdge>> {
    items
        .into_iter()
        .map(|item| match item {
            ArgValue::Token(Token::Edge(e)) => Ok(e),
            _ => Err(bad_args(name, open, "expected group edges")),
        })
        .collect()
}
