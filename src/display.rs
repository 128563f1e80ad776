//! Constructor-form formatting and human-facing match rendering.
//!
//! `Display` on a pattern tree prints the exact text
//! [`parse_simplified`](crate::parse_simplified) accepts, so any parsed or
//! hand-built pattern can be stored and reloaded:
//! `FuzzyMatchPattern(ATTA, 0, 0, -1, -1, [])`. Leaf forms always print
//! full arity with `[]` for an empty edge list.

use std::fmt::{self, Write as _};

use colored::Colorize;

use crate::groups::{BorderPosition, GroupEdge, GroupEdgePosition};
use crate::matches::Match;
use crate::pattern::{
    AndOperator, AndPattern, AnyPattern, Filter, FilterPattern, FullReadPattern,
    FuzzyMatchPattern, MultiFilterPattern, MultiPattern, MultiReadPattern, NotOperator,
    OrOperator, OrPattern, Pattern, RepeatNPattern, RepeatPattern, SequencePattern,
    SinglePattern,
};
use crate::sequence::TargetSet;

fn sentinel(border: Option<BorderPosition>) -> i64 {
    border.map_or(-1, |b| b.to_sentinel())
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl fmt::Display for GroupEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupEdge('{}', {})", self.name(), self.is_start())
    }
}

impl fmt::Display for GroupEdgePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupEdgePosition({}, {})", self.edge, self.position)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Score(threshold) => write!(f, "ScoreFilter({threshold})"),
            Filter::Stick { left, position } => {
                write!(f, "StickFilter({left}, {})", position.to_sentinel())
            }
        }
    }
}

impl fmt::Display for FuzzyMatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FuzzyMatchPattern({}, {}, {}, {}, {}, ",
            String::from_utf8_lossy(&self.seq),
            self.left_cut,
            self.right_cut,
            sentinel(self.fixed_left),
            sentinel(self.fixed_right),
        )?;
        write_list(f, self.group_edges())?;
        f.write_str(")")
    }
}

impl fmt::Display for RepeatPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_repeat(f, "RepeatPattern", self.letter, self.min_repeats(), self.max_repeats(),
            self.fixed_left, self.fixed_right, self.group_edges())
    }
}

impl fmt::Display for RepeatNPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_repeat(f, "RepeatNPattern", self.letter, self.min_repeats(), self.max_repeats(),
            self.fixed_left, self.fixed_right, self.group_edges())
    }
}

#[allow(clippy::too_many_arguments)]
fn fmt_repeat(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    letter: u8,
    min: usize,
    max: Option<usize>,
    fixed_left: Option<BorderPosition>,
    fixed_right: Option<BorderPosition>,
    edges: &[GroupEdgePosition],
) -> fmt::Result {
    write!(
        f,
        "{name}({}, {min}, {}, {}, {}, ",
        letter as char,
        max.map_or(-1, |n| n as i64),
        sentinel(fixed_left),
        sentinel(fixed_right),
    )?;
    write_list(f, edges)?;
    f.write_str(")")
}

impl fmt::Display for AnyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnyPattern(")?;
        write_list(f, self.group_edges())?;
        f.write_str(")")
    }
}

impl fmt::Display for AndPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AndPattern(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for SequencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SequencePattern(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for OrPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OrPattern(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for FullReadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullReadPattern({})", self.operand())
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterPattern({}, {})", self.filter(), self.operand())
    }
}

impl fmt::Display for MultiReadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MultiReadPattern(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for AndOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AndOperator(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for OrOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OrOperator(")?;
        write_list(f, self.operands())?;
        f.write_str(")")
    }
}

impl fmt::Display for NotOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotOperator({})", self.operand())
    }
}

impl fmt::Display for MultiFilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiFilterPattern({}, {})", self.filter(), self.operand())
    }
}

impl fmt::Display for SinglePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinglePattern::Fuzzy(p) => p.fmt(f),
            SinglePattern::Repeat(p) => p.fmt(f),
            SinglePattern::RepeatN(p) => p.fmt(f),
            SinglePattern::Any(p) => p.fmt(f),
            SinglePattern::And(p) => p.fmt(f),
            SinglePattern::Sequence(p) => p.fmt(f),
            SinglePattern::Or(p) => p.fmt(f),
            SinglePattern::FullRead(p) => p.fmt(f),
            SinglePattern::Filter(p) => p.fmt(f),
        }
    }
}

impl fmt::Display for MultiPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiPattern::Multi(p) => p.fmt(f),
            MultiPattern::And(p) => p.fmt(f),
            MultiPattern::Or(p) => p.fmt(f),
            MultiPattern::Not(p) => p.fmt(f),
            MultiPattern::Filter(p) => p.fmt(f),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Single(p) => p.fmt(f),
            Pattern::Multi(p) => p.fmt(f),
        }
    }
}

/// Renders a match for terminal inspection: per read, the sequence with the
/// matched span highlighted, then each captured group with its range and
/// content. With `use_color` off the span is bracketed instead, which is
/// what the tests compare against.
pub fn render_match(m: &Match<'_>, targets: &TargetSet<'_>, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "score {}", m.score());
    for id in 1..=m.target_count() {
        let target = targets.get(id);
        let seq = target.seq();
        let hull = m
            .ranges()
            .iter()
            .filter(|r| r.target_id == id)
            .fold(None, |acc: Option<(usize, usize)>, r| match acc {
                None => Some((r.from, r.to)),
                Some((f, t)) => Some((f.min(r.from), t.max(r.to))),
            });
        let line = match hull {
            Some((from, to)) => {
                let pre = String::from_utf8_lossy(&seq[..from]);
                let hit = String::from_utf8_lossy(&seq[from..to]);
                let post = String::from_utf8_lossy(&seq[to..]);
                if use_color {
                    format!("{pre}{}{post}", hit.green().bold())
                } else {
                    format!("{pre}[{hit}]{post}")
                }
            }
            None => String::from_utf8_lossy(seq).into_owned(),
        };
        let _ = writeln!(out, "R{id}  {line}");
        for g in m.groups().iter().filter(|g| g.target_id == id) {
            let span = match g.range {
                Some((from, to)) => format!("{from}..{to}"),
                None => String::from("override"),
            };
            let content = String::from_utf8_lossy(&g.seq);
            if use_color {
                let _ = writeln!(out, "  {}  {span}  {content}", g.name.cyan());
            } else {
                let _ = writeln!(out, "  {}  {span}  {content}", g.name);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PatternConfig;
    use crate::parse::{parse_query, parse_simplified};

    fn conf() -> Arc<PatternConfig> {
        Arc::new(PatternConfig::default())
    }

    #[test]
    fn leaf_prints_full_arity() {
        let p = FuzzyMatchPattern::new(conf(), b"ATTA", vec![]).unwrap();
        assert_eq!(p.to_string(), "FuzzyMatchPattern(ATTA, 0, 0, -1, -1, [])");
    }

    #[test]
    fn edges_and_borders_print_inside_the_leaf() {
        let edges = vec![
            GroupEdgePosition::new(GroupEdge::start("UMI").unwrap(), 0),
            GroupEdgePosition::new(GroupEdge::end("UMI").unwrap(), 4),
        ];
        let p = FuzzyMatchPattern::with_borders(
            conf(),
            b"ATTA",
            0,
            0,
            Some(BorderPosition::FromStart(0)),
            None,
            edges,
        )
        .unwrap();
        assert_eq!(
            p.to_string(),
            "FuzzyMatchPattern(ATTA, 0, 0, 0, -1, \
             [GroupEdgePosition(GroupEdge('UMI', true), 0), \
              GroupEdgePosition(GroupEdge('UMI', false), 4)])"
        );
    }

    #[test]
    fn from_end_borders_use_negative_sentinels() {
        let p = RepeatPattern::with_borders(
            conf(),
            b'A',
            2,
            None,
            None,
            Some(BorderPosition::FromEnd(0)),
            vec![],
        )
        .unwrap();
        assert_eq!(p.to_string(), "RepeatPattern(A, 2, -1, -1, -2, [])");
    }

    #[test]
    fn printing_a_parsed_query_round_trips() {
        for query in [
            "(UMI:N{4})ATTA",
            "ATTA & GACA | TTTT",
            "[-7: <{1}ATTAGC ]",
            "^ATTA $",
            "ATTA \\ GACA && TTTT \\ CCCC",
            "~AAAA || CCCC \\ *",
        ] {
            let parsed = parse_query(query, conf()).unwrap();
            let printed = parsed.to_string();
            let reparsed = parse_simplified(&printed, conf()).unwrap();
            assert_eq!(printed, reparsed.to_string(), "query {query:?}");
        }
    }

    #[test]
    fn stick_filters_print_their_side_and_position() {
        let parsed = parse_query("^(ATTA GACA)", conf()).unwrap();
        assert!(parsed.to_string().contains("StickFilter(true, 0)"));
    }

    #[test]
    fn plain_rendering_brackets_the_matched_span() {
        let p = parse_query("(G:GACA)", conf()).unwrap();
        let targets = TargetSet::from_seqs([b"ATTAGACATT".as_slice()]);
        let result = p.search(&targets);
        let m = result.best_match(true).unwrap();
        let text = render_match(&m, &targets, false);
        assert!(text.contains("ATTA[GACA]TT"), "got:\n{text}");
        assert!(text.contains("G  4..8  GACA"), "got:\n{text}");
    }
}
