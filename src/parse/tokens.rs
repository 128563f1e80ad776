//! The mutable token chain the grammar stages rewrite.
//!
//! A query starts as one text token spanning the whole string. Each stage
//! replaces the spans it understands with reduced tokens; consumed
//! punctuation becomes a null placeholder until a later cleanup absorbs it
//! into a neighbor. The chain always covers the query contiguously.

use crate::errors::{ParseError, Result};
use crate::groups::{GroupEdge, GroupEdgePosition};
use crate::pattern::{Filter, MultiPattern, Pattern, SinglePattern};

#[derive(Debug)]
pub(crate) enum Token {
    /// Raw query text no stage has claimed yet. Content is always read back
    /// from the query via the entry's span.
    Text,
    /// Consumed punctuation with no value of its own.
    Null,
    Pattern(SinglePattern),
    Multi(MultiPattern),
    /// Intermediate values of the constructor grammar.
    Filter(Filter),
    Edge(GroupEdge),
    EdgePosition(GroupEdgePosition),
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub(crate) struct TokenizedString<'q> {
    query: &'q str,
    entries: Vec<Entry>,
}

impl<'q> TokenizedString<'q> {
    pub fn new(query: &'q str) -> Self {
        let entries = vec![Entry {
            token: Token::Text,
            start: 0,
            end: query.len(),
        }];
        Self { query, entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_at(&self, pos: usize) -> Option<&Entry> {
        self.entries.iter().find(|e| e.start <= pos && pos < e.end)
    }

    /// The query byte at `pos` when it still belongs to a text token.
    pub fn text_char(&self, pos: usize) -> Option<u8> {
        let entry = self.entry_at(pos)?;
        match entry.token {
            Token::Text => Some(self.query.as_bytes()[pos]),
            _ => None,
        }
    }

    pub fn is_null_at(&self, pos: usize) -> bool {
        matches!(self.entry_at(pos), Some(entry) if matches!(entry.token, Token::Null))
    }

    /// Replaces everything covering `start..end` with one token. Text tokens
    /// crossing the boundary are split; any other token must be covered
    /// whole. Tearing a reduced token apart is a stage bug and panics.
    pub fn replace(&mut self, start: usize, end: usize, token: Token) {
        assert!(
            start < end && end <= self.query.len(),
            "replace range {start}..{end} out of bounds"
        );
        let mut token = Some(token);
        let mut rebuilt: Vec<Entry> = Vec::with_capacity(self.entries.len() + 2);
        for entry in self.entries.drain(..) {
            if entry.end <= start || entry.start >= end {
                rebuilt.push(entry);
                continue;
            }
            let covered = start <= entry.start && entry.end <= end;
            if !covered && !matches!(entry.token, Token::Text) {
                panic!(
                    "replace range {start}..{end} tears a reduced token at {}..{}",
                    entry.start, entry.end
                );
            }
            if entry.start < start {
                rebuilt.push(Entry {
                    token: Token::Text,
                    start: entry.start,
                    end: start,
                });
            }
            if let Some(token) = token.take() {
                rebuilt.push(Entry { token, start, end });
            }
            if entry.end > end {
                rebuilt.push(Entry {
                    token: Token::Text,
                    start: end,
                    end: entry.end,
                });
            }
        }
        assert!(token.is_none(), "replace range {start}..{end} covers no tokens");
        self.entries = rebuilt;
        self.check_coverage();
    }

    /// Takes the value out of an entry, leaving a null placeholder.
    pub fn take_token(&mut self, index: usize) -> Token {
        std::mem::replace(&mut self.entries[index].token, Token::Null)
    }

    /// Drops null placeholders and whitespace-only text, widening a neighbor
    /// over the freed span. A neighboring pattern is preferred so reduced
    /// tokens touching only through punctuation become adjacent.
    pub fn cleanup(&mut self) {
        loop {
            let removable = self.entries.iter().position(|e| match e.token {
                Token::Null => true,
                Token::Text => self.query[e.start..e.end]
                    .bytes()
                    .all(|c| c.is_ascii_whitespace()),
                _ => false,
            });
            let Some(i) = removable else { break };
            if self.entries.len() == 1 {
                break;
            }
            let Entry { start, end, .. } = self.entries[i];
            self.entries.remove(i);
            let next_is_value = self
                .entries
                .get(i)
                .map_or(false, |e| matches!(e.token, Token::Pattern(_) | Token::Multi(_)));
            if next_is_value {
                self.entries[i].start = start;
            } else if i > 0 {
                self.entries[i - 1].end = end;
            } else {
                self.entries[0].start = start;
            }
            self.check_coverage();
        }
    }

    /// The finished pattern, once every stage has run. Anything left besides
    /// a single reduced token is a grammar error naming the leftovers.
    pub fn into_pattern(mut self) -> Result<Pattern> {
        self.cleanup();
        if self.entries.len() == 1
            && matches!(self.entries[0].token, Token::Pattern(_) | Token::Multi(_))
        {
            return Ok(match self.entries.pop().map(|e| e.token) {
                Some(Token::Pattern(p)) => Pattern::Single(p),
                Some(Token::Multi(m)) => Pattern::Multi(m),
                _ => unreachable!(),
            });
        }
        Err(ParseError::UnconsumedTokens {
            tokens: self.leftover_text(),
        }
        .into())
    }

    pub fn leftover_text(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.token, Token::Text))
            .map(|e| self.query[e.start..e.end].trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("'{s}'"))
            .collect();
        if parts.is_empty() {
            format!("{} unjoined pattern tokens", self.entries.len())
        } else {
            parts.join(", ")
        }
    }

    fn check_coverage(&self) {
        debug_assert!(!self.entries.is_empty());
        debug_assert_eq!(self.entries[0].start, 0);
        debug_assert_eq!(self.entries.last().map(|e| e.end), Some(self.query.len()));
        debug_assert!(
            self.entries.windows(2).all(|w| w[0].end == w[1].start),
            "token chain has a gap"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::BorderPosition;
    use crate::pattern::{AnyPattern, Filter};

    fn any() -> Token {
        Token::Pattern(SinglePattern::Any(AnyPattern::new(Vec::new()).unwrap()))
    }

    #[test]
    fn replace_splits_surrounding_text() {
        let mut ts = TokenizedString::new("abcdef");
        ts.replace(2, 4, any());
        let kinds: Vec<(usize, usize, bool)> = ts
            .entries()
            .iter()
            .map(|e| (e.start, e.end, matches!(e.token, Token::Text)))
            .collect();
        assert_eq!(kinds, vec![(0, 2, true), (2, 4, false), (4, 6, true)]);
    }

    #[test]
    fn cleanup_prefers_widening_a_pattern_over_text() {
        let mut ts = TokenizedString::new("xx  ABCD");
        ts.replace(4, 8, any());
        ts.replace(2, 4, Token::Null);
        ts.cleanup();
        let spans: Vec<(usize, usize)> =
            ts.entries().iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 8)]);
        assert!(matches!(ts.entries()[1].token, Token::Pattern(_)));
    }

    #[test]
    fn leftover_text_names_the_unparsed_pieces() {
        let mut ts = TokenizedString::new("junk ABCD more");
        ts.replace(5, 9, any());
        let err = ts.into_pattern().unwrap_err();
        let shown = err.to_string();
        assert!(shown.contains("'junk'"), "{shown}");
        assert!(shown.contains("'more'"), "{shown}");
    }

    #[test]
    #[should_panic(expected = "tears a reduced token")]
    fn tearing_a_reduced_token_is_a_bug() {
        let mut ts = TokenizedString::new("abcdef");
        ts.replace(0, 4, any());
        ts.replace(2, 6, Token::Filter(Filter::Stick {
            left: true,
            position: BorderPosition::FromStart(0),
        }));
    }
}
