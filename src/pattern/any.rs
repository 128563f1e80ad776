use std::iter;

use crate::errors::*;
use crate::groups::GroupEdge;
use crate::matches::{MatchIntermediate, MatchStream, MatchedGroupEdge, MatchedRange};
use crate::pattern::SearchContext;

/// Matches the whole searched slice of a read, whatever it holds. Used for
/// reads a query places no constraint on; group edges attach to the slice
/// borders. An empty slice never matches.
#[derive(Debug)]
pub struct AnyPattern {
    group_edges: Vec<GroupEdge>,
}

impl AnyPattern {
    pub fn new(group_edges: Vec<GroupEdge>) -> Result<Self> {
        for e in &group_edges {
            if group_edges.iter().filter(|o| *o == e).count() > 1 {
                return Err(ConfigError::DuplicateEdge {
                    name: e.name().to_owned(),
                    is_start: e.is_start(),
                }
                .into());
            }
        }
        Ok(Self { group_edges })
    }

    pub fn group_edges(&self) -> &[GroupEdge] {
        &self.group_edges
    }

    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        if ctx.from >= ctx.to {
            return Box::new(iter::empty());
        }
        let edges = self
            .group_edges
            .iter()
            .map(|e| {
                let position = if e.is_start() { ctx.from } else { ctx.to };
                MatchedGroupEdge::new(ctx.target, ctx.target_id, e.clone(), position)
            })
            .collect();
        Box::new(iter::once(MatchIntermediate {
            score: 0,
            target_count: 1,
            ranges: vec![MatchedRange::new(ctx.target, ctx.target_id, ctx.from, ctx.to)],
            edges,
            upper_left: None,
            upper_right: None,
        }))
    }
}
