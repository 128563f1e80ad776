use crate::groups::{default_group_name, GroupEdge};
use crate::matches::{MatchStream, MatchedGroupEdge};
use crate::pattern::{subtree_declares_default_group, SearchContext, SinglePattern};

/// Wrapper around the top pattern of one read. It pins the read's target id
/// and appends the default `R<n>` group covering the whole read, unless the
/// query already declares that group itself.
#[derive(Debug)]
pub struct FullReadPattern {
    operand: Box<SinglePattern>,
    target_id: Option<usize>,
    default_group: Option<(GroupEdge, GroupEdge)>,
}

impl FullReadPattern {
    pub fn new(operand: SinglePattern) -> Self {
        Self {
            operand: Box::new(operand),
            target_id: None,
            default_group: None,
        }
    }

    pub fn operand(&self) -> &SinglePattern {
        &self.operand
    }

    pub(crate) fn assign_target_id(mut self, target_id: usize) -> Self {
        self.operand = Box::new((*self.operand).assign_target_ids(target_id));
        self.default_group = if subtree_declares_default_group(&self.operand, target_id) {
            None
        } else {
            let name = default_group_name(target_id);
            Some((
                GroupEdge::known_valid(name.clone(), true),
                GroupEdge::known_valid(name, false),
            ))
        };
        self.target_id = Some(target_id);
        self
    }

    /// Panics when the target id was never assigned: the tree skipped
    /// [`crate::pattern::Pattern::assign_target_ids`].
    pub(crate) fn match_stream<'a>(&'a self, ctx: SearchContext<'a>) -> MatchStream<'a> {
        let target_id = match self.target_id {
            Some(id) => id,
            None => panic!("full read pattern searched before target id assignment"),
        };
        let ctx = SearchContext { target_id, ..ctx };
        let inner = self.operand.match_stream(ctx);
        let (start, end) = match &self.default_group {
            Some(pair) => pair.clone(),
            None => return inner,
        };
        Box::new(inner.map(move |mut m| {
            m.edges
                .push(MatchedGroupEdge::new(ctx.target, target_id, start.clone(), 0));
            m.edges.push(MatchedGroupEdge::new(
                ctx.target,
                target_id,
                end.clone(),
                ctx.target.len(),
            ));
            m
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PatternConfig;
    use crate::groups::GroupEdgePosition;
    use crate::pattern::{FuzzyMatchPattern, Pattern};
    use crate::sequence::{Target, TargetSet};

    fn fuzzy(seq: &[u8], edges: Vec<GroupEdgePosition>) -> SinglePattern {
        SinglePattern::Fuzzy(
            FuzzyMatchPattern::new(Arc::new(PatternConfig::default()), seq, edges).unwrap(),
        )
    }

    #[test]
    fn default_group_covers_the_whole_read() {
        let p = Pattern::Single(SinglePattern::FullRead(FullReadPattern::new(fuzzy(
            b"GACA",
            vec![],
        ))))
        .assign_target_ids();
        let targets = TargetSet::from_seqs([b"ATTAGACATT".as_slice()]);
        let m = p.search(&targets).best_match(false).unwrap();
        assert_eq!(m.range(), Some((4, 8)));
        assert_eq!(m.group("R1").unwrap().range, Some((0, 10)));
    }

    #[test]
    fn explicit_default_group_is_not_duplicated() {
        let edges = vec![
            GroupEdgePosition::new(GroupEdge::start("R1").unwrap(), 0),
            GroupEdgePosition::new(GroupEdge::end("R1").unwrap(), 4),
        ];
        let p = Pattern::Single(SinglePattern::FullRead(FullReadPattern::new(fuzzy(
            b"GACA",
            edges,
        ))))
        .assign_target_ids();
        let targets = TargetSet::from_seqs([b"ATTAGACATT".as_slice()]);
        let m = p.search(&targets).best_match(false).unwrap();
        // The declared R1 group follows the match instead of the read.
        assert_eq!(m.group("R1").unwrap().range, Some((4, 8)));
        assert_eq!(m.groups().len(), 1);
    }

    #[test]
    #[should_panic(expected = "before target id assignment")]
    fn searching_unassigned_wrapper_panics() {
        let p = FullReadPattern::new(fuzzy(b"GACA", vec![]));
        let ctx = SearchContext {
            target: Target::new(b"ATTAGACA"),
            target_id: 1,
            from: 0,
            to: 8,
            fair: false,
        };
        p.match_stream(ctx);
    }
}
