use serde::Serialize;

use crate::errors::*;

/// Returns the name when it is a valid group name: ascii alphanumeric,
/// non-empty.
pub fn check_group_name(name: &str) -> Option<&str> {
    if name.is_empty() {
        return None;
    }
    for c in name.bytes() {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => (),
            _ => return None,
        }
    }
    Some(name)
}

/// Whether a name belongs to the synthesized `R1..Rn` family.
pub fn is_default_group_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    if bytes.next() != Some(b'R') {
        return false;
    }
    let rest = &name[1..];
    !rest.is_empty() && rest.bytes().all(|c| c.is_ascii_digit()) && !rest.starts_with('0')
}

/// Name of the default group covering the whole read with the given id.
pub fn default_group_name(target_id: usize) -> String {
    format!("R{target_id}")
}

/// A named start or end marker delimiting a captured sub-range.
/// Identity is `(name, is_start)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GroupEdge {
    name: String,
    is_start: bool,
}

impl GroupEdge {
    pub fn new(name: impl Into<String>, is_start: bool) -> std::result::Result<Self, ParseError> {
        let name = name.into();
        if check_group_name(&name).is_none() {
            return Err(ParseError::InvalidGroupName { name });
        }
        Ok(Self { name, is_start })
    }

    pub fn start(name: impl Into<String>) -> std::result::Result<Self, ParseError> {
        Self::new(name, true)
    }

    pub fn end(name: impl Into<String>) -> std::result::Result<Self, ParseError> {
        Self::new(name, false)
    }

    /// For engine-generated names that are valid by construction.
    pub(crate) fn known_valid(name: String, is_start: bool) -> Self {
        debug_assert!(check_group_name(&name).is_some());
        Self { name, is_start }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_start(&self) -> bool {
        self.is_start
    }

    /// The opposite edge of the same group.
    pub fn paired(&self) -> GroupEdge {
        GroupEdge {
            name: self.name.clone(),
            is_start: !self.is_start,
        }
    }
}

/// A group edge pinned to an offset in the local coordinate space of the
/// pattern that declares it (0..=pattern length).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupEdgePosition {
    pub edge: GroupEdge,
    pub position: usize,
}

impl GroupEdgePosition {
    pub fn new(edge: GroupEdge, position: usize) -> Self {
        Self { edge, position }
    }
}

/// A fixed target coordinate, either absolute or relative to the target end.
///
/// `FromEnd(0)` is the last symbol of the target. The simplified grammar
/// keeps the original integer sentinel form: -1 unset, >= 0 absolute,
/// -2 - k for k symbols before the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BorderPosition {
    FromStart(usize),
    FromEnd(usize),
}

impl BorderPosition {
    /// Absolute symbol position on a target of the given length, or `None`
    /// when the coordinate falls outside the target.
    pub fn resolve(&self, target_len: usize) -> Option<usize> {
        match *self {
            BorderPosition::FromStart(p) => (p < target_len).then_some(p),
            BorderPosition::FromEnd(k) => target_len.checked_sub(k + 1),
        }
    }

    pub fn to_sentinel(&self) -> i64 {
        match *self {
            BorderPosition::FromStart(p) => p as i64,
            BorderPosition::FromEnd(k) => -2 - k as i64,
        }
    }

    /// Decodes the sentinel form; `None` is the unset marker -1.
    pub fn from_sentinel(value: i64) -> Option<Self> {
        match value {
            -1 => None,
            p if p >= 0 => Some(BorderPosition::FromStart(p as usize)),
            k => Some(BorderPosition::FromEnd((-2 - k) as usize)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_are_alphanumeric() {
        assert!(check_group_name("UMI").is_some());
        assert!(check_group_name("umi2").is_some());
        assert!(check_group_name("").is_none());
        assert!(check_group_name("U_MI").is_none());
        assert!(check_group_name("U MI").is_none());
    }

    #[test]
    fn default_group_names() {
        assert!(is_default_group_name("R1"));
        assert!(is_default_group_name("R12"));
        assert!(!is_default_group_name("R"));
        assert!(!is_default_group_name("R0"));
        assert!(!is_default_group_name("R01"));
        assert!(!is_default_group_name("UMI"));
        assert_eq!(default_group_name(3), "R3");
    }

    #[test]
    fn invalid_edge_name_is_rejected() {
        assert!(GroupEdge::start("UMI").is_ok());
        assert!(matches!(
            GroupEdge::start(""),
            Err(ParseError::InvalidGroupName { .. })
        ));
    }

    #[test]
    fn border_sentinels_round_trip() {
        for border in [BorderPosition::FromStart(7), BorderPosition::FromEnd(2)] {
            let s = border.to_sentinel();
            assert_eq!(BorderPosition::from_sentinel(s), Some(border));
        }
        assert_eq!(BorderPosition::from_sentinel(-1), None);
    }

    #[test]
    fn border_resolution() {
        assert_eq!(BorderPosition::FromStart(3).resolve(8), Some(3));
        assert_eq!(BorderPosition::FromStart(8).resolve(8), None);
        assert_eq!(BorderPosition::FromEnd(0).resolve(8), Some(7));
        assert_eq!(BorderPosition::FromEnd(2).resolve(8), Some(5));
        assert_eq!(BorderPosition::FromEnd(8).resolve(8), None);
    }
}
