//! Name storage for cache objects.
//!
//! Every name is kept in both encodings with its length precomputed. Each
//! object also remembers the full-path length of its parent at creation time,
//! so rebuilding a path needs one append per ancestor and no rescans.

use crate::common::unicode::to_wide;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameForms {
    narrow: Box<str>,
    wide: Box<[u16]>,
}

impl NameForms {
    pub fn new(name: &str) -> Self {
        Self {
            narrow: name.into(),
            wide: to_wide(name),
        }
    }

    pub fn narrow(&self) -> &str {
        &self.narrow
    }

    pub fn wide(&self) -> &[u16] {
        &self.wide
    }

    /// Length in bytes of the narrow form.
    pub fn cch(&self) -> usize {
        self.narrow.len()
    }

    /// Length in UTF-16 units of the wide form.
    pub fn cwc(&self) -> usize {
        self.wide.len()
    }
}

/// Lengths of the parent's full path, in both encodings, captured when the
/// object was created. They go stale if an ancestor is renamed; renames are
/// not tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentLengths {
    pub cch: u32,
    pub cwc: u32,
    pub cch_short: u32,
    /// The parent path already ends with a separator (the `/` anchor).
    pub terminated: bool,
}

#[derive(Debug, Clone)]
pub struct ObjNames {
    pub long: NameForms,
    pub short: Option<NameForms>,
    pub parent: ParentLengths,
}

impl ObjNames {
    pub fn new(long: &str, short: Option<&str>, parent: ParentLengths) -> Self {
        // A short name identical to the long one carries no information.
        let short = short
            .filter(|s| !s.is_empty() && *s != long)
            .map(NameForms::new);
        Self {
            long: NameForms::new(long),
            short,
            parent,
        }
    }

    pub fn root() -> Self {
        Self::new("", None, ParentLengths::default())
    }

    /// The short name if there is one, otherwise the long name.
    pub fn short_or_long(&self) -> &NameForms {
        self.short.as_ref().unwrap_or(&self.long)
    }

    /// Full-path lengths of this object, used as the `ParentLengths` of its
    /// children.
    pub fn child_parent_lengths(&self) -> ParentLengths {
        let parent = self.parent;
        let join = |parent_len: u32, name_len: usize| {
            let sep = u32::from(parent_len > 0 && !parent.terminated);
            parent_len
                .saturating_add(sep)
                .saturating_add(u32::try_from(name_len).unwrap_or(u32::MAX))
        };
        ParentLengths {
            cch: join(parent.cch, self.long.cch()),
            cwc: join(parent.cwc, self.long.cwc()),
            cch_short: join(parent.cch_short, self.short_or_long().cch()),
            terminated: self.long.narrow().ends_with('/'),
        }
    }

    /// Whether a separator goes between the parent path and this name.
    pub fn needs_separator(&self) -> bool {
        self.parent.cch > 0 && !self.parent.terminated
    }
}
