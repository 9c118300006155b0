use super::ConfigNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crumb<'a> {
    Key(&'a str),
    Index(usize),
}

/// Path from the root of a tree to the node being diffed, most recent step last.
#[derive(Debug, Clone, Copy)]
pub struct BreadCrumb<'a> {
    parent: Option<&'a BreadCrumb<'a>>,
    crumb: Option<Crumb<'a>>,
    depth: usize,
}

impl<'a> BreadCrumb<'a> {
    pub fn root() -> Self {
        Self {
            parent: None,
            crumb: None,
            depth: 0,
        }
    }

    pub fn key<'b>(&'b self, key: &'b str) -> BreadCrumb<'b>
    where
        'a: 'b,
    {
        BreadCrumb {
            parent: Some(self),
            crumb: Some(Crumb::Key(key)),
            depth: self.depth + 1,
        }
    }

    pub fn index<'b>(&'b self, index: usize) -> BreadCrumb<'b>
    where
        'a: 'b,
    {
        BreadCrumb {
            parent: Some(self),
            crumb: Some(Crumb::Index(index)),
            depth: self.depth + 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn last(&self) -> Option<Crumb<'a>> {
        self.crumb
    }

    pub fn last_key(&self) -> Option<&'a str> {
        match self.crumb {
            Some(Crumb::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Checks the trailing keys of the path; index steps never match.
    pub fn ends_with(&self, keys: &[&str]) -> bool {
        let mut current = Some(self);
        for expected in keys.iter().rev() {
            match current {
                Some(crumb) if crumb.last_key() == Some(*expected) => current = crumb.parent,
                _ => return false,
            }
        }
        true
    }

    pub fn path(&self) -> Vec<Crumb<'a>> {
        let mut result = Vec::with_capacity(self.depth);
        let mut current = Some(self);
        while let Some(crumb) = current {
            if let Some(step) = crumb.crumb {
                result.push(step);
            }
            current = crumb.parent;
        }
        result.reverse();
        result
    }
}

/// Domain knowledge consulted while diffing two trees.
pub trait DeltaHints {
    /// Index into `from` of the element that `to` (at position `index`) should be
    /// diffed against, or `None` to fall back to the same position.
    fn sequence_match(
        &self,
        _crumb: &BreadCrumb<'_>,
        _from: &[ConfigNode],
        _to: &ConfigNode,
        _index: usize,
    ) -> Option<usize> {
        None
    }

    fn does_sequence_order_matter(&self, _crumb: &BreadCrumb<'_>) -> bool {
        true
    }

    fn can_delete_key(&self, _key: &str, _crumb: &BreadCrumb<'_>) -> bool {
        true
    }

    fn can_delete_any_key(&self) -> bool {
        true
    }

    /// Skip diffing and send the new value as-is.
    fn should_bypass(&self, _crumb: &BreadCrumb<'_>) -> bool {
        false
    }

    fn are_null_and_empty_equivalent(&self, _crumb: &BreadCrumb<'_>) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHints;

impl DeltaHints for NoHints {}
