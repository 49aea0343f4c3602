use std::collections::HashSet;

/// Queries already processed.
///
/// Cleared wholesale once it grows past its cap; forgetting a topic only means
/// it may be harvested again.
#[derive(Debug, Clone)]
pub struct HarvestedSet {
    cap: usize,
    seen: HashSet<String>,
}

impl HarvestedSet {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            seen: HashSet::new(),
        }
    }

    pub fn insert(&mut self, query: &str) {
        self.seen.insert(query.to_string());
        self.evict_if_full();
    }

    pub fn contains(&self, query: &str) -> bool {
        self.seen.contains(query)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Returns whether the set was cleared.
    pub fn evict_if_full(&mut self) -> bool {
        if self.seen.len() > self.cap {
            self.seen.clear();
            return true;
        }
        false
    }
}

/// Ordered candidates mined from content, truncated from the tail.
#[derive(Debug, Clone)]
pub struct PendingContextList {
    cap: usize,
    entries: Vec<String>,
}

impl PendingContextList {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Vec::new(),
        }
    }

    /// Offers a candidate. Front insertions always go in and may push the
    /// tail out; back insertions are dropped while the list is over its cap.
    /// Returns whether the candidate was added.
    pub fn offer(&mut self, query: &str, front: bool) -> bool {
        if !front && self.entries.len() > self.cap {
            return false;
        }
        let added = if self.contains(query) {
            false
        } else if front {
            self.entries.insert(0, query.to_string());
            true
        } else {
            self.entries.push(query.to_string());
            true
        };
        self.entries.truncate(self.cap);
        added
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries.iter().any(|entry| entry == query)
    }

    pub fn remove(&mut self, query: &str) -> bool {
        match self.entries.iter().position(|entry| entry == query) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<String> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }
}
