#![forbid(unsafe_code)]

//! Per-constraint diagnostics.
//!
//! A [`DiagnosticList`] holds at most one entry per constraint, ordered by
//! the constraint's declaration index. The engine derives the published
//! `errors` and `warnings` lists from it, so both keep declaration order no
//! matter in which order results arrived.

/// A diagnostic produced by the constraint at `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic<E> {
    /// Declaration index of the constraint.
    pub index: usize,
    /// The diagnostic payload.
    pub info: E,
    /// `true` for a warning, `false` for an error.
    pub valid: bool,
}

/// Diagnostics ordered by constraint index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiagnosticList<E> {
    entries: Vec<Diagnostic<E>>,
}

impl<E> Default for DiagnosticList<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E> DiagnosticList<E> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the diagnostic for constraint `index`, replacing any previous one.
    pub fn set(&mut self, index: usize, info: E, valid: bool) {
        let entry = Diagnostic { index, info, valid };
        match self.entries.binary_search_by_key(&index, |d| d.index) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    /// Remove the diagnostic for constraint `index`.
    pub fn clear(&mut self, index: usize) -> Option<Diagnostic<E>> {
        self.entries
            .binary_search_by_key(&index, |d| d.index)
            .ok()
            .map(|pos| self.entries.remove(pos))
    }

    /// The diagnostic for constraint `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Diagnostic<E>> {
        self.entries
            .binary_search_by_key(&index, |d| d.index)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Whether the entry at list `position` is a warning.
    ///
    /// Returns `None` when `position` is out of range.
    #[must_use]
    pub fn is_valid(&self, position: usize) -> Option<bool> {
        self.entries.get(position).map(|d| d.valid)
    }

    /// Number of diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All diagnostics in constraint order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic<E>> {
        self.entries.iter()
    }

    /// Error payloads in constraint order.
    pub fn errors(&self) -> impl Iterator<Item = &E> {
        self.entries.iter().filter(|d| !d.valid).map(|d| &d.info)
    }

    /// Warning payloads in constraint order.
    pub fn warnings(&self) -> impl Iterator<Item = &E> {
        self.entries.iter().filter(|d| d.valid).map(|d| &d.info)
    }
}

impl<'a, E> IntoIterator for &'a DiagnosticList<E> {
    type Item = &'a Diagnostic<E>;
    type IntoIter = std::slice::Iter<'a, Diagnostic<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_stay_in_index_order() {
        let mut list = DiagnosticList::new();
        list.set(2, "c", false);
        list.set(0, "a", true);
        list.set(1, "b", false);

        let indices: Vec<usize> = list.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(list.errors().copied().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(list.warnings().copied().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(list.is_valid(0), Some(true));
        assert_eq!(list.is_valid(1), Some(false));
        assert_eq!(list.is_valid(3), None);
    }

    #[test]
    fn set_replaces_and_clear_removes() {
        let mut list = DiagnosticList::new();
        list.set(4, "old", false);
        list.set(4, "new", true);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(4).map(|d| d.info), Some("new"));

        let removed = list.clear(4).unwrap();
        assert_eq!(removed.info, "new");
        assert!(list.is_empty());
        assert!(list.clear(4).is_none());
    }

    #[test]
    fn into_iterator_for_ref() {
        let mut list = DiagnosticList::new();
        list.set(0, 1, false);
        list.set(1, 2, false);
        let sum: i32 = (&list).into_iter().map(|d| d.info).sum();
        assert_eq!(sum, 3);
    }
}
