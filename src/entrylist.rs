//! Entry lists with per-entry sub-lists of selected object instances

use std::collections::BTreeMap;

/// Record of which object instances of which entries passed a selection
///
/// Entries are identified by their global entry number inside of a chain for
/// iteration purposes, and by their (tree number, local entry) coordinates
/// for sub-list lookup. Keeping both allows detecting lists which were built
/// for another chain than the one they are applied to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntryListArray {
    /// Global entry numbers, in iteration order
    entries: Vec<usize>,

    /// Selected instances, keyed by (tree number, local entry)
    sub_lists: BTreeMap<(usize, usize), Vec<usize>>,
}
//
impl EntryListArray {
    /// Create an empty entry list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the selected instances of an entry
    ///
    /// Recording the same entry twice merges the sub-lists.
    pub fn insert(
        &mut self,
        entry: usize,
        tree_number: usize,
        local_entry: usize,
        instances: Vec<usize>,
    ) {
        match self.sub_lists.get_mut(&(tree_number, local_entry)) {
            Some(existing) => {
                existing.extend(instances);
                existing.sort_unstable();
                existing.dedup();
            }
            None => {
                self.entries.push(entry);
                self.sub_lists.insert((tree_number, local_entry), instances);
            }
        }
    }

    /// Number of entries with at least one selected instance
    pub fn n(&self) -> usize {
        self.entries.len()
    }

    /// Global entry number at some position of the iteration order
    pub fn entry(&self, position: usize) -> Option<usize> {
        self.entries.get(position).copied()
    }

    /// Iterate over global entry numbers in iteration order
    pub fn entries(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().copied()
    }

    /// Selected instances of an entry, if it was selected at all
    pub fn sub_list(&self, tree_number: usize, local_entry: usize) -> Option<&[usize]> {
        self.sub_lists
            .get(&(tree_number, local_entry))
            .map(Vec::as_slice)
    }

    /// Total number of selected instances
    pub fn total_instances(&self) -> usize {
        self.sub_lists.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_iteration_order() {
        let mut list = EntryListArray::new();
        list.insert(7, 1, 2, vec![0, 2]);
        list.insert(3, 0, 3, vec![1]);
        assert_eq!(list.entries().collect::<Vec<_>>(), vec![7, 3]);
        assert_eq!(list.sub_list(1, 2), Some(&[0, 2][..]));
        assert_eq!(list.sub_list(0, 7), None);
        assert_eq!(list.total_instances(), 3);
    }

    #[test]
    fn reinsertion_merges() {
        let mut list = EntryListArray::new();
        list.insert(0, 0, 0, vec![2]);
        list.insert(0, 0, 0, vec![0, 2]);
        assert_eq!(list.n(), 1);
        assert_eq!(list.sub_list(0, 0), Some(&[0, 2][..]));
    }
}
