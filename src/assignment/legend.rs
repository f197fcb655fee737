use std::collections::BTreeMap;

use super::session_index::SessionIndex;

/// Per-session "modified" flags shown next to each date
#[derive(Debug, Default, Clone)]
pub struct Legend {
    modified: BTreeMap<usize, bool>,
}

impl Legend {
    /// Copies `monitor_modified` from each resolved subgroup.
    /// `None` recomputes every index under the active interval filter.
    pub fn recompute(&mut self, index: &mut SessionIndex, indexes: Option<&[usize]>) {
        let indexes = match indexes {
            Some(list) => list.to_vec(),
            None => {
                self.modified.clear();
                index.filtered_indexes().to_vec()
            }
        };
        for i in indexes {
            let modified = index.subgroup_for(i).is_some_and(|s| s.monitor_modified);
            self.modified.insert(i, modified);
        }
    }

    pub fn is_modified(&self, session_index: usize) -> bool {
        self.modified.get(&session_index).copied().unwrap_or(false)
    }

    pub fn modified_indexes(&self) -> Vec<usize> {
        self.modified.iter().filter(|(_, &m)| m).map(|(&i, _)| i).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::session_index::tests::course;

    #[test]
    fn mirrors_subgroup_flags() {
        let mut index = SessionIndex::new(course(4), 1, 0);
        index.subgroup_for_mut(2).unwrap().monitor_modified = true;
        let mut legend = Legend::default();
        legend.recompute(&mut index, None);
        assert_eq!(legend.modified_indexes(), vec![2]);

        index.subgroup_for_mut(0).unwrap().monitor_modified = true;
        legend.recompute(&mut index, Some(&[0]));
        assert_eq!(legend.modified_indexes(), vec![0, 2]);
        assert!(!legend.is_modified(3));
    }
}
