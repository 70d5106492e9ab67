//! Seek index over the pages of one stream
//!
//! Built once while loading, in file order. For a well-formed single-stream
//! file that order is also ascending granule order, which is what makes the
//! binary search in [`PageIndex::find_page_start_pos`] valid.

use crate::ogg::NO_GRANULE;

/// One indexed page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub index: usize,
    pub file_offset: u64,
    /// Header plus body, in bytes
    pub size: usize,
    /// [`NO_GRANULE`] if no packet finishes on this page
    pub granule_position: i64,
}

/// Where to restart decoding for a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStartPos {
    pub index: usize,
    pub file_offset: u64,
    /// Granule position of the page before `index` (0 for the first page);
    /// the first packet completed on `index` starts at this position
    pub granule_position: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    entries: Vec<PageEntry>,
    /// Search key per entry: the last real granule position at or before it.
    /// Pages without a granule inherit it, keeping the keys monotonic.
    keys: Vec<i64>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next page (indices are assigned in call order)
    pub fn push(&mut self, file_offset: u64, size: usize, granule_position: i64) {
        let index = self.entries.len();
        let key = if granule_position != NO_GRANULE {
            granule_position
        } else {
            self.keys.last().copied().unwrap_or(0)
        };
        self.keys.push(key);
        self.entries.push(PageEntry {
            index,
            file_offset,
            size,
            granule_position,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    /// Largest granule position seen, if any page carried one
    pub fn last_granule(&self) -> Option<i64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.granule_position != NO_GRANULE)
            .map(|e| e.granule_position)
    }

    /// First page whose granule position is `>= target`
    ///
    /// Returns `None` when the target lies past the last granule in the file.
    pub fn find_page_start_pos(&self, target: i64) -> Option<PageStartPos> {
        let pos = self.keys.partition_point(|&key| key < target);
        let entry = self.entries.get(pos)?;

        let previous = if pos == 0 { 0 } else { self.keys[pos - 1].max(0) };

        Some(PageStartPos {
            index: entry.index,
            file_offset: entry.file_offset,
            granule_position: previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(granules: &[i64]) -> PageIndex {
        let mut idx = PageIndex::new();
        for (i, &g) in granules.iter().enumerate() {
            idx.push(i as u64 * 100, 100, g);
        }
        idx
    }

    #[test]
    fn test_lower_bound_and_previous_granule() {
        let idx = index(&[0, 0, 4800, 9600, 14400]);

        let pos = idx.find_page_start_pos(5000).unwrap();
        assert_eq!(pos.index, 3);
        assert_eq!(pos.file_offset, 300);
        assert_eq!(pos.granule_position, 4800);

        // Exact hit lands on that page, not the next
        let pos = idx.find_page_start_pos(4800).unwrap();
        assert_eq!(pos.index, 2);
        assert_eq!(pos.granule_position, 0);
    }

    #[test]
    fn test_first_page_has_zero_anchor() {
        let idx = index(&[0, 0, 4800]);
        let pos = idx.find_page_start_pos(0).unwrap();
        assert_eq!(pos.index, 0);
        assert_eq!(pos.granule_position, 0);
    }

    #[test]
    fn test_past_end_is_none() {
        let idx = index(&[0, 0, 4800]);
        assert!(idx.find_page_start_pos(4801).is_none());
    }

    #[test]
    fn test_pages_without_granule() {
        let idx = index(&[0, 0, 4800, NO_GRANULE, 14400]);
        assert_eq!(idx.last_granule(), Some(14400));

        let pos = idx.find_page_start_pos(9000).unwrap();
        assert_eq!(pos.index, 4);
        assert_eq!(pos.granule_position, 4800);
    }

    #[test]
    fn test_no_granule_at_all() {
        let idx = index(&[NO_GRANULE, NO_GRANULE]);
        assert_eq!(idx.last_granule(), None);
    }
}
