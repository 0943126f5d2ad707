//! Playlist types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};

/// Ordered list of files to play.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    entries: Vec<PathBuf>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a playlist from any sequence of paths, keeping their order.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entries: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Get the path at `index`.
    pub fn get(&self, index: usize) -> Option<&Path> {
        self.entries.get(index).map(PathBuf::as_path)
    }

    /// Get all entries.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the playlist is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a path to the end of the playlist.
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(path.into());
    }

    /// Indices to try after `current`, wrapping around once.
    ///
    /// Yields every index exactly once, finishing with `current` itself. With
    /// no current track the walk starts at 0.
    pub fn candidates_after(&self, current: Option<usize>) -> Candidates {
        let len = self.len();
        let start = current.map_or(0, |i| (i % len.max(1) + 1) % len.max(1));
        Candidates {
            next: start,
            remaining: len,
            len,
            backwards: false,
        }
    }

    /// Indices to try before `current`, walking backwards and wrapping once.
    pub fn candidates_before(&self, current: Option<usize>) -> Candidates {
        let len = self.len();
        let start = match current {
            Some(i) if len > 0 => (i % len + len - 1) % len,
            _ => len.saturating_sub(1),
        };
        Candidates {
            next: start,
            remaining: len,
            len,
            backwards: true,
        }
    }
}

/// Bounded walk over playlist indices.
#[derive(Debug, Clone)]
pub struct Candidates {
    next: usize,
    remaining: usize,
    len: usize,
    backwards: bool,
}

impl Iterator for Candidates {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let index = self.next;
        self.next = if self.backwards {
            (index + self.len - 1) % self.len
        } else {
            (index + 1) % self.len
        };
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Candidates {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn playlist(n: usize) -> Playlist {
        Playlist::from_paths((0..n).map(|i| format!("track{i}.mp3")))
    }

    #[test]
    fn test_candidates_wrap() {
        let list = playlist(3);
        let order: Vec<_> = list.candidates_after(Some(0)).collect();
        assert_eq!(order, vec![1, 2, 0]);

        let order: Vec<_> = list.candidates_after(Some(2)).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_candidates_without_current() {
        let list = playlist(3);
        let order: Vec<_> = list.candidates_after(None).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_candidates_backwards() {
        let list = playlist(4);
        let order: Vec<_> = list.candidates_before(Some(1)).collect();
        assert_eq!(order, vec![0, 3, 2, 1]);
    }

    #[test]
    fn test_empty_playlist_has_no_candidates() {
        let list = Playlist::new();
        assert_eq!(list.candidates_after(Some(0)).count(), 0);
        assert_eq!(list.candidates_before(None).count(), 0);
        assert!(list.get(0).is_none());
    }

    #[test]
    fn test_push_and_get() {
        let mut list = Playlist::new();
        list.push("a.mp3");
        list.push("b.flac");
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1).unwrap(), Path::new("b.flac"));
    }

    proptest! {
        #[test]
        fn prop_candidates_visit_each_index_once(len in 1usize..64, current in 0usize..64) {
            let list = playlist(len);
            let current = current % len;
            let mut order: Vec<_> = list.candidates_after(Some(current)).collect();

            prop_assert_eq!(order.len(), len);
            prop_assert_eq!(order[0], (current + 1) % len);
            prop_assert_eq!(*order.last().unwrap(), current);

            order.sort_unstable();
            prop_assert_eq!(order, (0..len).collect::<Vec<_>>());
        }

        #[test]
        fn prop_backwards_visits_each_index_once(len in 1usize..64, current in 0usize..64) {
            let list = playlist(len);
            let current = current % len;
            let mut order: Vec<_> = list.candidates_before(Some(current)).collect();

            prop_assert_eq!(*order.last().unwrap(), current);
            order.sort_unstable();
            prop_assert_eq!(order, (0..len).collect::<Vec<_>>());
        }
    }
}
