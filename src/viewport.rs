//! Viewport window tracking.
//!
//! Decides which specimens are in range of the current navigation position.
//! The buffer window is asymmetric (more specimens after the current one
//! than before, since reviewers mostly move forward) and, when a restricted
//! subset of visitable indices is configured, is computed over positions
//! within that subset rather than raw indices. Navigation past either end
//! is terminal; there is no wrapping.

use std::collections::HashSet;

/// Asymmetric buffer of specimens kept warm around the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWindow {
    /// Specimens kept before the current index.
    pub before: usize,
    /// Specimens kept after the current index.
    pub after: usize,
}

impl BufferWindow {
    /// Largest extent of the window, used to offset high-magnification
    /// priorities past every thumbnail priority.
    pub fn max_extent(&self) -> usize {
        self.before.max(self.after)
    }
}

/// Navigation position plus the in-range window derivation.
#[derive(Debug, Clone)]
pub struct Viewport {
    window: BufferWindow,
    total: usize,
    // sorted, deduplicated raw indices; None visits everything
    subset: Option<Vec<usize>>,
    current: usize,
}

impl Viewport {
    /// Create a viewport at a starting index.
    ///
    /// `subset`, when given, must be sorted, deduplicated, in bounds, and
    /// contain `start`; the session config validates this beforehand.
    pub fn new(
        window: BufferWindow,
        total: usize,
        subset: Option<Vec<usize>>,
        start: usize,
    ) -> Self {
        Self {
            window,
            total,
            subset,
            current: start,
        }
    }

    /// Current raw specimen index.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Buffer window configuration.
    pub fn window(&self) -> BufferWindow {
        self.window
    }

    /// Raw specimen indices inside the buffer window, clipped to bounds.
    ///
    /// With a restricted subset, the window spans positions within the
    /// subset and maps back to raw indices.
    pub fn in_range(&self) -> Vec<usize> {
        let before = self.window.before as isize;
        let after = self.window.after as isize;
        match &self.subset {
            Some(subset) => {
                let Some(position) = subset.iter().position(|&i| i == self.current) else {
                    return vec![self.current];
                };
                let position = position as isize;
                (-before..=after)
                    .filter_map(|offset| {
                        let slot = position + offset;
                        if slot < 0 {
                            return None;
                        }
                        subset.get(slot as usize).copied()
                    })
                    .collect()
            }
            None => {
                let current = self.current as isize;
                (-before..=after)
                    .filter_map(|offset| {
                        let index = current + offset;
                        if index < 0 || index >= self.total as isize {
                            return None;
                        }
                        Some(index as usize)
                    })
                    .collect()
            }
        }
    }

    /// In-range indices as a set, for eviction.
    pub fn in_range_set(&self) -> HashSet<usize> {
        self.in_range().into_iter().collect()
    }

    /// Move to the next visitable specimen; `None` past the last one.
    pub fn advance(&mut self) -> Option<usize> {
        let next = match &self.subset {
            Some(subset) => {
                let position = subset.iter().position(|&i| i == self.current)?;
                subset.get(position + 1).copied()
            }
            None => {
                let next = self.current + 1;
                (next < self.total).then_some(next)
            }
        }?;
        self.current = next;
        Some(next)
    }

    /// Move to the previous visitable specimen; `None` before the first one.
    pub fn retreat(&mut self) -> Option<usize> {
        let previous = match &self.subset {
            Some(subset) => {
                let position = subset.iter().position(|&i| i == self.current)?;
                position.checked_sub(1).and_then(|p| subset.get(p)).copied()
            }
            None => self.current.checked_sub(1),
        }?;
        self.current = previous;
        Some(previous)
    }

    /// Jump to a raw index; `false` when the index is not visitable.
    pub fn jump(&mut self, index: usize) -> bool {
        let valid = match &self.subset {
            Some(subset) => subset.contains(&index),
            None => index < self.total,
        };
        if valid {
            self.current = index;
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: BufferWindow = BufferWindow {
        before: 1,
        after: 3,
    };

    #[test]
    fn window_is_clipped_to_bounds() {
        let viewport = Viewport::new(WINDOW, 10, None, 0);
        assert_eq!(viewport.in_range(), vec![0, 1, 2, 3]);

        let viewport = Viewport::new(WINDOW, 10, None, 8);
        assert_eq!(viewport.in_range(), vec![7, 8, 9]);

        let viewport = Viewport::new(WINDOW, 10, None, 5);
        assert_eq!(viewport.in_range(), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn window_follows_every_navigation_step() {
        let mut viewport = Viewport::new(WINDOW, 6, None, 2);
        assert_eq!(viewport.in_range(), vec![1, 2, 3, 4, 5]);
        viewport.advance();
        assert_eq!(viewport.in_range(), vec![2, 3, 4, 5]);
        viewport.retreat();
        viewport.retreat();
        assert_eq!(viewport.in_range(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn subset_window_spans_positions_not_raw_indices() {
        let subset = vec![2, 5, 11, 17, 23];
        let viewport = Viewport::new(WINDOW, 30, Some(subset), 5);
        // one before and three after, in subset position space
        assert_eq!(viewport.in_range(), vec![2, 5, 11, 17, 23]);
    }

    #[test]
    fn subset_window_is_clipped_at_the_ends() {
        let subset = vec![2, 5, 11];
        let viewport = Viewport::new(WINDOW, 30, Some(subset.clone()), 2);
        assert_eq!(viewport.in_range(), vec![2, 5, 11]);

        let viewport = Viewport::new(WINDOW, 30, Some(subset), 11);
        assert_eq!(viewport.in_range(), vec![5, 11]);
    }

    #[test]
    fn advance_past_last_is_terminal() {
        let mut viewport = Viewport::new(WINDOW, 3, None, 2);
        assert_eq!(viewport.advance(), None);
        // position unchanged after a refused step
        assert_eq!(viewport.current(), 2);
    }

    #[test]
    fn retreat_before_first_is_terminal() {
        let mut viewport = Viewport::new(WINDOW, 3, None, 0);
        assert_eq!(viewport.retreat(), None);

        let mut viewport = Viewport::new(WINDOW, 30, Some(vec![4, 9]), 4);
        assert_eq!(viewport.retreat(), None);
        assert_eq!(viewport.advance(), Some(9));
        assert_eq!(viewport.advance(), None);
    }

    #[test]
    fn jump_rejects_unvisitable_indices() {
        let mut viewport = Viewport::new(WINDOW, 30, Some(vec![4, 9]), 4);
        assert!(!viewport.jump(5));
        assert_eq!(viewport.current(), 4);
        assert!(viewport.jump(9));
        assert_eq!(viewport.current(), 9);

        let mut viewport = Viewport::new(WINDOW, 3, None, 0);
        assert!(!viewport.jump(3));
        assert!(viewport.jump(2));
    }
}
