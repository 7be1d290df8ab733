//! Cycle inputs
//!
//! An [`Input`] hands out [`CycleSegment`]s of up to one stride each. The
//! motor consumes a segment sequentially; the input alone decides ordering and
//! partitioning across motors.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::CycleRange;

/// Source of cycle numbers
pub trait Input: Send + Sync {
    /// Next run of up to `stride` cycles, or `None` once exhausted
    fn input_segment(&self, stride: usize) -> Option<CycleSegment>;
}

/// A contiguous run of cycles, consumed front to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSegment {
    next: u64,
    end: u64,
}

impl CycleSegment {
    /// Segment covering `start..end`
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            next: start,
            end: end.max(start),
        }
    }

    /// Take the next cycle
    pub fn next_cycle(&mut self) -> Option<u64> {
        let cycle = self.peek_next_cycle()?;
        self.next += 1;
        Some(cycle)
    }

    /// Look at the next cycle without taking it
    pub fn peek_next_cycle(&self) -> Option<u64> {
        (self.next < self.end).then_some(self.next)
    }

    /// Whether every cycle has been taken
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.end
    }

    /// Cycles not yet taken
    pub fn len(&self) -> usize {
        (self.end - self.next) as usize
    }

    /// Whether the segment holds no cycles
    pub fn is_empty(&self) -> bool {
        self.is_exhausted()
    }
}

impl Iterator for CycleSegment {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.next_cycle()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

impl ExactSizeIterator for CycleSegment {}

/// Shared input over a cycle interval
///
/// Segments are claimed with a compare-and-swap on a shared cursor, so any
/// number of motors can pull from the same instance without overlap. The
/// cursor never moves past the end of the range, and the final segment may be
/// shorter than the stride.
#[derive(Debug)]
pub struct AtomicInput {
    next: AtomicU64,
    range: CycleRange,
}

impl AtomicInput {
    /// Input over `range`
    pub fn new(range: CycleRange) -> Self {
        Self {
            next: AtomicU64::new(range.start),
            range,
        }
    }

    /// Cycles not yet handed out
    pub fn remaining(&self) -> u64 {
        self.range
            .end
            .saturating_sub(self.next.load(Ordering::Acquire))
    }

    /// The interval this input covers
    pub fn range(&self) -> CycleRange {
        self.range
    }
}

impl Input for AtomicInput {
    fn input_segment(&self, stride: usize) -> Option<CycleSegment> {
        let stride = stride.max(1) as u64;
        let end = self.range.end;
        let start = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < end).then(|| next.saturating_add(stride).min(end))
            })
            .ok()?;
        Some(CycleSegment::new(start, start.saturating_add(stride).min(end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_segment_walk() {
        let mut seg = CycleSegment::new(3, 6);
        assert_eq!(seg.len(), 3);
        assert_eq!(seg.peek_next_cycle(), Some(3));
        assert_eq!(seg.next_cycle(), Some(3));
        assert_eq!(seg.next_cycle(), Some(4));
        assert!(!seg.is_exhausted());
        assert_eq!(seg.next_cycle(), Some(5));
        assert!(seg.is_exhausted());
        assert_eq!(seg.next_cycle(), None);
        assert_eq!(seg.peek_next_cycle(), None);
    }

    #[test]
    fn test_atomic_input_strides() {
        let input = AtomicInput::new(CycleRange::new(0, 10));
        let a: Vec<u64> = input.input_segment(5).unwrap().collect();
        let b: Vec<u64> = input.input_segment(5).unwrap().collect();
        assert_eq!(a, vec![0, 1, 2, 3, 4]);
        assert_eq!(b, vec![5, 6, 7, 8, 9]);
        assert!(input.input_segment(5).is_none());
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_atomic_input_short_tail() {
        let input = AtomicInput::new(CycleRange::new(0, 7));
        assert_eq!(input.input_segment(5).unwrap().len(), 5);
        assert_eq!(input.input_segment(5).unwrap().len(), 2);
        assert!(input.input_segment(5).is_none());
        assert!(input.input_segment(5).is_none());
    }

    #[test]
    fn test_atomic_input_range_ending_at_max() {
        let input = AtomicInput::new(CycleRange::new(u64::MAX - 3, u64::MAX));
        let seg: Vec<u64> = input.input_segment(5).unwrap().collect();
        assert_eq!(seg, vec![u64::MAX - 3, u64::MAX - 2, u64::MAX - 1]);
        for _ in 0..4 {
            assert!(input.input_segment(5).is_none());
        }
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_atomic_input_huge_stride() {
        let input = AtomicInput::new(CycleRange::new(10, 20));
        assert_eq!(input.input_segment(usize::MAX).unwrap().len(), 10);
        assert!(input.input_segment(usize::MAX).is_none());
    }

    #[test]
    fn test_atomic_input_shared_without_overlap() {
        let input = Arc::new(AtomicInput::new(CycleRange::new(0, 10_000)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let input = Arc::clone(&input);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(seg) = input.input_segment(7) {
                        seen.extend(seg);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for cycle in handle.join().unwrap() {
                assert!(all.insert(cycle), "cycle {cycle} handed out twice");
            }
        }
        assert_eq!(all.len(), 10_000);
    }
}
