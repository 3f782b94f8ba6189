//! LCS alignment between two token sequences.
//!
//! The classic `(m+1) x (n+1)` dynamic-programming table is built only when
//! `m * n` fits the caller's cell budget; otherwise alignment is declined and
//! the caller falls back to a coarser strategy.
//!
//! Backtracking prefers stepping back in `a` when the two mismatch moves tie.
//! Merges depend on that choice for reproducible output, so it must not
//! change.

use std::ops::Range;

/// One matched index correspondence `(index_in_a, index_in_b)`.
pub type AlignmentPair = (usize, usize);

/// Compute one longest common subsequence of `a` and `b`.
///
/// Returns `None` when `a.len() * b.len()` exceeds `max_cells`. The returned
/// pairs are strictly increasing in both coordinates and every pair
/// satisfies `a[i] == b[j]`.
pub fn align<T: PartialEq>(a: &[T], b: &[T], max_cells: usize) -> Option<Vec<AlignmentPair>> {
    let m = a.len();
    let n = b.len();
    let cells = m.checked_mul(n)?;
    if cells > max_cells {
        return None;
    }

    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];
    for i in 1..=m {
        for j in 1..=n {
            dp[i * width + j] = if a[i - 1] == b[j - 1] {
                dp[(i - 1) * width + (j - 1)] + 1
            } else {
                dp[(i - 1) * width + j].max(dp[i * width + (j - 1)])
            };
        }
    }

    let mut pairs = Vec::with_capacity(dp[m * width + n] as usize);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[(i - 1) * width + j] >= dp[i * width + (j - 1)] {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    pairs.reverse();
    Some(pairs)
}

/// A piece of an alignment walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Unmatched runs on each side, before an anchor or at the tail.
    /// Either range may be empty.
    Gap { a: Range<usize>, b: Range<usize> },
    /// A matched pair.
    Anchor { a: usize, b: usize },
}

/// Expand an alignment into the alternating gap/anchor walk used by the
/// text and ordering merges.
///
/// Every anchor is preceded by exactly one gap, and the walk always ends with
/// the trailing gap, so `segments(&[], m, n)` is a single gap covering both
/// sequences.
pub fn segments(pairs: &[AlignmentPair], a_len: usize, b_len: usize) -> Vec<Segment> {
    let mut out = Vec::with_capacity(pairs.len() * 2 + 1);
    let (mut a_next, mut b_next) = (0, 0);
    for &(ai, bi) in pairs {
        out.push(Segment::Gap {
            a: a_next..ai,
            b: b_next..bi,
        });
        out.push(Segment::Anchor { a: ai, b: bi });
        a_next = ai + 1;
        b_next = bi + 1;
    }
    out.push(Segment::Gap {
        a: a_next..a_len,
        b: b_next..b_len,
    });
    out
}

/// True when every element of `needle` appears in `haystack` in order,
/// not necessarily contiguously. The empty sequence is a subsequence of
/// everything.
pub fn is_subsequence<T: PartialEq>(needle: &[T], haystack: &[T]) -> bool {
    let mut rest = needle.iter().peekable();
    for item in haystack {
        match rest.peek() {
            Some(wanted) if *wanted == item => {
                rest.next();
            }
            Some(_) => {}
            None => break,
        }
    }
    rest.peek().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_align_identical() {
        let a = ["x", "y", "z"];
        assert_eq!(align(&a, &a, 100), Some(vec![(0, 0), (1, 1), (2, 2)]));
    }

    #[test]
    fn test_align_empty_sides() {
        let a: [&str; 0] = [];
        assert_eq!(align(&a, &["x"], 100), Some(vec![]));
        assert_eq!(align(&["x"], &a, 100), Some(vec![]));
    }

    #[test]
    fn test_align_declines_over_budget() {
        let a = vec!["a"; 10];
        let b = vec!["a"; 11];
        assert_eq!(align(&a, &b, 109), None);
        assert!(align(&a, &b, 110).is_some());
    }

    #[test]
    fn test_tie_break_prefers_consuming_a() {
        let a = ["a", "b"];
        let b = ["a", "c"];
        assert_eq!(align(&a, &b, 100), Some(vec![(0, 0)]));

        // Either "x" or "y" could be the common line. Dropping the trailing
        // "y" of `a` first leaves "x" matched at a[0]/b[1].
        let a = ["x", "y"];
        let b = ["y", "x"];
        assert_eq!(align(&a, &b, 100), Some(vec![(0, 1)]));
    }

    #[test]
    fn test_segments_layout() {
        let segs = segments(&[(1, 0)], 3, 2);
        assert_eq!(
            segs,
            vec![
                Segment::Gap { a: 0..1, b: 0..0 },
                Segment::Anchor { a: 1, b: 0 },
                Segment::Gap { a: 2..3, b: 1..2 },
            ]
        );
    }

    #[test]
    fn test_segments_without_pairs() {
        assert_eq!(segments(&[], 2, 3), vec![Segment::Gap { a: 0..2, b: 0..3 }]);
    }

    #[test]
    fn test_is_subsequence() {
        assert!(is_subsequence::<&str>(&[], &["a"]));
        assert!(is_subsequence(&["a", "c"], &["a", "b", "c"]));
        assert!(!is_subsequence(&["c", "a"], &["a", "b", "c"]));
        assert!(!is_subsequence(&["a"], &[]));
    }

    proptest! {
        #[test]
        fn prop_alignment_is_sound(
            a in proptest::collection::vec(0u8..4, 0..24),
            b in proptest::collection::vec(0u8..4, 0..24),
        ) {
            let pairs = align(&a, &b, usize::MAX).unwrap();
            for window in pairs.windows(2) {
                prop_assert!(window[0].0 < window[1].0);
                prop_assert!(window[0].1 < window[1].1);
            }
            for &(i, j) in &pairs {
                prop_assert_eq!(a[i], b[j]);
            }
        }

        #[test]
        fn prop_self_alignment_is_total(a in proptest::collection::vec(0u8..4, 0..24)) {
            let pairs = align(&a, &a, usize::MAX).unwrap();
            prop_assert_eq!(pairs.len(), a.len());
        }
    }
}
