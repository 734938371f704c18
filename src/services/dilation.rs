//! Morphological mask dilation
//!
//! A k x k square structuring element anchored at `(k / 2, k / 2)`, applied
//! once. Pixels outside the mask never contribute. The square element is
//! separable, so the pass runs as a horizontal then a vertical sliding-window
//! OR, each linear in the number of pixels.

use crate::types::Mask;

/// Service for growing masks
pub struct MaskDilator;

impl MaskDilator {
    /// Dilate `mask` with a k x k square; `None` and `Some(0)` return it unchanged
    ///
    /// The output always has the input's dimensions.
    ///
    /// # Examples
    /// ```rust
    /// use inpaint_server::{services::MaskDilator, types::Mask};
    ///
    /// let mask = Mask::from_fn(7, 7, |x, y| x == 3 && y == 3);
    /// let grown = MaskDilator::dilate(&mask, Some(3));
    /// assert_eq!(grown.count(), 9);
    /// assert_eq!(grown.dimensions(), mask.dimensions());
    /// ```
    #[must_use]
    pub fn dilate(mask: &Mask, kernel_size: Option<u32>) -> Mask {
        let k = match kernel_size {
            None | Some(0 | 1) => return mask.clone(),
            Some(k) => k as usize,
        };
        let (width, height) = (mask.width() as usize, mask.height() as usize);
        if width == 0 || height == 0 {
            return mask.clone();
        }

        let anchor = k / 2;
        // Window covers offsets [-anchor, k - 1 - anchor]
        let before = anchor;
        let after = k - 1 - anchor;

        let source = mask.as_slice();
        let mut horizontal = vec![false; width * height];
        let mut prefix = vec![0u32; width.max(height) + 1];

        for y in 0..height {
            let row = &source[y * width..(y + 1) * width];
            Self::window_or(row.iter().copied(), width, before, after, &mut prefix, |x, v| {
                horizontal[y * width + x] = v;
            });
        }

        let mut output = vec![false; width * height];
        for x in 0..width {
            let column = (0..height).map(|y| horizontal[y * width + x]);
            Self::window_or(column, height, before, after, &mut prefix, |y, v| {
                output[y * width + x] = v;
            });
        }

        Mask::from_vec(mask.width(), mask.height(), output).unwrap_or_else(|_| mask.clone())
    }

    /// Sliding-window OR over a line of `len` values using a prefix count
    fn window_or<I, F>(
        values: I,
        len: usize,
        before: usize,
        after: usize,
        prefix: &mut [u32],
        mut emit: F,
    ) where
        I: Iterator<Item = bool>,
        F: FnMut(usize, bool),
    {
        prefix[0] = 0;
        for (i, v) in values.enumerate().take(len) {
            prefix[i + 1] = prefix[i] + u32::from(v);
        }
        for i in 0..len {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(len - 1);
            emit(i, prefix[hi + 1] > prefix[lo]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(mask: &Mask, k: u32) -> Mask {
        let anchor = i64::from(k / 2);
        Mask::from_fn(mask.width(), mask.height(), |x, y| {
            (0..i64::from(k)).any(|dy| {
                (0..i64::from(k)).any(|dx| {
                    let sx = i64::from(x) + dx - anchor;
                    let sy = i64::from(y) + dy - anchor;
                    sx >= 0 && sy >= 0 && mask.get(sx as u32, sy as u32)
                })
            })
        })
    }

    #[test]
    fn test_zero_and_none_are_noops() {
        let mask = Mask::from_fn(10, 8, |x, y| (x + y) % 5 == 0);
        assert_eq!(MaskDilator::dilate(&mask, None), mask);
        assert_eq!(MaskDilator::dilate(&mask, Some(0)), mask);
    }

    #[test]
    fn test_single_pixel_odd_kernel() {
        let mask = Mask::from_fn(11, 11, |x, y| x == 5 && y == 5);
        let grown = MaskDilator::dilate(&mask, Some(5));
        assert_eq!(grown.count(), 25);
        assert!(grown.get(3, 3));
        assert!(grown.get(7, 7));
        assert!(!grown.get(8, 5));
    }

    #[test]
    fn test_even_kernel_is_asymmetric() {
        let mask = Mask::from_fn(11, 11, |x, y| x == 5 && y == 5);
        let grown = MaskDilator::dilate(&mask, Some(4));
        assert_eq!(grown.count(), 16);
        // Anchor 2: the element reaches one pixel further up/left than down/right
        assert!(grown.get(4, 4) && grown.get(7, 7));
        assert!(!grown.get(3, 3));
    }

    #[test]
    fn test_matches_brute_force() {
        let mask = Mask::from_fn(23, 17, |x, y| (x * 7 + y * 3) % 11 == 0);
        for k in [2, 3, 4, 5, 8, 13, 50] {
            assert_eq!(MaskDilator::dilate(&mask, Some(k)), brute_force(&mask, k), "k={k}");
        }
    }

    #[test]
    fn test_dimensions_preserved_for_all_sizes() {
        let mask = Mask::from_fn(200, 150, |x, y| x > 90 && x < 110 && y > 60 && y < 90);
        for k in 0..=50 {
            let grown = MaskDilator::dilate(&mask, Some(k));
            assert_eq!(grown.dimensions(), (200, 150));
            assert!(grown.count() >= mask.count());
        }
    }

    #[test]
    fn test_edge_pixels_clip() {
        let mask = Mask::from_fn(4, 4, |x, y| x == 0 && y == 0);
        let grown = MaskDilator::dilate(&mask, Some(3));
        assert_eq!(grown.count(), 4);
        assert_eq!(grown.dimensions(), (4, 4));
    }
}
