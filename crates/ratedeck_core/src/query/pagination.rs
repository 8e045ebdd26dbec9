//! Page arithmetic.

/// Number of pages for `total` records; never less than 1.
pub fn total_pages(total: usize, page_size: usize) -> usize {
    if total == 0 || page_size == 0 {
        1
    } else {
        total.div_ceil(page_size)
    }
}

/// Clamps a requested page into `[1, total_pages]`.
pub fn clamp_page(target: i64, total_pages: usize) -> usize {
    let last = i64::try_from(total_pages.max(1)).unwrap_or(i64::MAX);
    // The clamped value is in 1..=last, which fits in usize.
    usize::try_from(target.clamp(1, last)).unwrap_or(1)
}

/// Offset of the first record of `page` (1-based).
pub fn offset_for(page: usize, page_size: usize) -> usize {
    page.saturating_sub(1).saturating_mul(page_size)
}

/// Parses a page number typed by a user.
pub fn parse_page_input(input: &str) -> Option<i64> {
    input.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_set_has_one_page() {
        assert_eq!(total_pages(0, 100), 1);
        assert_eq!(total_pages(1, 100), 1);
        assert_eq!(total_pages(101, 100), 2);
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_page(0, 5), 1);
        assert_eq!(clamp_page(-3, 5), 1);
        assert_eq!(clamp_page(99, 5), 5);
        assert_eq!(clamp_page(3, 5), 3);
        assert_eq!(clamp_page(3, 0), 1);
    }

    #[test]
    fn offsets() {
        assert_eq!(offset_for(1, 25), 0);
        assert_eq!(offset_for(3, 25), 50);
        assert_eq!(offset_for(0, 25), 0);
    }

    #[test]
    fn page_input() {
        assert_eq!(parse_page_input(" 7 "), Some(7));
        assert_eq!(parse_page_input("seven"), None);
    }

    proptest::proptest! {
        #[test]
        fn clamped_page_is_in_range(target in any::<i64>(), total in 0usize..10_000, size in 1usize..500) {
            let pages = total_pages(total, size);
            let page = clamp_page(target, pages);
            prop_assert!((1..=pages).contains(&page));
            prop_assert!(total == 0 || offset_for(page, size) < total);
        }
    }
}
