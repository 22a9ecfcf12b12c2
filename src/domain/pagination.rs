//! Pagination bound calculation.
//!
//! Responsibility:
//! - upper page bound of a leaf from an (unreliable) total-result count
//! - hard page cap so a bad count parse can never make a crawl unbounded

/// Items shown per listing page upstream
pub const ITEMS_PER_PAGE: u32 = 24;

/// Hard cap on pages visited per leaf
pub const MAX_PAGES_PER_LEAF: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCalculator {
    items_per_page: u32,
    max_pages: u32,
}

impl Default for PaginationCalculator {
    fn default() -> Self {
        Self {
            items_per_page: ITEMS_PER_PAGE,
            max_pages: MAX_PAGES_PER_LEAF,
        }
    }
}

impl PaginationCalculator {
    pub fn new(items_per_page: u32, max_pages: u32) -> Self {
        Self {
            items_per_page: items_per_page.max(1),
            max_pages: max_pages.max(1),
        }
    }

    pub const fn items_per_page(&self) -> u32 {
        self.items_per_page
    }

    pub const fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Upper page bound for a leaf.
    /// Rules:
    /// - count unknown → hard cap
    /// - otherwise ceil(count / items_per_page), at least 1 (page 1 is already loaded), at most the cap
    pub fn page_bound(&self, total_results: Option<u32>) -> u32 {
        match total_results {
            None => self.max_pages,
            Some(total) => total
                .div_ceil(self.items_per_page)
                .clamp(1, self.max_pages),
        }
    }
}
