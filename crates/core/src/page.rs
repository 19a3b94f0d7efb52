//! Page-number pagination shared by every list endpoint.

use serde::{Deserialize, Serialize};

/// Requested page window (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 500;

    /// Zero or missing values fall back to the defaults.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT);
        Self { page, limit }
    }

    /// Lenient parsing of raw query-string values; garbage means "default".
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<u32>().ok());
        Self::new(parse(page), parse(limit))
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }

    /// Pull the page number back into `1..=total_pages`.
    pub fn clamp_to(&self, total: usize) -> Self {
        let pages = total_pages(total, self.limit);
        Self {
            page: self.page.clamp(1, pages),
            limit: self.limit,
        }
    }
}

fn total_pages(total: usize, limit: u32) -> u32 {
    let limit = limit.max(1) as usize;
    (total.div_ceil(limit)).max(1) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
    pub total_pages: u32,
}

/// One page of results plus the paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: PageInfo,
}

impl<T> Page<T> {
    /// Cut the requested window out of the full, already-sorted result set.
    pub fn from_vec(all: Vec<T>, req: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(req.offset())
            .take(req.limit as usize)
            .collect();
        Self {
            items,
            page: PageInfo {
                page: req.page,
                page_size: req.limit,
                total,
                total_pages: total_pages(total, req.limit),
            },
        }
    }

    /// Same as [`Page::from_vec`] but an out-of-range page snaps to the last one.
    pub fn clamped(all: Vec<T>, req: PageRequest) -> Self {
        let req = req.clamp_to(all.len());
        Self::from_vec(all, req)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn garbage_query_values_fall_back_to_defaults() {
        let req = PageRequest::from_query(Some("abc"), Some("-3"));
        assert_eq!(req, PageRequest::default());
    }

    #[test]
    fn empty_result_still_reports_one_page() {
        let page: Page<u8> = Page::from_vec(vec![], PageRequest::default());
        assert_eq!(page.page.total_pages, 1);
        assert!(page.items.is_empty());
    }

    #[test]
    fn clamped_snaps_to_last_page() {
        let page = Page::clamped((0..45).collect::<Vec<_>>(), PageRequest::new(Some(9), Some(20)));
        assert_eq!(page.page.page, 3);
        assert_eq!(page.items, (40..45).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn pages_partition_the_result_set(total in 0usize..300, limit in 1u32..50) {
            let all: Vec<usize> = (0..total).collect();
            let pages = total_pages(total, limit);
            let mut seen = Vec::new();
            for p in 1..=pages {
                let page = Page::from_vec(all.clone(), PageRequest::new(Some(p), Some(limit)));
                prop_assert!(page.items.len() <= limit as usize);
                seen.extend(page.items);
            }
            prop_assert_eq!(seen, all);
        }
    }
}
