//! Page requests and pagination metadata for list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Build from optional query parameters, applying defaults and bounds
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        }
        .normalized()
    }

    /// Page at least 1; limit within `1..=200`, zero meaning the default
    pub fn normalized(self) -> Self {
        let limit = match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            l => l.min(MAX_PAGE_LIMIT),
        };
        Self {
            page: self.page.max(1),
            limit,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Slice one page out of an already ordered collection
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(start)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Pagination block returned next to list data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(total: u64, request: PageRequest) -> Self {
        let request = request.normalized();
        Self {
            total,
            page: request.page,
            limit: request.limit,
            total_pages: total.div_ceil(u64::from(request.limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_bounds() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, limit: 50 });
        assert_eq!(PageRequest::new(Some(0), Some(1000)), PageRequest { page: 1, limit: 200 });
        assert_eq!(PageRequest::new(Some(3), Some(0)).limit, 50);
    }

    #[test]
    fn test_offset_and_slice() {
        let request = PageRequest::new(Some(2), Some(2));
        assert_eq!(request.offset(), 2);
        assert_eq!(request.slice(&[1, 2, 3, 4, 5]), vec![3, 4]);
        assert!(PageRequest::new(Some(9), Some(2)).slice(&[1, 2]).is_empty());
    }

    #[test]
    fn test_total_pages() {
        let pagination = Pagination::new(101, PageRequest::new(Some(1), Some(50)));
        assert_eq!(pagination.total_pages, 3);
        assert_eq!(Pagination::new(0, PageRequest::default()).total_pages, 0);
    }
}
