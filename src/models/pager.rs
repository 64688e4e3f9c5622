use serde::{Deserialize, Serialize};

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// Pagination and sort state threaded through every query.
///
/// After each query `total_count` holds the number of matches, `cursor` the
/// token of the next page (`None` once exhausted) and `page` has advanced by
/// one. Passing the same pager back in therefore walks the result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    /// 1-based page number, used when no cursor is set
    pub page: u64,

    /// Results per page
    pub page_size: usize,

    /// Field to order by instead of the shape's natural order
    pub sort_by: Option<String>,

    /// Direction for `sort_by`
    pub sort_ascending: bool,

    /// Opaque token continuing after the last returned record
    pub cursor: Option<String>,

    /// Total matches of the last executed query
    pub total_count: u64,
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            sort_ascending: true,
            cursor: None,
            total_count: 0,
        }
    }
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.sort_ascending = ascending;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Force `page_size` into `[1, max_page_size]` and `page` to at least 1
    pub fn clamp(&mut self, max_page_size: usize) {
        self.page_size = self.page_size.clamp(1, max_page_size.max(1));
        self.page = self.page.max(1);
    }

    /// Offset of the first record of the current page
    pub fn offset(&self) -> usize {
        let page = self.page.max(1) - 1;
        usize::try_from(page)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.page_size)
    }

    /// Sort field, ignoring blank values
    pub fn sort_field(&self) -> Option<&str> {
        self.sort_by
            .as_deref()
            .map(str::trim)
            .filter(|field| !field.is_empty())
    }

    /// Whether the last query left more records to fetch
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}
