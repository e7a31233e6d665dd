//! Offset pagination types.
//!
//! A [`Page`] carries the total count; a [`Slice`] only says whether another
//! page exists. Both are produced from the same ordering (id ascending) so
//! the same request yields the same items either way.

use serde::{Deserialize, Serialize};

use crate::error::{IamError, IamResult};

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Page number, starting at 1.
    pub current: u32,
    /// Number of items per page.
    pub page_size: u32,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub fn new(current: u32, page_size: u32) -> Self {
        Self { current, page_size }
    }

    /// Validates the request bounds.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `current` is 0 or `page_size` is
    /// outside `1..=MAX_PAGE_SIZE`.
    pub fn validate(&self) -> IamResult<()> {
        if self.current == 0 {
            return Err(IamError::invalid_input("current page starts at 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(IamError::invalid_input(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    /// Number of items to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.current.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Number of items to return.
    #[must_use]
    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// A page of items with the total count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Page number, starting at 1.
    pub current: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Total number of matching items.
    pub total: u64,
}

impl<T> Page<T> {
    /// Creates a page.
    #[must_use]
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            current: request.current,
            page_size: request.page_size,
            total,
        }
    }

    /// Builds a page out of a fully materialized, already ordered list.
    #[must_use]
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .collect();
        Self::new(items, request, total)
    }

    /// Total number of pages.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }

    /// Maps the items.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            current: self.current,
            page_size: self.page_size,
            total: self.total,
        }
    }
}

/// A page of items without a total count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice<T> {
    /// Items on this slice.
    pub items: Vec<T>,
    /// Page number, starting at 1.
    pub current: u32,
    /// Requested page size.
    pub page_size: u32,
    /// `true` if another slice follows.
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// Builds a slice from up to `page_size + 1` fetched items.
    ///
    /// The extra item, if present, only signals `has_next` and is dropped.
    #[must_use]
    pub fn from_overfetch(mut items: Vec<T>, request: PageRequest) -> Self {
        let page_size = request.page_size as usize;
        let has_next = items.len() > page_size;
        items.truncate(page_size);
        Self {
            items,
            current: request.current,
            page_size: request.page_size,
            has_next,
        }
    }

    /// Builds a slice out of a fully materialized, already ordered list.
    #[must_use]
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let fetched = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize + 1)
            .collect();
        Self::from_overfetch(fetched, request)
    }

    /// Maps the items.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            items: self.items.into_iter().map(f).collect(),
            current: self.current,
            page_size: self.page_size,
            has_next: self.has_next,
        }
    }
}
