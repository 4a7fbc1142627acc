//! Small capability traits that services compose instead of inheriting
//! generic CRUD behaviour.

use async_trait::async_trait;
use serde::Serialize;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Page<T> {
    /// Matches across all pages.
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Cut page `page` (1-based) of `page_size` items out of `items`.
    pub fn slice(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let count = items.len();
        let results = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            count,
            page,
            page_size,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            page: self.page,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// Lists resources matching a query.
#[async_trait]
pub trait Lister: Send + Sync {
    type Query: Send + 'static;
    type Item: Send;
    type Error: Send;

    async fn list(&self, query: Self::Query) -> Result<Page<Self::Item>, Self::Error>;
}

/// Creates a resource from validated input.
#[async_trait]
pub trait Creator: Send + Sync {
    type Input: Send + 'static;
    type Output: Send;
    type Error: Send;

    async fn create(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_pages_and_clamps_inputs() {
        let page = Page::slice((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(page.count, 45);
        assert_eq!(page.results, (41..=45).collect::<Vec<_>>());

        let first = Page::slice(vec![1, 2, 3], 0, 0);
        assert_eq!((first.page, first.page_size, first.results), (1, 1, vec![1]));

        let past_end = Page::slice(vec![1, 2, 3], 9, 2);
        assert!(past_end.results.is_empty());
    }
}
