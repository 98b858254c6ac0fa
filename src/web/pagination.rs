use crate::web::error::ApiError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

/// One page of a page-number paginated listing.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Where a requested page sits in a listing of `count` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: usize,
    pub size: usize,
    pub last: usize,
}

impl PageWindow {
    /// Resolves the `page` query value. Anything but a positive integer no
    /// greater than the last page is rejected; an empty listing still has
    /// page 1.
    pub fn resolve(raw: Option<&str>, count: i64, size: usize) -> Result<Self, ApiError> {
        let size = size.max(1);
        let number = match raw.map(str::trim) {
            None | Some("") => 1,
            Some(value) => value.parse::<usize>().map_err(|_| ApiError::PageNotFound)?,
        };
        let count = usize::try_from(count).unwrap_or(0);
        let last = count.div_ceil(size).max(1);
        if number == 0 || number > last {
            return Err(ApiError::PageNotFound);
        }
        Ok(Self { number, size, last })
    }

    pub fn offset(&self) -> usize {
        (self.number - 1) * self.size
    }

    pub fn into_page<T>(self, count: i64, results: Vec<T>, base_url: &str) -> Page<T> {
        let link = |n: usize| format!("{}?page={}", base_url, n);
        Page {
            count,
            next: (self.number < self.last).then(|| link(self.number + 1)),
            previous: (self.number > 1).then(|| link(self.number - 1)),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_items_make_three_pages() {
        let first = PageWindow::resolve(None, 7, 3).unwrap();
        assert_eq!((first.number, first.last, first.offset()), (1, 3, 0));
        let third = PageWindow::resolve(Some("3"), 7, 3).unwrap();
        assert_eq!(third.offset(), 6);
        assert!(PageWindow::resolve(Some("4"), 7, 3).is_err());
    }

    #[test]
    fn empty_listing_has_a_first_page() {
        let page = PageWindow::resolve(Some("1"), 0, 3).unwrap();
        let page = page.into_page::<()>(0, vec![], "http://x/blogs/");
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);
        assert!(PageWindow::resolve(Some("2"), 0, 3).is_err());
    }

    #[test]
    fn garbage_pages_are_rejected() {
        for raw in ["0", "-1", "abc", "1.5"] {
            assert!(PageWindow::resolve(Some(raw), 10, 3).is_err(), "{raw}");
        }
    }

    #[test]
    fn links_point_at_neighbours() {
        let page = PageWindow::resolve(Some("2"), 7, 3)
            .unwrap()
            .into_page(7, vec![4, 5, 6], "http://x/blogs/");
        assert_eq!(page.next.as_deref(), Some("http://x/blogs/?page=3"));
        assert_eq!(page.previous.as_deref(), Some("http://x/blogs/?page=1"));
    }
}
