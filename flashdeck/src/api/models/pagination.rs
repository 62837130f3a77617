//! Shared pagination types for API query parameters.
//!
//! List endpoints are page based: `page` starts at 1 and `limit` is clamped to the configured
//! maximum. Responses carry the total and the page count so the client can render a pager.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use crate::config::LimitsConfig;

/// Page parameters for list endpoints.
///
/// Values arrive as query strings, so they are parsed with `DisplayFromStr`.
#[serde_as]
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// 1-based page number (default: 1)
    #[param(default = 1, minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub page: Option<i64>,

    /// Items per page (default and maximum come from configuration)
    #[param(minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// The limit, clamped between 1 and `limits.max_page_size`.
    #[inline]
    pub fn limit(&self, limits: &LimitsConfig) -> i64 {
        self.limit
            .unwrap_or(limits.default_page_size)
            .clamp(1, limits.max_page_size.max(1))
    }

    /// `(page, limit, skip)` for a repository call.
    pub fn params(&self, limits: &LimitsConfig) -> (i64, i64, i64) {
        let page = self.page();
        let limit = self.limit(limits);
        (page, limit, (page - 1).saturating_mul(limit))
    }
}

/// Number of pages needed for `total` items, at least 1.
pub fn page_count(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    ((total + limit - 1) / limit).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_come_from_limits() {
        let limits = LimitsConfig::default();
        let pagination = Pagination::default();
        assert_eq!(pagination.params(&limits), (1, limits.default_page_size, 0));
    }

    #[test]
    fn test_limit_is_clamped_and_page_floored() {
        let limits = LimitsConfig::default();
        let pagination = Pagination {
            page: Some(0),
            limit: Some(10_000),
        };
        assert_eq!(pagination.params(&limits), (1, limits.max_page_size, 0));

        let pagination = Pagination {
            page: Some(3),
            limit: Some(0),
        };
        assert_eq!(pagination.params(&limits), (3, 1, 2));
    }

    #[test]
    fn test_query_strings_parse() {
        let pagination: Pagination = serde_urlencoded::from_str("page=2&limit=5").unwrap();
        assert_eq!(pagination.page, Some(2));
        assert_eq!(pagination.limit, Some(5));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
    }
}
