//! Page planning for `package_search`.

use std::sync::Arc;

use crate::models::{PageRequest, Portal};

/// One planned page: `(offset, page_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub offset: u64,
    pub page_size: u64,
}

/// Computes the pages to request for a portal holding `total_count` packages.
///
/// A positive `limit` caps the number of packages considered. At least one
/// page is always planned, so an empty but reachable portal still gets one
/// verification request. No planned offset reaches the effective total,
/// except the mandatory first page of an empty portal.
///
/// A `page_size` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use dpx_core::pagination::plan;
///
/// let offsets: Vec<u64> = plan(250, 100, 0).iter().map(|p| p.offset).collect();
/// assert_eq!(offsets, vec![0, 100, 200]);
///
/// assert_eq!(plan(0, 100, 0).len(), 1);
/// assert_eq!(plan(1000, 100, 150).len(), 2);
/// ```
pub fn plan(total_count: u64, page_size: u64, limit: u64) -> Vec<PageSpan> {
    let page_size = page_size.max(1);
    let effective_total = if limit > 0 {
        total_count.min(limit)
    } else {
        total_count
    };

    let pages = effective_total.div_ceil(page_size).max(1);

    (0..pages)
        .map(|i| PageSpan {
            offset: i * page_size,
            page_size,
        })
        .collect()
}

/// Expands a portal's package count into concrete page requests.
pub fn page_requests(
    portal: &Arc<Portal>,
    namespace: &Arc<str>,
    total_count: u64,
    page_size: u64,
    limit: u64,
) -> Vec<PageRequest> {
    plan(total_count, page_size, limit)
        .into_iter()
        .map(|span| PageRequest {
            portal: Arc::clone(portal),
            namespace: Arc::clone(namespace),
            offset: span.offset,
            page_size: span.page_size,
        })
        .collect()
}
