//! Page arithmetic shared by the readers.
//!
//! Pages are 1-indexed everywhere. Callers validate `page >= 1` and
//! `per_page >= 1` through [`check_page`] before any of these run. Page
//! numbers come from users, so the window helpers refuse pages whose rows
//! lie beyond `i64`.

use crate::error::{AppError, Result};

/// Rejects page numbers and page sizes below 1, and pages too deep to address.
pub fn check_page(page: i64, per_page: i64) -> Result<()> {
    if page < 1 {
        return Err(AppError::ValidationError(format!(
            "page must be at least 1, got {}",
            page
        )));
    }
    if per_page < 1 {
        return Err(AppError::ValidationError(format!(
            "page size must be at least 1, got {}",
            per_page
        )));
    }
    last_row(page, per_page).map(|_| ())
}

/// Index of the last row on `page`, `per_page * page`.
fn last_row(page: i64, per_page: i64) -> Result<i64> {
    per_page.checked_mul(page).ok_or_else(|| {
        AppError::ValidationError(format!(
            "page {} is out of range for page size {}",
            page, per_page
        ))
    })
}

/// `ceil(count / per_page)`, never less than 1 so an empty thread still has a page.
pub fn total_pages(count: i64, per_page: i64) -> i64 {
    if count <= 0 {
        return 1;
    }
    (count - 1) / per_page + 1
}

/// The thread page a message with `ordinal` is rendered on.
pub fn page_of_ordinal(ordinal: i32, per_page: i64) -> i64 {
    (i64::from(ordinal.max(1)) - 1) / per_page + 1
}

/// `(limit, offset)` for a page of rows.
pub fn limit_offset(page: i64, per_page: i64) -> Result<(i64, i64)> {
    let last = last_row(page, per_page)?;
    Ok((per_page, last - per_page))
}

/// Inclusive 1-based rank window `[per_page*(page-1)+1, per_page*page]`.
pub fn rank_window(page: i64, per_page: i64) -> Result<(i64, i64)> {
    let last = last_row(page, per_page)?;
    Ok((last - per_page + 1, last))
}
