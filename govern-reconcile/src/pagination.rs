//! Pagination walker: drains a paged listing into one collection.

use crate::context::Context;
use crate::error::RemoteError;
use crate::remote::Page;

/// Fetch pages via `fetch` until the listing is exhausted, returning all
/// items in page order.
///
/// Starts at the remote's default page (`None`) and follows `next_page`.
/// Stops as soon as `current_page >= total_pages`, which also covers the
/// empty listing reported as zero total pages. A missing or non-advancing
/// `next_page` also stops the walk.
pub fn collect_pages<T, F>(ctx: &Context, mut fetch: F) -> Result<Vec<T>, RemoteError>
where
    F: FnMut(Option<u32>) -> Result<Page<T>, RemoteError>,
{
    let mut items = Vec::new();
    let mut page_number = None;
    loop {
        ctx.check()?;
        let page = fetch(page_number)?;
        items.extend(page.items);

        if page.current_page >= page.total_pages {
            break;
        }
        match page.next_page {
            Some(next) if next > page.current_page => page_number = Some(next),
            _ => {
                tracing::warn!(
                    current = page.current_page,
                    total = page.total_pages,
                    "listing reported more pages without a usable next page; stopping"
                );
                break;
            }
        }
    }
    Ok(items)
}
