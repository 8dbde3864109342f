//! Offset-paged taxonomy listings.

use std::collections::BTreeSet;

use tracing::debug;

use crate::contract::{CatalogSource, Documents};
use crate::error::SourceError;
use crate::payload::{path, scalar_key};

/// Top-level destination ids: the first segment of each `lookupId`
/// (e.g. `"8.724.5421"` → `"8"`).
pub fn root_destination_ids(destinations: &Documents) -> BTreeSet<String> {
    destinations
        .values()
        .filter_map(|d| path(d, "lookupId").and_then(scalar_key))
        .filter_map(|lookup| lookup.split('.').next().map(str::to_string))
        .filter(|root| !root.is_empty())
        .collect()
}

/// Every attraction across all root destinations.
///
/// The listing is 1-based and pages until an empty page comes back. When the
/// same id shows up twice the later page wins.
pub async fn fetch_all_attractions<C>(
    source: &C,
    locale: &str,
    destinations: &Documents,
    page_size: u32,
) -> Result<Documents, SourceError>
where
    C: CatalogSource + ?Sized,
{
    let page_size = page_size.max(1);
    let mut all = Documents::new();
    for destination_id in root_destination_ids(destinations) {
        let mut offset = 1;
        loop {
            let page = source
                .attractions(locale, &destination_id, offset, page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            debug!(
                locale,
                destination_id = %destination_id,
                offset,
                count = page.len(),
                "Fetched attraction page"
            );
            all.extend(page);
            offset += page_size;
        }
    }
    Ok(all)
}
