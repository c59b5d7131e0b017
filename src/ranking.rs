use std::collections::HashSet;

use crate::error::AskError;
use crate::models::SearchResult;

pub const MAX_SOURCES: usize = 15;

pub fn rank_sources(
    mut results: Vec<SearchResult>,
    max_sources: usize,
) -> Result<Vec<SearchResult>, AskError> {
    if results.is_empty() {
        return Err(AskError::NoResults);
    }

    // `None < Some(_)`, so comparing b to a puts undated entries last.
    results.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));

    let mut seen = HashSet::new();
    results.retain(|r| seen.insert(r.url.clone()));

    results.truncate(max_sources);
    Ok(results)
}
