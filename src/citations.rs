use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMarker {
    pub span: Range<usize>,
    // `None` is an index too large for `usize`.
    pub indexes: Vec<Option<usize>>,
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"\[(\d+(?:,\s*\d+)*)\]").unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

pub fn scan_markers(text: &str) -> Vec<CitationMarker> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let list = caps.get(1)?;
            let indexes = list
                .as_str()
                .split(',')
                .map(|n| n.trim().parse::<usize>().ok())
                .collect();
            Some(CitationMarker {
                span: whole.range(),
                indexes,
            })
        })
        .collect()
}

// Cited numbers first, then the uncited ones ascending.
pub fn citation_order(markers: &[CitationMarker], source_count: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(source_count);
    let mut seen = HashSet::new();

    for index in markers.iter().flat_map(|m| m.indexes.iter().flatten()) {
        if (1..=source_count).contains(index) && seen.insert(*index) {
            order.push(*index);
        }
    }

    for index in 1..=source_count {
        if !seen.contains(&index) {
            order.push(index);
        }
    }

    order
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationMap {
    new_by_old: HashMap<usize, usize>,
}

impl CitationMap {
    pub fn from_order(order: &[usize]) -> Self {
        let new_by_old = order
            .iter()
            .enumerate()
            .map(|(position, old)| (*old, position + 1))
            .collect();
        Self { new_by_old }
    }

    pub fn get(&self, old: usize) -> Option<usize> {
        self.new_by_old.get(&old).copied()
    }

    pub fn is_identity(&self) -> bool {
        self.new_by_old.iter().all(|(old, new)| old == new)
    }
}

pub fn rewrite(text: &str, markers: &[CitationMarker], map: &CitationMap) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for marker in markers {
        out.push_str(&text[cursor..marker.span.start]);
        cursor = marker.span.end;

        let renumbered: Vec<String> = marker
            .indexes
            .iter()
            .flatten()
            .filter_map(|old| map.get(*old))
            .map(|new| new.to_string())
            .collect();

        if renumbered.is_empty() {
            tracing::debug!(
                marker = &text[marker.span.clone()],
                "dropping citation marker with no known source"
            );
            continue;
        }

        out.push('[');
        out.push_str(&renumbered.join(","));
        out.push(']');
    }

    out.push_str(&text[cursor..]);
    out
}

pub fn reorder_sources<T: Clone>(sources: &[T], order: &[usize]) -> Vec<T> {
    order
        .iter()
        .filter_map(|old| sources.get(old.checked_sub(1)?).cloned())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reordered<T> {
    pub content: String,
    pub sources: Vec<T>,
}

pub fn reorder_by_reference<T: Clone>(content: &str, sources: &[T]) -> Reordered<T> {
    let markers = scan_markers(content);
    let order = citation_order(&markers, sources.len());
    let map = CitationMap::from_order(&order);

    Reordered {
        content: rewrite(content, &markers, &map),
        sources: reorder_sources(sources, &order),
    }
}
