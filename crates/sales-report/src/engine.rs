//! Filter / sort / paginate engine behind the fact tables
//!
//! Everything here is pure and synchronous: the visible page is re-derived
//! from the full record set whenever any input changes.

use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;

use crate::error::ConsultError;
use crate::records::{FactField, NormalizedRecord};

// =============================================================================
// Areas
// =============================================================================

/// Organizational area as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct Area {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// User-toggleable area checkbox
#[derive(Debug, Clone, PartialEq)]
pub struct AreaFilter {
    pub id: String,
    pub name: String,
    pub checked: bool,
}

impl AreaFilter {
    /// One filter per area, pre-checked for the current user's area
    pub fn from_areas(areas: &[Area], user_area: Option<&str>) -> Vec<AreaFilter> {
        areas
            .iter()
            .map(|area| AreaFilter {
                id: area.id.clone(),
                name: area.name.clone(),
                checked: user_area == Some(area.name.as_str()),
            })
            .collect()
    }
}

/// Keep records whose area is checked. With no filters at all, everything passes.
pub fn filter_by_area(records: &[NormalizedRecord], areas: &[AreaFilter]) -> Vec<NormalizedRecord> {
    if areas.is_empty() {
        return records.to_vec();
    }

    records
        .iter()
        .filter(|record| {
            record.area_id().is_some_and(|area_id| {
                areas
                    .iter()
                    .any(|filter| filter.checked && filter.id == area_id)
            })
        })
        .cloned()
        .collect()
}

// =============================================================================
// Sorting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: FactField,
    pub order: SortOrder,
}

/// Sort in place by a single column.
///
/// The sort is stable: records with equal keys keep their incoming order,
/// for both ascending and descending.
pub fn sort_records(records: &mut [NormalizedRecord], spec: &SortSpec) {
    records.sort_by(|a, b| {
        let cmp = a.value(spec.field).compare(&b.value(spec.field));
        match spec.order {
            SortOrder::Asc => cmp,
            SortOrder::Desc => cmp.reverse(),
        }
    });
}

// =============================================================================
// Pagination
// =============================================================================

/// Slice out a 1-based page. Pages past the end (or page 0) are empty.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    if page == 0 || page_size == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

// =============================================================================
// View
// =============================================================================

/// Inputs of a table besides the records themselves
#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub areas: Vec<AreaFilter>,
    pub sort: Option<SortSpec>,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

impl ViewQuery {
    pub fn new(page_size: usize) -> Self {
        Self {
            areas: Vec::new(),
            sort: None,
            page: 1,
            page_size,
        }
    }
}

/// Derived table state
#[derive(Debug, Clone, Default)]
pub struct View {
    /// Full post-filter, sorted set: the base for totals and export
    pub filtered: Vec<NormalizedRecord>,
    /// Visible slice of `filtered`
    pub page: Vec<NormalizedRecord>,
    pub page_number: usize,
    pub page_size: usize,
    pub page_count: usize,
    pub denied: bool,
}

impl View {
    fn denied(query: &ViewQuery) -> Self {
        Self {
            page_number: query.page,
            page_size: query.page_size,
            denied: true,
            ..Default::default()
        }
    }

    pub fn total_items(&self) -> usize {
        self.filtered.len()
    }

    /// Sum of net amounts over the whole filtered set (not just the page)
    pub fn sale_total(&self) -> f64 {
        self.filtered.iter().map(|r| r.net_amount()).sum()
    }

    /// Position of the first visible row within the filtered set (1-based)
    pub fn first_item(&self) -> usize {
        self.page_number.saturating_sub(1) * self.page_size + 1
    }

    pub fn check_access(&self) -> Result<(), ConsultError> {
        if self.denied {
            Err(ConsultError::PermissionDenied)
        } else {
            Ok(())
        }
    }
}

/// Area filter, then sort, then page. Without read access the view is empty.
pub fn derive_view(records: &[NormalizedRecord], query: &ViewQuery, can_read: bool) -> View {
    if !can_read {
        return View::denied(query);
    }

    let mut filtered = filter_by_area(records, &query.areas);
    if let Some(spec) = &query.sort {
        sort_records(&mut filtered, spec);
    }

    let page = paginate(&filtered, query.page, query.page_size).to_vec();

    View {
        page_count: page_count(filtered.len(), query.page_size),
        page,
        filtered,
        page_number: query.page,
        page_size: query.page_size,
        denied: false,
    }
}
