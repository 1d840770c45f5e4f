//! Consultation screen state as a reducer
//!
//! Each search gets a new [`Generation`]. Asynchronous results carry the
//! generation that spawned them, and results from a superseded search are
//! rejected with [`ConsultError::StaleQuerySuperseded`] instead of
//! overwriting newer state.

use std::fmt;

use crate::constants;
use crate::costs::CostReport;
use crate::engine::{AreaFilter, SortSpec, ViewQuery};
use crate::error::ConsultError;
use crate::records::NormalizedRecord;

/// Search counter tagging in-flight work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive date range of a search (YYYY-MM-DD)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Progress of the cost aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationStatus {
    #[default]
    Idle,
    Computing,
    Done,
    Failed,
}

impl AggregationStatus {
    /// Note shown next to the totals
    pub fn note(self) -> &'static str {
        match self {
            AggregationStatus::Computing => constants::COMPUTING_NOTE,
            _ => "",
        }
    }
}

/// Things that happen to a consultation
#[derive(Debug)]
pub enum Event {
    /// The range query returned and its facts were normalized
    RangeFetched {
        generation: Generation,
        records: Vec<NormalizedRecord>,
    },
    /// Every detail lookup of the search has settled
    DetailResolved {
        generation: Generation,
        report: CostReport,
    },
    /// The current search was abandoned (failed fetch, malformed batch)
    QueryInvalidated,
}

#[derive(Debug)]
pub struct ConsultState {
    generation: Generation,
    range: Option<DateRange>,
    records: Vec<NormalizedRecord>,
    costs: Option<CostReport>,
    status: AggregationStatus,
    query: ViewQuery,
}

impl ConsultState {
    pub fn new(page_size: usize) -> Self {
        Self {
            generation: Generation::default(),
            range: None,
            records: Vec::new(),
            costs: None,
            status: AggregationStatus::Idle,
            query: ViewQuery::new(page_size),
        }
    }

    /// Start a new search, superseding any in-flight one.
    /// The previous result set is dropped and the table goes back to page 1.
    pub fn begin_search(&mut self, range: DateRange) -> Generation {
        self.generation = self.generation.next();
        self.range = Some(range);
        self.records.clear();
        self.costs = None;
        self.status = AggregationStatus::Computing;
        self.query.page = 1;
        self.generation
    }

    pub fn apply(&mut self, event: Event) -> Result<(), ConsultError> {
        match event {
            Event::RangeFetched {
                generation,
                records,
            } => {
                self.ensure_current(generation)?;
                self.records = records;
            }
            Event::DetailResolved { generation, report } => {
                self.ensure_current(generation)?;
                self.status = if report.has_failures() {
                    AggregationStatus::Failed
                } else {
                    AggregationStatus::Done
                };
                self.costs = Some(report);
            }
            Event::QueryInvalidated => {
                self.generation = self.generation.next();
                self.range = None;
                self.records.clear();
                self.costs = None;
                self.status = AggregationStatus::Idle;
            }
        }
        Ok(())
    }

    fn ensure_current(&self, generation: Generation) -> Result<(), ConsultError> {
        if generation != self.generation {
            return Err(ConsultError::StaleQuerySuperseded {
                stale: generation,
                current: self.generation,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Table inputs
    // =========================================================================

    pub fn set_areas(&mut self, areas: Vec<AreaFilter>) {
        self.query.areas = areas;
    }

    /// Flip one area checkbox. Returns false if the area is unknown.
    pub fn toggle_area(&mut self, area_id: &str) -> bool {
        match self.query.areas.iter_mut().find(|a| a.id == area_id) {
            Some(area) => {
                area.checked = !area.checked;
                true
            }
            None => false,
        }
    }

    /// Check exactly the given areas, unchecking the rest
    pub fn check_only(&mut self, area_ids: &[String]) {
        for area in &mut self.query.areas {
            area.checked = area_ids.contains(&area.id);
        }
    }

    pub fn check_all(&mut self) {
        for area in &mut self.query.areas {
            area.checked = true;
        }
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.query.sort = sort;
    }

    pub fn set_page(&mut self, page: usize) {
        self.query.page = page;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn range(&self) -> Option<&DateRange> {
        self.range.as_ref()
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn costs(&self) -> Option<&CostReport> {
        self.costs.as_ref()
    }

    pub fn status(&self) -> AggregationStatus {
        self.status
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }
}
