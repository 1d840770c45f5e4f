//! Sales consultation session: date-range search, profit figures, paging
//!
//! Ties the gateway, the reducer and the engine together the way the
//! "Consulta de ventas" screen does.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::costs::{aggregate_costs, CostTotal};
use crate::engine::{derive_view, AreaFilter, SortSpec, View};
use crate::error::ConsultError;
use crate::gateway::FactGateway;
use crate::records::{normalize_records, NormalizedRecord};
use crate::state::{AggregationStatus, ConsultState, DateRange, Event, Generation};

/// Sale, cost and profit figures over the filtered set
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    /// Sum of net amounts ("Total de precio venta")
    pub sale_total: f64,
    /// Sum of cost basis ("Inversión a precio costo"); None until computed
    pub cost_total: Option<CostTotal>,
}

impl Totals {
    /// Sale total minus cost total ("Ganancia"), when the cost is known
    pub fn profit(&self) -> Option<f64> {
        self.cost_total
            .as_ref()
            .and_then(CostTotal::amount)
            .map(|cost| self.sale_total - cost)
    }
}

/// Everything the screen shows after a derivation pass
#[derive(Debug, Clone)]
pub struct ConsultView {
    pub table: View,
    pub totals: Totals,
    pub status: AggregationStatus,
}

/// Detail lookups still to run for a search
#[derive(Debug)]
pub struct PendingCosts {
    generation: Generation,
    records: Vec<NormalizedRecord>,
}

impl PendingCosts {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Run the lookups and wrap the settled report as an event for the
    /// search that spawned them
    pub async fn compute<G: FactGateway + ?Sized>(self, gateway: &G) -> Event {
        let report = aggregate_costs(gateway, &self.records).await;
        Event::DetailResolved {
            generation: self.generation,
            report,
        }
    }
}

pub struct ConsultSession<G> {
    gateway: G,
    can_read: bool,
    user_area: Option<String>,
    state: ConsultState,
}

impl<G: FactGateway> ConsultSession<G> {
    pub fn new(gateway: G, can_read: bool, user_area: Option<String>, page_size: usize) -> Self {
        Self {
            gateway,
            can_read,
            user_area,
            state: ConsultState::new(page_size),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn state(&self) -> &ConsultState {
        &self.state
    }

    /// Fetch the areas and pre-check the user's own
    pub async fn load_areas(&mut self) -> Result<&[AreaFilter]> {
        let areas = self
            .gateway
            .fetch_areas()
            .await
            .context("Failed to load areas")?;
        self.state
            .set_areas(AreaFilter::from_areas(&areas, self.user_area.as_deref()));
        Ok(self.state.query().areas.as_slice())
    }

    /// Load the areas, falling back to no area filters (every fact passes)
    /// when they can't be fetched. The search does not depend on them.
    pub async fn load_areas_or_unfiltered(&mut self) -> &[AreaFilter] {
        let loaded = self.load_areas().await.map(|_| ());
        if let Err(e) = loaded {
            warn!(error = %format!("{:#}", e), "areas unavailable, not filtering by area");
            self.state.set_areas(Vec::new());
        }
        self.state.query().areas.as_slice()
    }

    /// Run a full search: range fetch, normalization, then cost aggregation
    pub async fn search(&mut self, range: DateRange) -> Result<()> {
        let pending = self.fetch_range(range).await?;
        debug!(generation = %pending.generation(), "aggregating costs");
        let event = pending.compute(self.gateway()).await;
        self.publish(event);
        Ok(())
    }

    /// First half of a search. The returned lookups can be computed
    /// independently and published later; if another search starts in the
    /// meantime their result is discarded.
    pub async fn fetch_range(&mut self, range: DateRange) -> Result<PendingCosts> {
        if !self.can_read {
            return Err(ConsultError::PermissionDenied.into());
        }

        let generation = self.state.begin_search(range.clone());
        info!(generation = %generation, start = %range.start, end = %range.end, "searching facts");

        let raw = match self
            .gateway
            .fetch_records_in_range(&range.start, &range.end)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.publish(Event::QueryInvalidated);
                return Err(e.context(format!(
                    "Failed to fetch facts from {} to {}",
                    range.start, range.end
                )));
            }
        };

        let records = match normalize_records(&raw) {
            Ok(records) => records,
            Err(e) => {
                self.publish(Event::QueryInvalidated);
                return Err(e.into());
            }
        };

        self.publish(Event::RangeFetched {
            generation,
            records: records.clone(),
        });

        Ok(PendingCosts {
            generation,
            records,
        })
    }

    /// Feed an event to the reducer. Returns false when it was discarded
    /// because its search has been superseded.
    pub fn publish(&mut self, event: Event) -> bool {
        match self.state.apply(event) {
            Ok(()) => true,
            Err(e) => {
                debug_assert!(e.is_stale());
                debug!(reason = %e, "discarding result");
                false
            }
        }
    }

    pub fn toggle_area(&mut self, area_id: &str) -> bool {
        self.state.toggle_area(area_id)
    }

    pub fn check_only_areas(&mut self, area_ids: &[String]) {
        self.state.check_only(area_ids);
    }

    pub fn check_all_areas(&mut self) {
        self.state.check_all();
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.state.set_sort(sort);
    }

    pub fn set_page(&mut self, page: usize) {
        self.state.set_page(page);
    }

    /// Derive the visible page and the totals. Sale and cost totals are both
    /// computed over the full area-filtered set, never over the page alone.
    pub fn view(&self) -> ConsultView {
        let table = derive_view(self.state.records(), self.state.query(), self.can_read);
        let cost_total = self
            .state
            .costs()
            .map(|report| report.total_for(table.filtered.iter().map(|r| r.id.as_str())));

        ConsultView {
            totals: Totals {
                sale_total: table.sale_total(),
                cost_total,
            },
            table,
            status: self.state.status(),
        }
    }
}

// =============================================================================
// Listing screen
// =============================================================================

/// Which facts the listing screen shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Active,
    Removed,
}

/// Load and normalize the facts of the listing screen
pub async fn load_listing<G>(gateway: &G, source: ListingSource) -> Result<Vec<NormalizedRecord>>
where
    G: FactGateway + ?Sized,
{
    let raw = match source {
        ListingSource::Active => gateway.fetch_facts().await,
        ListingSource::Removed => gateway.fetch_removed_facts().await,
    }
    .context("Failed to fetch facts")?;

    Ok(normalize_records(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::costs::tests::line;
    use crate::engine::{Area, SortOrder};
    use crate::gateway::tests::FakeGateway;
    use crate::records::tests::raw_fact;
    use crate::records::FactField;

    fn range() -> DateRange {
        DateRange {
            start: "2024-03-01".to_string(),
            end: "2024-03-31".to_string(),
        }
    }

    fn areas() -> Vec<Area> {
        vec![
            Area {
                id: "X".to_string(),
                name: "Tienda".to_string(),
            },
            Area {
                id: "Y".to_string(),
                name: "Almacen".to_string(),
            },
        ]
    }

    /// 60 facts in area X (net 10 each, cost 4 each) and 5 in area Y
    fn busy_gateway() -> FakeGateway {
        let mut raw = Vec::new();
        let mut gateway = FakeGateway::default();
        for i in 0..60 {
            let id = format!("x{}", i);
            raw.push(raw_fact(&id, "X", 12.0, 2.0));
            gateway = gateway.with_details(&id, vec![line(2.0, Some(2.0))]);
        }
        for i in 0..5 {
            let id = format!("y{}", i);
            raw.push(raw_fact(&id, "Y", 100.0, 0.0));
            gateway = gateway.with_details(&id, vec![line(1.0, Some(30.0))]);
        }
        gateway.with_range(raw).with_areas(areas())
    }

    #[tokio::test]
    async fn test_search_without_areas_shows_every_fact() {
        let gateway = FakeGateway {
            fail_areas: true,
            ..busy_gateway()
        };
        let mut session = ConsultSession::new(gateway, true, Some("Tienda".to_string()), 50);

        assert!(session.load_areas().await.is_err());
        assert!(session.load_areas_or_unfiltered().await.is_empty());
        session.search(range()).await.unwrap();

        let view = session.view();
        assert_eq!(view.table.total_items(), 65);
        assert_eq!(view.totals.sale_total, 1100.0);
        assert_eq!(view.totals.cost_total, Some(CostTotal::Determinate(390.0)));
    }

    #[tokio::test]
    async fn test_search_computes_profit_over_filtered_set() {
        let mut session =
            ConsultSession::new(busy_gateway(), true, Some("Tienda".to_string()), 50);
        session.load_areas().await.unwrap();
        session.search(range()).await.unwrap();

        let view = session.view();
        assert_eq!(view.status, AggregationStatus::Done);
        assert_eq!(view.table.total_items(), 60);
        assert_eq!(view.table.page.len(), 50);
        assert_eq!(view.totals.sale_total, 600.0);
        assert_eq!(view.totals.cost_total, Some(CostTotal::Determinate(240.0)));
        assert_eq!(view.totals.profit(), Some(360.0));

        // Every fact was looked up exactly once
        assert_eq!(session.gateway().detail_calls.lock().unwrap().len(), 65);
    }

    #[tokio::test]
    async fn test_totals_do_not_depend_on_page() {
        let mut session =
            ConsultSession::new(busy_gateway(), true, Some("Tienda".to_string()), 50);
        session.load_areas().await.unwrap();
        session.search(range()).await.unwrap();

        let page_one = session.view();
        session.set_page(2);
        let page_two = session.view();

        assert_eq!(page_two.table.page.len(), 10);
        assert_eq!(page_one.totals, page_two.totals);

        // Cost over the visible page alone differs from the full filtered set
        let report = session.state().costs().unwrap();
        let page_only = report.total_for(page_one.table.page.iter().map(|r| r.id.as_str()));
        assert_eq!(page_only, CostTotal::Determinate(200.0));
        assert_ne!(Some(page_only), page_one.totals.cost_total);
    }

    #[tokio::test]
    async fn test_toggling_areas_recomputes_totals_without_refetch() {
        let mut session =
            ConsultSession::new(busy_gateway(), true, Some("Tienda".to_string()), 50);
        session.load_areas().await.unwrap();
        session.search(range()).await.unwrap();

        assert!(session.toggle_area("Y"));
        let view = session.view();
        assert_eq!(view.table.total_items(), 65);
        assert_eq!(view.totals.sale_total, 1100.0);
        assert_eq!(view.totals.cost_total, Some(CostTotal::Determinate(390.0)));
        assert_eq!(session.gateway().detail_calls.lock().unwrap().len(), 65);
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_profit_indeterminate() {
        let gateway = FakeGateway::default()
            .with_range(vec![raw_fact("a", "X", 20.0, 0.0), raw_fact("b", "X", 30.0, 0.0)])
            .with_details("a", vec![line(2.0, Some(5.0))])
            .with_failing_details("b");
        let mut session = ConsultSession::new(gateway, true, None, 50);
        session.search(range()).await.unwrap();

        let view = session.view();
        assert_eq!(view.status, AggregationStatus::Failed);
        assert_eq!(view.totals.sale_total, 50.0);
        assert!(matches!(
            view.totals.cost_total,
            Some(CostTotal::Indeterminate { .. })
        ));
        assert_eq!(view.totals.profit(), None);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let gateway = busy_gateway();
        let mut session = ConsultSession::new(gateway, false, None, 50);

        let err = session.search(range()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsultError>(),
            Some(ConsultError::PermissionDenied)
        ));
        assert_eq!(err.to_string(), constants::ACCESS_DENIED_MESSAGE);

        let view = session.view();
        assert!(view.table.denied);
        assert!(view.table.page.is_empty());
        assert!(session.gateway().detail_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_aggregation_is_discarded() {
        let gateway = FakeGateway::default()
            .with_range(vec![raw_fact("a", "X", 20.0, 0.0)])
            .with_details("a", vec![line(1.0, Some(5.0))]);
        let mut session = ConsultSession::new(gateway, true, None, 50);

        let first = session.fetch_range(range()).await.unwrap();
        let second = session.fetch_range(range()).await.unwrap();
        assert!(second.generation() > first.generation());

        let stale = first.compute(session.gateway()).await;
        assert!(!session.publish(stale));
        assert_eq!(session.view().status, AggregationStatus::Computing);
        assert_eq!(session.view().totals.cost_total, None);

        let fresh = second.compute(session.gateway()).await;
        assert!(session.publish(fresh));
        assert_eq!(
            session.view().totals.cost_total,
            Some(CostTotal::Determinate(5.0))
        );
    }

    #[tokio::test]
    async fn test_malformed_batch_invalidates_search() {
        let mut bad = raw_fact("b", "X", 1.0, 0.0);
        bad.client = None;
        let gateway =
            FakeGateway::default().with_range(vec![raw_fact("a", "X", 1.0, 0.0), bad]);
        let mut session = ConsultSession::new(gateway, true, None, 50);

        let err = session.search(range()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsultError>(),
            Some(ConsultError::MalformedRecord { index: 1, .. })
        ));
        assert_eq!(session.view().status, AggregationStatus::Idle);
        assert!(session.view().table.filtered.is_empty());
    }

    #[tokio::test]
    async fn test_range_fetch_failure() {
        let gateway = FakeGateway {
            fail_range: true,
            ..Default::default()
        };
        let mut session = ConsultSession::new(gateway, true, None, 50);

        let err = session.search(range()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
        assert_eq!(session.view().status, AggregationStatus::Idle);
    }

    #[tokio::test]
    async fn test_sorted_view() {
        let gateway = FakeGateway::default().with_range(vec![
            raw_fact("a", "X", 5.0, 0.0),
            raw_fact("b", "X", 50.0, 0.0),
            raw_fact("c", "X", 25.0, 0.0),
        ]);
        let mut session = ConsultSession::new(gateway, true, None, 50);
        session.search(range()).await.unwrap();
        session.set_sort(Some(SortSpec {
            field: FactField::Subtotal,
            order: SortOrder::Desc,
        }));

        let ids: Vec<_> = session
            .view()
            .table
            .page
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_load_listing_removed() {
        let gateway = FakeGateway {
            removed: vec![raw_fact("r1", "X", 1.0, 0.0)],
            facts: vec![raw_fact("f1", "X", 1.0, 0.0), raw_fact("f2", "X", 1.0, 0.0)],
            ..Default::default()
        };

        let active = load_listing(&gateway, ListingSource::Active).await.unwrap();
        let removed = load_listing(&gateway, ListingSource::Removed).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(removed[0].id, "r1");
    }
}
