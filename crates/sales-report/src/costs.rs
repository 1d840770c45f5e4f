//! Cost-basis aggregation ("Inversión a precio costo")
//!
//! Every fact's line items are fetched concurrently and priced at the
//! product's cost price. The report is only produced once every lookup has
//! settled, and a failed lookup makes any total that depends on it
//! indeterminate instead of silently counting as zero.

use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::constants;
use crate::error::ConsultError;
use crate::gateway::FactGateway;
use crate::records::NormalizedRecord;

/// Line item of a fact
#[derive(Debug, Clone, Deserialize)]
pub struct DetailLine {
    pub quantity: f64,
    #[serde(default)]
    pub product: Option<DetailProduct>,
}

/// Product referenced by a line item (only the cost basis matters here)
#[derive(Debug, Clone, Deserialize)]
pub struct DetailProduct {
    #[serde(default)]
    pub price_c: Option<f64>,
}

impl DetailLine {
    pub fn cost_price(&self) -> Option<f64> {
        self.product.as_ref().and_then(|p| p.price_c)
    }

    /// quantity * cost price, with a missing cost price counting as zero
    pub fn cost(&self) -> f64 {
        self.quantity * self.cost_price().unwrap_or(0.0)
    }
}

/// Cost of a single fact's line items
pub fn record_cost(lines: &[DetailLine]) -> f64 {
    lines.iter().map(DetailLine::cost).sum()
}

/// Aggregate cost over a set of facts
#[derive(Debug, Clone, PartialEq)]
pub enum CostTotal {
    Determinate(f64),
    /// At least one contributing lookup failed; holds the affected fact ids
    Indeterminate { failures: Vec<String> },
}

impl CostTotal {
    pub fn amount(&self) -> Option<f64> {
        match self {
            CostTotal::Determinate(amount) => Some(*amount),
            CostTotal::Indeterminate { .. } => None,
        }
    }
}

impl fmt::Display for CostTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTotal::Determinate(amount) => write!(f, "{:.2}", amount),
            CostTotal::Indeterminate { failures } => {
                write!(f, "indeterminate ({} failed lookup(s))", failures.len())
            }
        }
    }
}

/// Per-fact outcome of the detail lookups, in record order
#[derive(Debug, Default)]
pub struct CostReport {
    costs: Vec<(String, Result<f64, ConsultError>)>,
    /// Line items priced at zero because their product had no cost price
    pub missing_cost_lines: usize,
}

impl CostReport {
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn cost_of(&self, record_id: &str) -> Option<&Result<f64, ConsultError>> {
        self.costs
            .iter()
            .find(|(id, _)| id == record_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConsultError> {
        self.costs.iter().filter_map(|(_, outcome)| outcome.as_ref().err())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Total over a subset of facts (e.g. the area-filtered set).
    /// A fact that is not part of the report counts as a failed lookup.
    pub fn total_for<'a>(&self, record_ids: impl IntoIterator<Item = &'a str>) -> CostTotal {
        let index: HashMap<&str, &Result<f64, ConsultError>> = self
            .costs
            .iter()
            .map(|(id, outcome)| (id.as_str(), outcome))
            .collect();

        sum_outcomes(
            record_ids
                .into_iter()
                .map(|id| (id, index.get(id).copied())),
        )
    }
}

fn sum_outcomes<'a>(
    outcomes: impl Iterator<Item = (&'a str, Option<&'a Result<f64, ConsultError>>)>,
) -> CostTotal {
    let mut total = 0.0;
    let mut failures = Vec::new();

    for (id, outcome) in outcomes {
        match outcome {
            Some(Ok(cost)) => total += cost,
            Some(Err(_)) | None => failures.push(id.to_string()),
        }
    }

    if failures.is_empty() {
        CostTotal::Determinate(total)
    } else {
        CostTotal::Indeterminate { failures }
    }
}

/// Fetch every fact's details concurrently and price them.
///
/// Lookups may complete in any order; the report is returned only after all
/// of them have settled. Failures are recorded per fact and never retried.
pub async fn aggregate_costs<G>(gateway: &G, records: &[NormalizedRecord]) -> CostReport
where
    G: FactGateway + ?Sized,
{
    debug!(records = records.len(), "{}", constants::COMPUTING_NOTE);

    let lookups = records.iter().map(|record| async move {
        let outcome = gateway.fetch_record_details(&record.id).await;
        (record.id.clone(), outcome)
    });
    let settled = join_all(lookups).await;

    let mut report = CostReport::default();
    for (record_id, outcome) in settled {
        let outcome = match outcome {
            Ok(lines) => {
                report.missing_cost_lines +=
                    lines.iter().filter(|l| l.cost_price().is_none()).count();
                Ok(record_cost(&lines))
            }
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "detail lookup failed");
                Err(ConsultError::DetailFetchFailed {
                    record_id: record_id.clone(),
                    reason: format!("{:#}", e),
                })
            }
        };
        report.costs.push((record_id, outcome));
    }

    report
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::tests::FakeGateway;
    use crate::records::normalize_records;
    use crate::records::tests::raw_fact;

    pub fn line(quantity: f64, price_c: Option<f64>) -> DetailLine {
        DetailLine {
            quantity,
            product: Some(DetailProduct { price_c }),
        }
    }

    fn facts(ids: &[&str]) -> Vec<NormalizedRecord> {
        let raw: Vec<_> = ids.iter().map(|id| raw_fact(id, "X", 100.0, 0.0)).collect();
        normalize_records(&raw).unwrap()
    }

    #[test]
    fn test_record_cost_missing_price_is_zero() {
        let lines = vec![line(2.0, Some(5.0)), line(3.0, None), line(1.0, Some(1.5))];
        assert_eq!(record_cost(&lines), 11.5);

        let no_product = DetailLine {
            quantity: 4.0,
            product: None,
        };
        assert_eq!(no_product.cost(), 0.0);
    }

    #[test]
    fn test_deserialize_detail_line() {
        let json = r#"[
            {"quantity": 2, "product": {"name": "Arroz", "price_c": 3.5}},
            {"quantity": 1, "product": {"name": "Servicio"}}
        ]"#;
        let lines: Vec<DetailLine> = serde_json::from_str(json).unwrap();
        assert_eq!(lines[0].cost_price(), Some(3.5));
        assert_eq!(lines[1].cost_price(), None);
        assert_eq!(record_cost(&lines), 7.0);
    }

    #[tokio::test]
    async fn test_aggregate_sums_all_records() {
        let gateway = FakeGateway::default()
            .with_details("a", vec![line(2.0, Some(5.0))])
            .with_details("b", vec![line(1.0, Some(3.0)), line(4.0, None)]);

        let report = aggregate_costs(&gateway, &facts(&["a", "b"])).await;

        assert_eq!(report.len(), 2);
        assert_eq!(report.total_for(["a", "b"]), CostTotal::Determinate(13.0));
        assert_eq!(report.missing_cost_lines, 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_failed_lookup_makes_total_indeterminate() {
        let gateway = FakeGateway::default()
            .with_details("ok", vec![line(2.0, Some(5.0))])
            .with_failing_details("broken");

        let report = aggregate_costs(&gateway, &facts(&["ok", "broken"])).await;

        assert_eq!(
            report.total_for(["ok", "broken"]),
            CostTotal::Indeterminate {
                failures: vec!["broken".to_string()]
            }
        );
        assert!(matches!(
            report.cost_of("broken"),
            Some(Err(ConsultError::DetailFetchFailed { .. }))
        ));
        // Totals that don't depend on the failed fact stay determinate
        assert_eq!(report.total_for(["ok"]), CostTotal::Determinate(10.0));
    }

    #[tokio::test]
    async fn test_empty_record_set() {
        let gateway = FakeGateway::default();
        let report = aggregate_costs(&gateway, &[]).await;
        assert!(report.is_empty());
        assert_eq!(report.total_for([]), CostTotal::Determinate(0.0));
    }

    #[tokio::test]
    async fn test_total_for_unknown_record_is_indeterminate() {
        let gateway = FakeGateway::default().with_details("a", vec![line(1.0, Some(1.0))]);
        let report = aggregate_costs(&gateway, &facts(&["a"])).await;

        assert!(matches!(
            report.total_for(["a", "missing"]),
            CostTotal::Indeterminate { .. }
        ));
    }
}
