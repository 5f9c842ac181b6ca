//! Budget and progress figures derived from the aggregate queries in
//! `db::stats_repo`.
//!
//! Percentages are 0 when their denominator is 0. Maps are ordered by key.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::stats_repo::{self, CostGroup, Dimension, ResourceScope};
use crate::db::{Database, DatabaseError};

const TOP_OVER_BUDGET: u32 = 10;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total_resources: u64,
    pub completion_rate: f64,
    pub total_estimated_budget: Option<f64>,
    pub total_actual_budget: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatistics {
    pub total_count: u64,
    pub total_estimated_budget: Option<f64>,
    pub total_actual_budget: Option<f64>,
    pub average_estimated_budget: f64,
    pub average_actual_budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetExecution {
    pub total_estimated: f64,
    pub total_actual: f64,
    pub budget_usage_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatistics {
    pub summary: StatsSummary,
    pub type_distribution: BTreeMap<String, u64>,
    pub status_distribution: BTreeMap<String, u64>,
    pub priority_distribution: BTreeMap<String, u64>,
    pub budget_statistics: BudgetStatistics,
    /// Resource count per `needed_by` month (`YYYY-MM`).
    pub time_distribution: BTreeMap<String, u64>,
    pub budget_execution: BudgetExecution,
}

fn distribution(
    db: &Database,
    dimension: Dimension,
    scope: ResourceScope,
) -> Result<BTreeMap<String, u64>, DatabaseError> {
    Ok(stats_repo::counts_by(db, dimension, scope)?
        .into_iter()
        .map(|row| (row.key, row.count))
        .collect())
}

/// Counts, distributions and budget totals for the resources in scope.
pub fn resource_statistics(
    db: &Database,
    scope: ResourceScope,
) -> Result<ResourceStatistics, DatabaseError> {
    let totals = stats_repo::budget_totals(db, scope)?;
    let estimated = totals.total_estimated.unwrap_or(0.0);
    let actual = totals.total_actual.unwrap_or(0.0);

    let time_distribution = stats_repo::monthly(db, scope)?
        .into_iter()
        .map(|bucket| (bucket.month, bucket.count))
        .collect();

    Ok(ResourceStatistics {
        summary: StatsSummary {
            total_resources: totals.total_count,
            completion_rate: round2(percent(
                totals.completed_count as f64,
                totals.total_count as f64,
            )),
            total_estimated_budget: totals.total_estimated,
            total_actual_budget: totals.total_actual,
        },
        type_distribution: distribution(db, Dimension::Type, scope)?,
        status_distribution: distribution(db, Dimension::Status, scope)?,
        priority_distribution: distribution(db, Dimension::Priority, scope)?,
        budget_statistics: BudgetStatistics {
            total_count: totals.total_count,
            total_estimated_budget: totals.total_estimated,
            total_actual_budget: totals.total_actual,
            average_estimated_budget: round2(totals.avg_estimated.unwrap_or(0.0)),
            average_actual_budget: round2(totals.avg_actual.unwrap_or(0.0)),
        },
        time_distribution,
        budget_execution: BudgetExecution {
            total_estimated: estimated,
            total_actual: actual,
            budget_usage_rate: round2(percent(actual, estimated)),
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_estimated_budget: f64,
    pub total_actual_budget: f64,
    pub total_variance: f64,
    pub budget_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCost {
    pub total_estimated: f64,
    pub total_actual: f64,
    pub count: u64,
    pub average_cost: f64,
    pub variance: f64,
    pub variance_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCost {
    pub estimated: f64,
    pub actual: f64,
    pub count: u64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverBudgetItem {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub estimated: f64,
    pub actual: f64,
    pub variance: f64,
    pub variance_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverBudgetAnalysis {
    pub top_overbudget_resources: Vec<OverBudgetItem>,
    pub total_overbudget_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyCost {
    pub estimated: f64,
    pub actual: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficiencyMetrics {
    pub average_cost_per_resource: f64,
    pub budget_accuracy: f64,
    pub total_variance: f64,
    pub total_variance_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAnalysis {
    pub summary: CostSummary,
    pub costs_by_type: BTreeMap<String, TypeCost>,
    pub costs_by_status: BTreeMap<String, StatusCost>,
    pub overbudget_analysis: OverBudgetAnalysis,
    pub monthly_trends: BTreeMap<String, MonthlyCost>,
    pub efficiency_metrics: EfficiencyMetrics,
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// 100 when actual spend matches the estimate, dropping by the relative
/// deviation in either direction.
fn accuracy(estimated: f64, actual: f64) -> f64 {
    if estimated == 0.0 {
        0.0
    } else {
        (1.0 - (actual - estimated).abs() / estimated) * 100.0
    }
}

fn type_cost(group: &CostGroup) -> TypeCost {
    let variance = group.actual - group.estimated;
    TypeCost {
        total_estimated: group.estimated,
        total_actual: group.actual,
        count: group.count,
        average_cost: average(group.actual, group.count),
        variance,
        variance_percentage: percent(variance, group.estimated),
    }
}

/// Spending against estimates for the resources in scope.
pub fn cost_analysis(db: &Database, scope: ResourceScope) -> Result<CostAnalysis, DatabaseError> {
    let totals = stats_repo::budget_totals(db, scope)?;
    let estimated = totals.total_estimated.unwrap_or(0.0);
    let actual = totals.total_actual.unwrap_or(0.0);
    let variance = actual - estimated;

    let costs_by_type = stats_repo::costs_by(db, Dimension::Type, scope)?
        .iter()
        .map(|group| (group.key.clone(), type_cost(group)))
        .collect();

    let costs_by_status = stats_repo::costs_by(db, Dimension::Status, scope)?
        .into_iter()
        .map(|group| {
            let cost = StatusCost {
                estimated: group.estimated,
                actual: group.actual,
                count: group.count,
                average: average(group.actual, group.count),
            };
            (group.key, cost)
        })
        .collect();

    let over = stats_repo::over_budget(db, scope, u32::MAX)?;
    let total_overbudget_count = over.len();
    let top_overbudget_resources = over
        .into_iter()
        .take(TOP_OVER_BUDGET as usize)
        .map(|row| {
            let variance = row.actual - row.estimated;
            OverBudgetItem {
                variance,
                variance_percentage: percent(variance, row.estimated),
                id: row.id,
                name: row.name,
                kind: row.kind,
                estimated: row.estimated,
                actual: row.actual,
            }
        })
        .collect();

    let monthly_trends = stats_repo::monthly(db, scope)?
        .into_iter()
        .map(|bucket| {
            let cost = MonthlyCost {
                estimated: bucket.estimated,
                actual: bucket.actual,
                variance: bucket.actual - bucket.estimated,
            };
            (bucket.month, cost)
        })
        .collect();

    Ok(CostAnalysis {
        summary: CostSummary {
            total_estimated_budget: estimated,
            total_actual_budget: actual,
            total_variance: variance,
            budget_accuracy: round2(accuracy(estimated, actual)),
        },
        costs_by_type,
        costs_by_status,
        overbudget_analysis: OverBudgetAnalysis {
            top_overbudget_resources,
            total_overbudget_count,
        },
        monthly_trends,
        efficiency_metrics: EfficiencyMetrics {
            average_cost_per_resource: average(actual, totals.total_count),
            budget_accuracy: accuracy(estimated, actual),
            total_variance: variance,
            total_variance_percentage: percent(variance, estimated),
        },
    })
}
