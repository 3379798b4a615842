//! The four-result-set Target/Others comparison (spec.md §4.5–§4.6).
//!
//! Single mode issues four sequential SQL queries against the mart; batch
//! mode pulls one global baseline then fans out one task per target. Both
//! share the metrics derivation and the target-membership CTE below.

pub mod batch;
pub mod sampling;
pub mod single;

use crate::models::analyze::{AnalysisMetrics, GlassResult, GroupType};
use crate::query_builder::{format_string_literal, in_list_clause};

/// Build the `IN (...)` set of equipment lines, optionally restricted by
/// process code, used to classify Target membership (spec.md §4.5).
pub(crate) fn target_membership_subquery(equipment_line_ids: &[String], process_codes: &[String]) -> String {
    let eq_clause = in_list_clause("equipment_line_id", equipment_line_ids);
    let process_clause = in_list_clause("process_code", process_codes);
    format!(
        "(SELECT DISTINCT product_id FROM history_raw WHERE {eq_clause} AND {process_clause})"
    )
}

pub(crate) fn group_type_case(target_subquery: &str, product_id_column: &str) -> String {
    format!("CASE WHEN {product_id_column} IN {target_subquery} THEN 'target' ELSE 'others' END")
}

pub(crate) fn parse_group_type(s: &str) -> GroupType {
    if s == "target" {
        GroupType::Target
    } else {
        GroupType::Others
    }
}

/// Derive the summary metric block from glass-level results (spec.md §4.5,
/// "Metrics derivation"; §8 invariant 3).
pub fn derive_metrics(glass: &[GlassResult]) -> AnalysisMetrics {
    let mut target_count = 0u64;
    let mut others_count = 0u64;
    let mut target_defects = 0i64;
    let mut others_defects = 0i64;

    for row in glass {
        match row.group {
            GroupType::Target => {
                target_count += 1;
                target_defects += row.total_defects;
            }
            GroupType::Others => {
                others_count += 1;
                others_defects += row.total_defects;
            }
        }
    }

    let total_count = target_count + others_count;
    let overall_rate = if total_count == 0 {
        0.0
    } else {
        (target_defects + others_defects) as f64 / total_count as f64
    };
    let target_rate = if target_count == 0 {
        0.0
    } else {
        target_defects as f64 / target_count as f64
    };
    let others_rate = if others_count == 0 {
        0.0
    } else {
        others_defects as f64 / others_count as f64
    };

    AnalysisMetrics {
        target_count,
        others_count,
        target_defects,
        others_defects,
        overall_rate,
        target_rate,
        others_rate,
        delta: overall_rate - target_rate,
        superiority: others_rate - target_rate,
    }
}

/// Quote a list of model codes for an `IN (...)` restriction, or `1=1` when
/// empty (spec.md §4.5, optional `model_codes`).
pub(crate) fn model_code_clause(column: &str, model_codes: &[String]) -> String {
    in_list_clause(column, model_codes)
}

pub(crate) fn quote(value: &str) -> String {
    format_string_literal(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analyze::GlassResult;

    fn glass(group: GroupType, total_defects: i64) -> GlassResult {
        GlassResult {
            glass_id: "G1".to_string(),
            lot_id: "LOT1".to_string(),
            work_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            total_defects,
            group,
        }
    }

    #[test]
    fn metrics_coherence_matches_invariant_3() {
        let rows = vec![
            glass(GroupType::Target, 2),
            glass(GroupType::Target, 4),
            glass(GroupType::Others, 10),
            glass(GroupType::Others, 20),
        ];
        let metrics = derive_metrics(&rows);
        assert_eq!(metrics.target_count, 2);
        assert_eq!(metrics.others_count, 2);
        assert!((metrics.target_rate - 3.0).abs() < 1e-9);
        assert!((metrics.others_rate - 15.0).abs() < 1e-9);
        assert!((metrics.overall_rate - 9.0).abs() < 1e-9);
        assert!((metrics.delta - (metrics.overall_rate - metrics.target_rate)).abs() < 1e-9);
        assert!((metrics.superiority - (metrics.others_rate - metrics.target_rate)).abs() < 1e-9);
    }

    #[test]
    fn metrics_guard_zero_target_count() {
        let rows = vec![glass(GroupType::Others, 10)];
        let metrics = derive_metrics(&rows);
        assert_eq!(metrics.target_rate, 0.0);
        assert!((metrics.delta - metrics.overall_rate).abs() < 1e-9);
    }
}
