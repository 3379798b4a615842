//! SQL-composition helpers shared by the Ranking Engine and Analyzer.
//!
//! Every fragment returned here is assembled by string formatting with a
//! single escaping discipline (`format_string_literal`), generalizing the
//! sibling observability crate's ClickHouse query-builder to DuckDB's
//! identical single-quote-doubling escape rule.

use crate::error::AppError;
use regex::Regex;
use std::sync::OnceLock;

fn process_code_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)-(\d+)$").unwrap())
}

fn literal_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap())
}

/// Escape a literal for embedding in a single-quoted SQL string.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn format_string_literal(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// A time-window predicate against a `TIMESTAMP`/`DATE` column, using DuckDB's
/// native timestamp literal parsing.
pub fn time_window_clause(column: &str, from: &str, to: &str) -> String {
    format!(
        "{column} >= {} AND {column} <= {}",
        format_string_literal(from),
        format_string_literal(to),
    )
}

/// Parse the advanced `process_code` filter syntax described in spec.md §9
/// ("Dynamic SQL composition") into a SQL boolean fragment:
/// - a single token with a dash between digits is a numeric range: `100-200`
/// - an operator prefix (`>=`,`<=`,`>`,`<`,`<>`) with a numeric RHS
/// - a double inequality `A<x<B`
/// - otherwise, a set of literal codes joined by `IN`
///
/// Anything else is a validation error — this is a tiny domain parser, not a
/// general expression grammar.
pub fn parse_process_code_filter(input: &str, column: &str) -> Result<String, AppError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("process_code filter must not be empty"));
    }

    if let Some((lhs, rhs)) = split_double_inequality(trimmed) {
        let lo: i64 = lhs
            .parse()
            .map_err(|_| AppError::validation(format!("invalid process_code filter: {input}")))?;
        let hi: i64 = rhs
            .parse()
            .map_err(|_| AppError::validation(format!("invalid process_code filter: {input}")))?;
        return Ok(format!(
            "CAST({column} AS BIGINT) > {lo} AND CAST({column} AS BIGINT) < {hi}"
        ));
    }

    for op in ["<>", ">=", "<=", ">", "<"] {
        if let Some(rhs) = trimmed.strip_prefix(op) {
            let num: i64 = rhs.trim().parse().map_err(|_| {
                AppError::validation(format!("invalid process_code filter: {input}"))
            })?;
            return Ok(format!("CAST({column} AS BIGINT) {op} {num}"));
        }
    }

    if let Some(caps) = process_code_range_re().captures(trimmed) {
        let lo = &caps[1];
        let hi = &caps[2];
        return Ok(format!("CAST({column} AS BIGINT) BETWEEN {lo} AND {hi}"));
    }

    let codes: Vec<&str> = trimmed.split(',').map(|s| s.trim()).collect();
    if codes.iter().any(|c| !literal_code_re().is_match(c)) {
        return Err(AppError::validation(format!(
            "invalid process_code filter: {input}"
        )));
    }
    let list = codes
        .iter()
        .map(|c| format_string_literal(c))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("{column} IN ({list})"))
}

fn split_double_inequality(input: &str) -> Option<(&str, &str)> {
    let idx = input.find("<x<")?;
    let lhs = &input[..idx];
    let rhs = &input[idx + 3..];
    if lhs.is_empty() || rhs.is_empty() {
        return None;
    }
    if !lhs.chars().all(|c| c.is_ascii_digit()) || !rhs.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((lhs, rhs))
}

/// Build an `IN (...)` clause for a list of string values, or `1=1` (always
/// true) when the list is empty — callers AND this into a larger WHERE and
/// an empty filter set should not exclude everything.
pub fn in_list_clause(column: &str, values: &[String]) -> String {
    if values.is_empty() {
        return "1=1".to_string();
    }
    let list = values
        .iter()
        .map(|v| format_string_literal(v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{column} IN ({list})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_range() {
        let clause = parse_process_code_filter("100-200", "process_code").unwrap();
        assert_eq!(clause, "CAST(process_code AS BIGINT) BETWEEN 100 AND 200");
    }

    #[test]
    fn operator_prefixed() {
        assert_eq!(
            parse_process_code_filter(">=500", "process_code").unwrap(),
            "CAST(process_code AS BIGINT) >= 500"
        );
        assert_eq!(
            parse_process_code_filter("<>500", "process_code").unwrap(),
            "CAST(process_code AS BIGINT) <> 500"
        );
    }

    #[test]
    fn double_inequality() {
        assert_eq!(
            parse_process_code_filter("0<x<6000", "process_code").unwrap(),
            "CAST(process_code AS BIGINT) > 0 AND CAST(process_code AS BIGINT) < 6000"
        );
    }

    #[test]
    fn literal_set() {
        assert_eq!(
            parse_process_code_filter("P100,P200", "process_code").unwrap(),
            "process_code IN ('P100', 'P200')"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_process_code_filter("not a filter;;;", "process_code").is_err());
    }

    #[test]
    fn empty_in_list_is_always_true() {
        assert_eq!(in_list_clause("equipment_line_id", &[]), "1=1");
    }
}
