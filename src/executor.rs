// ⚙️ Query Executor - StructuredQuery × records → result envelope
// Pure over its two inputs: filter, sort, then group/aggregate and distinct

use crate::query::{
    AggregateOperation, Aggregation, Filter, FilterNode, FilterValue, Operator, SortDirection, Sorting,
    StructuredQuery,
};
use crate::record::{CardRecord, FieldValue};
use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Tolerance for numeric equality
pub const EPSILON: f64 = 1e-9;

/// Group label for records with no value in the grouping field
pub const UNKNOWN_GROUP: &str = "unknown";

// ============================================================================
// RESULT TYPES
// ============================================================================

/// One synthesized row per group (or one for the whole set without grouping)
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub group_field: Option<String>,
    pub group_value: Option<String>,
    pub metrics: Vec<(String, Option<f64>)>,
}

impl AggregateRow {
    pub fn metric(&self, column: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| *value)
    }
}

impl Serialize for AggregateRow {
    /// Flat object: `{"issuer": "Chase", "sum_current_balance": 1200.0}`
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let grouped = usize::from(self.group_field.is_some());
        let mut map = serializer.serialize_map(Some(self.metrics.len() + grouped))?;
        if let (Some(field), Some(value)) = (&self.group_field, &self.group_value) {
            map.serialize_entry(field, value)?;
        }
        for (name, value) in &self.metrics {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultRow {
    Record(CardRecord),
    Group(AggregateRow),
}

impl ResultRow {
    pub fn as_record(&self) -> Option<&CardRecord> {
        match self {
            ResultRow::Record(record) => Some(record),
            ResultRow::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&AggregateRow> {
        match self {
            ResultRow::Group(row) => Some(row),
            ResultRow::Record(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub results: Vec<ResultRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    pub total: usize,
}

impl ExecutionResult {
    /// Records of a non-aggregated result, in result order
    pub fn records(&self) -> Vec<&CardRecord> {
        self.results.iter().filter_map(ResultRow::as_record).collect()
    }

    pub fn groups(&self) -> Vec<&AggregateRow> {
        self.results.iter().filter_map(ResultRow::as_group).collect()
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        QueryExecutor
    }

    pub fn execute(&self, query: &StructuredQuery, records: &[CardRecord]) -> ExecutionResult {
        for node in &query.filters {
            trace!(filter = %node, "applying filter");
        }

        let mut selected: Vec<&CardRecord> = records
            .iter()
            .filter(|record| query.filters.iter().all(|node| matches_node(node, record)))
            .collect();

        trace!(matched = selected.len(), of = records.len(), "filtered records");

        if let Some(sorting) = &query.sorting {
            sort_records(&mut selected, sorting);
        }

        let values = query.distinct.as_ref().map(|d| distinct_values(&selected, &d.field));

        let results: Vec<ResultRow> = if query.grouping.is_some() || !query.aggregations.is_empty() {
            aggregate_rows(&selected, query)
                .into_iter()
                .map(ResultRow::Group)
                .collect()
        } else {
            selected.iter().map(|r| ResultRow::Record((*r).clone())).collect()
        };

        let total = match &values {
            Some(values) => values.len(),
            None => results.len(),
        };

        ExecutionResult { results, values, total }
    }
}

// ============================================================================
// FILTERING
// ============================================================================

fn matches_node(node: &FilterNode, record: &CardRecord) -> bool {
    match node {
        FilterNode::Condition(filter) => matches_filter(filter, record),
        FilterNode::All(nodes) => nodes.iter().all(|n| matches_node(n, record)),
        FilterNode::Any(nodes) => nodes.iter().any(|n| matches_node(n, record)),
    }
}

/// Missing values never match
pub fn matches_filter(filter: &Filter, record: &CardRecord) -> bool {
    match record.field(&filter.field) {
        Some(value) => compare_value(&value, filter.operator, &filter.value),
        None => false,
    }
}

fn compare_value(value: &FieldValue, operator: Operator, expected: &FilterValue) -> bool {
    match value {
        FieldValue::Number(n) => expected_number(expected).map_or(false, |e| compare_numbers(*n, operator, e)),
        FieldValue::Text(s) => compare_text(s, operator, expected),
        FieldValue::List(items) => items
            .iter()
            .any(|item| compare_text(item, operator, expected)),
        FieldValue::Flag(b) => {
            let expected = match expected {
                FilterValue::Number(n) => Some(*n != 0.0),
                FilterValue::Text(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(true),
                    "false" | "no" | "0" => Some(false),
                    _ => None,
                },
            };
            operator.is_equality() && expected == Some(*b)
        }
        FieldValue::Date(d) => expected_date(expected).map_or(false, |e| compare_ordered(d.cmp(&e), operator)),
        FieldValue::Timestamp(t) => {
            expected_date(expected).map_or(false, |e| compare_ordered(t.date_naive().cmp(&e), operator))
        }
    }
}

fn expected_number(expected: &FilterValue) -> Option<f64> {
    match expected {
        FilterValue::Number(n) => Some(*n),
        FilterValue::Text(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
    }
}

fn expected_date(expected: &FilterValue) -> Option<NaiveDate> {
    match expected {
        FilterValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        FilterValue::Number(_) => None,
    }
}

fn compare_numbers(actual: f64, operator: Operator, expected: f64) -> bool {
    let equal = (actual - expected).abs() < EPSILON;
    match operator {
        Operator::Eq | Operator::StrictEq => equal,
        Operator::Gt => actual > expected && !equal,
        Operator::Lt => actual < expected && !equal,
        Operator::Gte => actual > expected || equal,
        Operator::Lte => actual < expected || equal,
    }
}

fn compare_ordered(ordering: Ordering, operator: Operator) -> bool {
    match operator {
        Operator::Eq | Operator::StrictEq => ordering == Ordering::Equal,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Gte => ordering != Ordering::Less,
        Operator::Lte => ordering != Ordering::Greater,
    }
}

/// `==` is case-insensitive equality, `=` case-insensitive containment;
/// ordering operators never match text
fn compare_text(actual: &str, operator: Operator, expected: &FilterValue) -> bool {
    let expected = match expected {
        FilterValue::Text(s) => s.trim().to_lowercase(),
        FilterValue::Number(n) => FieldValue::Number(*n).display(),
    };
    let actual = actual.trim().to_lowercase();

    match operator {
        Operator::StrictEq => actual == expected,
        Operator::Eq => actual.contains(&expected),
        _ => false,
    }
}

// ============================================================================
// SORTING
// ============================================================================

/// Stable sort; missing values go last in either direction
fn sort_records(records: &mut [&CardRecord], sorting: &Sorting) {
    records.sort_by(|a, b| {
        compare_fields(
            a.field(&sorting.field).as_ref(),
            b.field(&sorting.field).as_ref(),
            sorting.direction,
        )
    });
}

fn compare_fields(a: Option<&FieldValue>, b: Option<&FieldValue>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ordering = compare_present(a, b);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
    }
}

fn compare_present(a: &FieldValue, b: &FieldValue) -> Ordering {
    match (a, b) {
        (FieldValue::Date(x), FieldValue::Date(y)) => x.cmp(y),
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => x.cmp(y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => a.normalized_key().cmp(&b.normalized_key()),
        },
    }
}

/// Non-finite metrics sort with the missing ones
fn compare_metric(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    let a = a.filter(|n| n.is_finite()).map(FieldValue::Number);
    let b = b.filter(|n| n.is_finite()).map(FieldValue::Number);
    compare_fields(a.as_ref(), b.as_ref(), direction)
}

// ============================================================================
// GROUPING & AGGREGATION
// ============================================================================

/// Partition in first-appearance order; group keys compare case-insensitively
/// and keep the first-seen spelling as the label
fn aggregate_rows(records: &[&CardRecord], query: &StructuredQuery) -> Vec<AggregateRow> {
    let aggregations: Vec<Aggregation> = if query.aggregations.is_empty() {
        vec![Aggregation::count()]
    } else {
        query.aggregations.clone()
    };

    let Some(group_field) = &query.grouping else {
        return vec![AggregateRow {
            group_field: None,
            group_value: None,
            metrics: compute_metrics(records, &aggregations),
        }];
    };

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<(String, Vec<&CardRecord>)> = Vec::new();

    for record in records {
        let (key, label) = match record.field(group_field) {
            Some(value) if !value.normalized_key().trim().is_empty() => {
                (value.normalized_key(), value.display())
            }
            _ => (UNKNOWN_GROUP.to_string(), UNKNOWN_GROUP.to_string()),
        };

        match index.get(&key) {
            Some(&position) => partitions[position].1.push(*record),
            None => {
                index.insert(key, partitions.len());
                partitions.push((label, vec![*record]));
            }
        }
    }

    let mut rows: Vec<AggregateRow> = partitions
        .into_iter()
        .map(|(label, members)| AggregateRow {
            group_field: Some(group_field.clone()),
            group_value: Some(label),
            metrics: compute_metrics(&members, &aggregations),
        })
        .collect();

    if let Some(sorting) = &query.sorting {
        let column = aggregations
            .iter()
            .find(|a| a.field.as_deref() == Some(sorting.field.as_str()))
            .map(Aggregation::column_name);

        if let Some(column) = column {
            rows.sort_by(|a, b| compare_metric(a.metric(&column), b.metric(&column), sorting.direction));
        }
    }

    rows
}

fn compute_metrics(records: &[&CardRecord], aggregations: &[Aggregation]) -> Vec<(String, Option<f64>)> {
    aggregations
        .iter()
        .map(|aggregation| (aggregation.column_name(), aggregate(records, aggregation)))
        .collect()
}

/// Sum over no values is 0; avg/min/max over no values are absent
pub fn aggregate(records: &[&CardRecord], aggregation: &Aggregation) -> Option<f64> {
    let Some(field) = &aggregation.field else {
        return match aggregation.operation {
            AggregateOperation::Count => Some(records.len() as f64),
            _ => None,
        };
    };

    let present: Vec<FieldValue> = records.iter().filter_map(|r| r.field(field)).collect();
    let numbers: Vec<f64> = present.iter().filter_map(FieldValue::as_number).collect();

    match aggregation.operation {
        AggregateOperation::Count => Some(present.len() as f64),
        AggregateOperation::Sum => Some(numbers.iter().sum()),
        AggregateOperation::Avg => {
            if numbers.is_empty() {
                None
            } else {
                Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateOperation::Min => numbers.iter().copied().reduce(f64::min),
        AggregateOperation::Max => numbers.iter().copied().reduce(f64::max),
    }
}

// ============================================================================
// DISTINCT
// ============================================================================

/// Unique values, compared case-insensitively, in first-seen spelling.
/// List fields contribute each element.
fn distinct_values(records: &[&CardRecord], field: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    let candidates = records.iter().filter_map(|r| r.field(field)).flat_map(|value| match value {
        FieldValue::List(items) => items,
        other => vec![other.display()],
    });

    for candidate in candidates {
        let label = candidate.trim().to_string();
        let key = label.to_lowercase();
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        values.push(label);
    }

    values
}

// ============================================================================
// TESTS
// ============================================================================
