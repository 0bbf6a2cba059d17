// 🧩 Structured Query - the bridge between extracted entities and execution
// Every field named here has already been resolved to a canonical schema field

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// OPERATORS & VALUES
// ============================================================================

/// Comparison operator.
///
/// On text fields `=` is case-insensitive containment and `==` is
/// case-insensitive equality; on numbers both mean equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    StrictEq,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::StrictEq => "==",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, Operator::Eq | Operator::StrictEq)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Number(n) => write!(f, "{}", n),
            FilterValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: Operator, value: FilterValue) -> Self {
        Filter {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn number(field: impl Into<String>, operator: Operator, value: f64) -> Self {
        Self::new(field, operator, FilterValue::Number(value))
    }

    pub fn text(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self::new(field, operator, FilterValue::Text(value.into()))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// A node of the filter tree.
///
/// The top-level filter list of a query is an implicit conjunction; OR only
/// ever appears as an explicit `Any` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Condition(Filter),
    All(Vec<FilterNode>),
    Any(Vec<FilterNode>),
}

impl FilterNode {
    /// Every leaf condition under this node, depth first
    pub fn conditions(&self) -> Vec<&Filter> {
        match self {
            FilterNode::Condition(filter) => vec![filter],
            FilterNode::All(nodes) | FilterNode::Any(nodes) => {
                nodes.iter().flat_map(|n| n.conditions()).collect()
            }
        }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (nodes, joiner) = match self {
            FilterNode::Condition(filter) => return write!(f, "{}", filter),
            FilterNode::All(nodes) => (nodes, " AND "),
            FilterNode::Any(nodes) => (nodes, " OR "),
        };

        write!(f, "(")?;
        for (index, node) in nodes.iter().enumerate() {
            if index > 0 {
                write!(f, "{}", joiner)?;
            }
            write!(f, "{}", node)?;
        }
        write!(f, ")")
    }
}

impl From<Filter> for FilterNode {
    fn from(filter: Filter) -> Self {
        FilterNode::Condition(filter)
    }
}

// ============================================================================
// SORTING / AGGREGATION / DISTINCT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOperation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOperation::Sum => "sum",
            AggregateOperation::Avg => "avg",
            AggregateOperation::Count => "count",
            AggregateOperation::Min => "min",
            AggregateOperation::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub operation: AggregateOperation,
    pub field: Option<String>,
}

impl Aggregation {
    pub fn new(operation: AggregateOperation, field: Option<String>) -> Self {
        Aggregation { operation, field }
    }

    pub fn count() -> Self {
        Aggregation::new(AggregateOperation::Count, None)
    }

    /// Name of the synthesized result column, e.g. `sum_current_balance`
    pub fn column_name(&self) -> String {
        match &self.field {
            Some(field) => format!("{}_{}", self.operation.as_str(), field),
            None => self.operation.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distinct {
    pub field: String,
}

// ============================================================================
// STRUCTURED QUERY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub filters: Vec<FilterNode>,
    pub sorting: Option<Sorting>,
    pub aggregations: Vec<Aggregation>,
    pub grouping: Option<String>,
    pub distinct: Option<Distinct>,
}

impl StructuredQuery {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.sorting.is_none()
            && self.aggregations.is_empty()
            && self.grouping.is_none()
            && self.distinct.is_none()
    }

    /// Every field name any clause refers to
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .filters
            .iter()
            .flat_map(|node| node.conditions())
            .map(|filter| filter.field.as_str())
            .collect();

        fields.extend(self.sorting.iter().map(|s| s.field.as_str()));
        fields.extend(self.aggregations.iter().filter_map(|a| a.field.as_deref()));
        fields.extend(self.grouping.as_deref());
        fields.extend(self.distinct.iter().map(|d| d.field.as_str()));
        fields
    }
}

// ============================================================================
// TESTS
// ============================================================================
