// Card Query - Core Library
// Free-text questions about a card portfolio → structured query → in-memory results

pub mod amount;
pub mod decomposer;
pub mod executor;
pub mod extractor;
pub mod fields;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod text;
pub mod vocabulary;

// Re-export commonly used types
pub use amount::{scan_amount, AmountMatch, AmountOptions, AmountScanner};
pub use decomposer::QueryDecomposer;
pub use executor::{AggregateRow, ExecutionResult, QueryExecutor, ResultRow};
pub use extractor::{
    AggregationSpec, BalanceFilter, ClauseKind, CompoundOperators, DistinctQuery, EntityBag,
    EntityExtractor, Grouping, IdentityFilter, LogicalOperator, Modifier, NumericCondition,
    ATTRIBUTE_RULES,
};
pub use fields::{FieldDefinition, FieldGroup, FieldMapper, FieldType, CARD_DATASETS};
pub use pipeline::{question_within_limit, QueryAnswer, QueryPipeline, DEFAULT_DATASET, MAX_QUESTION_BYTES};
pub use query::{
    AggregateOperation, Aggregation, Distinct, Filter, FilterNode, FilterValue, Operator,
    SortDirection, Sorting, StructuredQuery,
};
pub use record::{load_csv, load_json, load_records, CardRecord, FieldValue};
pub use vocabulary::{KeywordEntry, MccEntry, Vocabulary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
