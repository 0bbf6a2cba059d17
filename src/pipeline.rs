// 🔗 Query Pipeline - text → entities → StructuredQuery → result
// Owns the process-wide configuration; every call is independent and synchronous

use crate::decomposer::QueryDecomposer;
use crate::executor::{ExecutionResult, QueryExecutor};
use crate::extractor::{EntityBag, EntityExtractor};
use crate::fields::FieldMapper;
use crate::query::StructuredQuery;
use crate::record::CardRecord;
use crate::vocabulary::Vocabulary;
use serde::Serialize;

/// Dataset queried when none is named
pub const DEFAULT_DATASET: &str = "credit_cards";

/// Longest question accepted from untrusted callers
pub const MAX_QUESTION_BYTES: usize = 4096;

/// Whether a caller-supplied question is short enough to answer
pub fn question_within_limit(question: &str) -> bool {
    question.len() <= MAX_QUESTION_BYTES
}

/// Every intermediate stage of one answered question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub question: String,
    pub entities: EntityBag,
    pub query: StructuredQuery,
    pub result: ExecutionResult,
}

/// Shared read-only configuration plus the three stages wired left to right
#[derive(Debug, Clone)]
pub struct QueryPipeline {
    vocabulary: Vocabulary,
    fields: &'static FieldMapper,
    dataset: String,
}

impl Default for QueryPipeline {
    fn default() -> Self {
        Self::new(Vocabulary::default())
    }
}

impl QueryPipeline {
    pub fn new(vocabulary: Vocabulary) -> Self {
        QueryPipeline {
            vocabulary,
            fields: FieldMapper::standard(),
            dataset: DEFAULT_DATASET.to_string(),
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn extractor(&self) -> EntityExtractor<'_> {
        EntityExtractor::new(&self.vocabulary, self.fields)
    }

    pub fn decomposer(&self) -> QueryDecomposer<'_> {
        QueryDecomposer::new(self.fields)
    }

    /// Text → StructuredQuery, without touching any records
    pub fn plan(&self, text: &str) -> StructuredQuery {
        let entities = self.extractor().extract_entities(text);
        self.decomposer().decompose(text, &entities, &self.dataset)
    }

    pub fn run(&self, text: &str, records: &[CardRecord]) -> ExecutionResult {
        QueryExecutor::new().execute(&self.plan(text), records)
    }

    /// Like `run`, keeping the entity bag and the query alongside the result
    pub fn answer(&self, text: &str, records: &[CardRecord]) -> QueryAnswer {
        let entities = self.extractor().extract_entities(text);
        let query = self.decomposer().decompose(text, &entities, &self.dataset);
        let result = QueryExecutor::new().execute(&query, records);

        QueryAnswer {
            question: text.to_string(),
            entities,
            query,
            result,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
