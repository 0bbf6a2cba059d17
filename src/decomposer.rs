// 🧮 Query Decomposer - entity bag → StructuredQuery
// Every clause is resolved through the FieldMapper; a clause that fails resolution is dropped

use crate::extractor::{BalanceFilter, ClauseKind, EntityBag, LogicalOperator, DEFAULT_DISTINCT_FIELD};
use crate::fields::FieldMapper;
use crate::query::{Aggregation, AggregateOperation, Distinct, Filter, FilterNode, Operator, Sorting, StructuredQuery};
use tracing::{debug, warn};

pub struct QueryDecomposer<'a> {
    fields: &'a FieldMapper,
}

impl<'a> QueryDecomposer<'a> {
    pub fn new(fields: &'a FieldMapper) -> Self {
        QueryDecomposer { fields }
    }

    /// Build a StructuredQuery from extracted entities. Never fails; the worst
    /// case is an empty query.
    pub fn decompose(&self, raw_text: &str, bag: &EntityBag, dataset: &str) -> StructuredQuery {
        if !self.fields.supports_dataset(dataset) {
            warn!(dataset = %dataset, "Unknown dataset, returning empty query");
            return StructuredQuery::default();
        }

        let query = StructuredQuery {
            aggregations: self.aggregations(bag),
            grouping: self.grouping(bag),
            distinct: self.distinct(bag),
            sorting: self.sorting(bag),
            filters: self.filters(bag),
        };

        debug!(text = %raw_text, query = ?query, "decomposed query");
        query
    }

    // ========================================================================
    // CLAUSES
    // ========================================================================

    fn aggregations(&self, bag: &EntityBag) -> Vec<Aggregation> {
        let Some(spec) = &bag.aggregation else {
            return Vec::new();
        };

        if spec.operation == AggregateOperation::Count {
            return vec![Aggregation::count()];
        }

        match spec.field.as_deref().and_then(|f| self.resolve(f, "aggregation")) {
            Some(field) => vec![Aggregation::new(spec.operation, Some(field))],
            None => Vec::new(),
        }
    }

    fn grouping(&self, bag: &EntityBag) -> Option<String> {
        let grouping = bag.grouping.as_ref()?;
        self.resolve(&grouping.group_by, "grouping")
    }

    fn distinct(&self, bag: &EntityBag) -> Option<Distinct> {
        let spec = bag.distinct_query.as_ref().filter(|d| d.is_distinct)?;
        let field = self
            .resolve(&spec.field, "distinct")
            .unwrap_or_else(|| DEFAULT_DISTINCT_FIELD.to_string());

        Some(Distinct { field })
    }

    fn sorting(&self, bag: &EntityBag) -> Option<Sorting> {
        let attribute = bag.attribute.as_deref()?;
        let direction = bag.modifier?.sort_direction()?;
        let field = self.resolve(attribute, "sorting")?;

        Some(Sorting { field, direction })
    }

    /// Filter clauses in text order, split at OR into AND-groups.
    ///
    /// One group is returned as a flat (conjunctive) list; several groups
    /// become a single `Any` node.
    fn filters(&self, bag: &EntityBag) -> Vec<FilterNode> {
        let clauses = if bag.compound_operators.clauses.is_empty() {
            default_clause_order(bag)
        } else {
            bag.compound_operators.clauses.clone()
        };

        let operators = &bag.compound_operators.logical_operators;
        let operators_fit = operators.len() + 1 == clauses.len();

        // (node, joined to the previous node by OR, identity field)
        let mut items: Vec<(FilterNode, bool, Option<&str>)> = Vec::new();
        for (index, clause) in clauses.iter().enumerate() {
            let Some(node) = self.clause_filter(bag, *clause) else {
                continue;
            };

            // A dropped clause takes the operator before it along
            let joined_by_or = !items.is_empty()
                && operators_fit
                && index > 0
                && operators[index - 1] == LogicalOperator::Or;
            let identity_field = match clause {
                ClauseKind::Identity(i) => bag.identity_filters.get(*i).map(|f| f.field.as_str()),
                _ => None,
            };

            // "visa or mastercard" is one choice over a single field
            if let Some((previous, _, Some(field))) = items.last_mut() {
                if joined_by_or && identity_field == Some(*field) {
                    match previous {
                        FilterNode::Any(alternatives) => alternatives.push(node),
                        single => {
                            let first = std::mem::replace(single, FilterNode::Any(Vec::new()));
                            *single = FilterNode::Any(vec![first, node]);
                        }
                    }
                    continue;
                }
            }
            items.push((node, joined_by_or, identity_field));
        }

        let mut groups: Vec<Vec<FilterNode>> = Vec::new();
        for (node, joined_by_or, _) in items {
            match groups.last_mut() {
                Some(group) if !joined_by_or => group.push(node),
                _ => groups.push(vec![node]),
            }
        }

        groups.retain(|g| !g.is_empty());
        if groups.len() <= 1 {
            return groups.pop().unwrap_or_default();
        }

        let branches = groups
            .into_iter()
            .map(|mut group| {
                if group.len() == 1 {
                    group.remove(0)
                } else {
                    FilterNode::All(group)
                }
            })
            .collect();

        vec![FilterNode::Any(branches)]
    }

    fn clause_filter(&self, bag: &EntityBag, clause: ClauseKind) -> Option<FilterNode> {
        let filter = match clause {
            ClauseKind::Balance => {
                let field = self.resolve("current_balance", "balance filter")?;
                match bag.balance_filter? {
                    BalanceFilter::WithBalance => Filter::number(field, Operator::Gt, 0.0),
                    BalanceFilter::ZeroBalance => Filter::number(field, Operator::StrictEq, 0.0),
                }
            }
            ClauseKind::Condition(index) => {
                let condition = bag.conditions.get(index)?;
                let field = self.resolve(&condition.attribute, "condition")?;
                Filter::number(field, condition.operator, condition.value)
            }
            ClauseKind::Identity(index) => {
                let identity = bag.identity_filters.get(index)?;
                let field = self.resolve(&identity.field, "identity filter")?;
                Filter::text(field, Operator::Eq, identity.value.as_str())
            }
            ClauseKind::Category => {
                let category = bag.category.as_deref()?;
                let field = self.resolve("reward_categories", "category")?;
                Filter::text(field, Operator::Eq, category)
            }
            ClauseKind::Merchant => {
                let merchant = bag.merchant.as_deref()?;
                let field = self.resolve("card_name", "merchant")?;
                Filter::text(field, Operator::Eq, merchant)
            }
        };

        Some(filter.into())
    }

    fn resolve(&self, alias: &str, clause: &str) -> Option<String> {
        let resolved = self.fields.resolve(alias).map(str::to_string);
        if resolved.is_none() {
            debug!(alias = %alias, clause = %clause, "Unmapped field alias, dropping clause");
        }
        resolved
    }
}

/// Clause order for bags that carry no positional information
fn default_clause_order(bag: &EntityBag) -> Vec<ClauseKind> {
    let mut clauses = Vec::new();

    if bag.balance_filter.is_some() {
        clauses.push(ClauseKind::Balance);
    }
    clauses.extend((0..bag.conditions.len()).map(ClauseKind::Condition));
    clauses.extend((0..bag.identity_filters.len()).map(ClauseKind::Identity));
    if bag.category.is_some() {
        clauses.push(ClauseKind::Category);
    }
    if bag.merchant.is_some() {
        clauses.push(ClauseKind::Merchant);
    }

    clauses
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{
        AggregationSpec, CompoundOperators, DistinctQuery, EntityExtractor, Grouping, IdentityFilter,
        Modifier, NumericCondition,
    };
    use crate::query::SortDirection;
    use crate::vocabulary::Vocabulary;

    fn plan(text: &str) -> StructuredQuery {
        let vocab = Vocabulary::default();
        let fields = FieldMapper::standard();
        let bag = EntityExtractor::new(&vocab, fields).extract_entities(text);
        QueryDecomposer::new(fields).decompose(text, &bag, "credit_cards")
    }

    fn decompose(bag: &EntityBag) -> StructuredQuery {
        QueryDecomposer::new(FieldMapper::standard()).decompose("", bag, "credit_cards")
    }

    #[test]
    fn test_highest_balance_sorts_descending() {
        let query = plan("cards with highest balance");

        assert_eq!(
            query.sorting,
            Some(Sorting {
                field: "current_balance".to_string(),
                direction: SortDirection::Desc,
            })
        );
        assert!(query.filters.is_empty());
        assert!(query.aggregations.is_empty());
    }

    #[test]
    fn test_lowest_apr_sorts_ascending() {
        let query = plan("which card has the lowest interest rate");

        assert_eq!(query.sorting.unwrap().direction, SortDirection::Asc);
    }

    #[test]
    fn test_distinct_issuers() {
        let query = plan("what are the different issuers");

        assert_eq!(
            query.distinct,
            Some(Distinct {
                field: "issuer".to_string(),
            })
        );
    }

    #[test]
    fn test_total_balance_by_issuer() {
        let query = plan("total balance by issuer");

        assert_eq!(
            query.aggregations,
            vec![Aggregation::new(AggregateOperation::Sum, Some("current_balance".to_string()))]
        );
        assert_eq!(query.grouping.as_deref(), Some("issuer"));
        assert_eq!(query.sorting, None);
    }

    #[test]
    fn test_compound_conditions_are_conjunctive() {
        let query = plan("visa cards with balance over 5000 and APR less than 25");

        assert_eq!(
            query.filters,
            vec![
                Filter::text("card_network", Operator::Eq, "visa").into(),
                Filter::number("current_balance", Operator::Gt, 5000.0).into(),
                Filter::number("apr", Operator::Lt, 25.0).into(),
            ]
        );
    }

    #[test]
    fn test_empty_text_gives_empty_query() {
        assert!(plan("").is_empty());
        assert!(decompose(&EntityBag::default()).is_empty());
    }

    #[test]
    fn test_balance_filters() {
        assert_eq!(
            plan("cards with balance").filters,
            vec![Filter::number("current_balance", Operator::Gt, 0.0).into()]
        );
        assert_eq!(
            plan("cards with zero balance").filters,
            vec![Filter::number("current_balance", Operator::StrictEq, 0.0).into()]
        );
    }

    #[test]
    fn test_category_and_merchant_filters() {
        let query = plan("travel at costco");

        assert_eq!(
            query.filters,
            vec![
                Filter::text("reward_categories", Operator::Eq, "travel").into(),
                Filter::text("card_name", Operator::Eq, "costco").into(),
            ]
        );
    }

    #[test]
    fn test_or_becomes_explicit_disjunction() {
        let query = plan("chase or citi cards");

        assert_eq!(
            query.filters,
            vec![FilterNode::Any(vec![
                Filter::text("issuer", Operator::Eq, "chase").into(),
                Filter::text("issuer", Operator::Eq, "citi").into(),
            ])]
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let query = plan("chase or visa cards with apr under 20");

        assert_eq!(
            query.filters,
            vec![FilterNode::Any(vec![
                Filter::text("issuer", Operator::Eq, "chase").into(),
                FilterNode::All(vec![
                    Filter::text("card_network", Operator::Eq, "visa").into(),
                    Filter::number("apr", Operator::Lt, 20.0).into(),
                ]),
            ])]
        );
    }

    #[test]
    fn test_or_between_same_field_values_stays_one_choice() {
        assert_eq!(
            plan("visa or mastercard cards with zero balance").filters,
            vec![
                FilterNode::Any(vec![
                    Filter::text("card_network", Operator::Eq, "visa").into(),
                    Filter::text("card_network", Operator::Eq, "mastercard").into(),
                ]),
                Filter::number("current_balance", Operator::StrictEq, 0.0).into(),
            ]
        );
        assert_eq!(
            plan("chase or citi or capital one cards with apr under 20").filters,
            vec![
                FilterNode::Any(vec![
                    Filter::text("issuer", Operator::Eq, "chase").into(),
                    Filter::text("issuer", Operator::Eq, "citi").into(),
                    Filter::text("issuer", Operator::Eq, "capital one").into(),
                ]),
                Filter::number("apr", Operator::Lt, 20.0).into(),
            ]
        );
    }

    #[test]
    fn test_both_balance_states_leave_no_filter() {
        assert!(plan("cards with balance or paid off").filters.is_empty());
        assert_eq!(
            plan("chase cards with balance or paid off").filters,
            vec![Filter::text("issuer", Operator::Eq, "chase").into()]
        );
    }

    #[test]
    fn test_negated_issuer_does_not_filter() {
        assert!(plan("cards not from chase").filters.is_empty());
    }

    #[test]
    fn test_count_never_carries_a_field() {
        let bag = EntityBag {
            aggregation: Some(AggregationSpec {
                operation: AggregateOperation::Count,
                field: Some("current_balance".to_string()),
            }),
            ..Default::default()
        };

        assert_eq!(decompose(&bag).aggregations, vec![Aggregation::count()]);
    }

    #[test]
    fn test_unmapped_aliases_drop_their_clause() {
        let bag = EntityBag {
            attribute: Some("shoe size".to_string()),
            modifier: Some(Modifier::Highest),
            grouping: Some(Grouping {
                group_by: "favourite colour".to_string(),
            }),
            aggregation: Some(AggregationSpec {
                operation: AggregateOperation::Sum,
                field: Some("vibes".to_string()),
            }),
            conditions: vec![NumericCondition {
                attribute: "altitude".to_string(),
                operator: Operator::Gt,
                value: 3.0,
            }],
            ..Default::default()
        };

        let query = decompose(&bag);
        assert!(query.is_empty());
        for field in query.referenced_fields() {
            assert!(FieldMapper::standard().is_canonical(field));
        }
    }

    #[test]
    fn test_dropped_clause_takes_its_operator() {
        // A op1 B op2 C with B unmapped reads as A op2 C
        let bag = EntityBag {
            conditions: vec![
                NumericCondition {
                    attribute: "apr".to_string(),
                    operator: Operator::Lt,
                    value: 20.0,
                },
                NumericCondition {
                    attribute: "altitude".to_string(),
                    operator: Operator::Gt,
                    value: 1.0,
                },
                NumericCondition {
                    attribute: "annual fee".to_string(),
                    operator: Operator::StrictEq,
                    value: 0.0,
                },
            ],
            compound_operators: CompoundOperators {
                logical_operators: vec![LogicalOperator::Or, LogicalOperator::And],
                clauses: vec![ClauseKind::Condition(0), ClauseKind::Condition(1), ClauseKind::Condition(2)],
            },
            ..Default::default()
        };

        assert_eq!(
            decompose(&bag).filters,
            vec![
                Filter::number("apr", Operator::Lt, 20.0).into(),
                Filter::number("annual_fee", Operator::StrictEq, 0.0).into(),
            ]
        );
    }

    #[test]
    fn test_mismatched_operator_count_falls_back_to_and() {
        let bag = EntityBag {
            identity_filters: vec![
                IdentityFilter {
                    field: "issuer".to_string(),
                    value: "chase".to_string(),
                },
                IdentityFilter {
                    field: "card_network".to_string(),
                    value: "visa".to_string(),
                },
            ],
            compound_operators: CompoundOperators {
                logical_operators: vec![LogicalOperator::Or, LogicalOperator::Or],
                clauses: Vec::new(),
            },
            ..Default::default()
        };

        assert_eq!(decompose(&bag).filters.len(), 2);
    }

    #[test]
    fn test_distinct_falls_back_to_issuer() {
        let bag = EntityBag {
            distinct_query: Some(DistinctQuery {
                is_distinct: true,
                field: "colour".to_string(),
            }),
            ..Default::default()
        };

        assert_eq!(decompose(&bag).distinct.unwrap().field, "issuer");
    }

    #[test]
    fn test_average_modifier_does_not_sort() {
        let bag = EntityBag {
            attribute: Some("apr".to_string()),
            modifier: Some(Modifier::Average),
            ..Default::default()
        };

        assert_eq!(decompose(&bag).sorting, None);
    }

    #[test]
    fn test_unknown_dataset_gives_empty_query() {
        let vocab = Vocabulary::default();
        let fields = FieldMapper::standard();
        let text = "cards with highest balance";
        let bag = EntityExtractor::new(&vocab, fields).extract_entities(text);

        let decomposer = QueryDecomposer::new(fields);
        assert!(decomposer.decompose(text, &bag, "transactions").is_empty());
        assert!(!decomposer.decompose(text, &bag, "user_credit_cards").is_empty());
    }

    #[test]
    fn test_decomposition_is_idempotent() {
        for text in [
            "cards with highest balance",
            "total balance by issuer",
            "chase or citi cards with apr under 20",
            "how many different networks",
        ] {
            assert_eq!(plan(text), plan(text));
        }
    }
}
