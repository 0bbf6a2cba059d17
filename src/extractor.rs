// 🔎 Entity Extractor - free text → normalized entity bag
// A closed grammar of recognized phrases; anything else is simply not extracted

use crate::amount::AmountScanner;
use crate::fields::FieldMapper;
use crate::query::{AggregateOperation, Operator, SortDirection};
use crate::text::{find_all_phrases, find_phrase, mask, mask_all, normalize, Span};
use crate::vocabulary::{KeywordHit, Vocabulary};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

// ============================================================================
// ENTITY TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Highest,
    Lowest,
    Maximum,
    Minimum,
    Most,
    Least,
    Average,
}

impl Modifier {
    /// Sort direction implied by the modifier's polarity
    pub fn sort_direction(&self) -> Option<SortDirection> {
        match self {
            Modifier::Highest | Modifier::Maximum | Modifier::Most => Some(SortDirection::Desc),
            Modifier::Lowest | Modifier::Minimum | Modifier::Least => Some(SortDirection::Asc),
            Modifier::Average => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceFilter {
    WithBalance,
    ZeroBalance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinctQuery {
    pub is_distinct: bool,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

/// A filterable clause, referenced by position in the entity bag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Balance,
    Condition(usize),
    Identity(usize),
    Category,
    Merchant,
}

/// Logical connectors between filterable clauses.
///
/// `clauses` lists the clauses in text order; `logical_operators[i]` joins
/// `clauses[i]` and `clauses[i + 1]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundOperators {
    pub logical_operators: Vec<LogicalOperator>,
    pub clauses: Vec<ClauseKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub group_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub operation: AggregateOperation,
    pub field: Option<String>,
}

/// `<attribute> <comparator> <amount>`, e.g. "apr less than 25"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericCondition {
    pub attribute: String,
    pub operator: Operator,
    pub value: f64,
}

/// Issuer, network or card type named in the text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFilter {
    pub field: String,
    pub value: String,
}

/// Everything recognized in one utterance.
///
/// Unrecognized phrases leave their slot empty; an empty bag is a valid
/// (maximally broad) request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBag {
    pub attribute: Option<String>,
    pub modifier: Option<Modifier>,
    pub category: Option<String>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub balance_filter: Option<BalanceFilter>,
    pub distinct_query: Option<DistinctQuery>,
    pub compound_operators: CompoundOperators,
    pub grouping: Option<Grouping>,
    pub aggregation: Option<AggregationSpec>,
    pub conditions: Vec<NumericCondition>,
    pub identity_filters: Vec<IdentityFilter>,
}

// ============================================================================
// ATTRIBUTE RULES
// ============================================================================

pub struct AttributeRule {
    pub phrases: &'static [&'static str],
    pub attribute: &'static str,
}

/// Ordered attribute rules: the first rule with a match wins.
///
/// Multi-word phrases sit ahead of the generic words they contain
/// ("interest rate" before "rate", "annual fee" before "fee").
pub const ATTRIBUTE_RULES: &[AttributeRule] = &[
    AttributeRule { phrases: &["interest rate", "annual percentage rate", "apr", "interest"], attribute: "apr" },
    AttributeRule { phrases: &["annual fee", "annual fees"], attribute: "annual_fee" },
    AttributeRule { phrases: &["available credit", "remaining credit"], attribute: "available_credit" },
    AttributeRule { phrases: &["credit utilization", "utilization", "utilisation"], attribute: "utilization" },
    AttributeRule { phrases: &["credit limit", "spending limit", "credit line", "limit", "limits"], attribute: "credit_limit" },
    AttributeRule { phrases: &["amount to pay", "amount due", "minimum payment", "payment amount"], attribute: "amount_to_pay" },
    AttributeRule { phrases: &["payment due date", "due date", "due"], attribute: "payment_due_date" },
    AttributeRule { phrases: &["statement close", "closing date", "statement date"], attribute: "statement_close_day" },
    AttributeRule { phrases: &["grace period"], attribute: "grace_period_days" },
    AttributeRule { phrases: &["balance", "balances", "owe", "owed", "debt"], attribute: "current_balance" },
    AttributeRule { phrases: &["reward rate", "rewards", "reward", "cash back", "cashback", "points", "rate"], attribute: "reward_rate" },
    AttributeRule { phrases: &["fees", "fee"], attribute: "annual_fee" },
    AttributeRule { phrases: &["nickname"], attribute: "nickname" },
    AttributeRule { phrases: &["issuer", "issuers", "bank", "banks"], attribute: "issuer" },
    AttributeRule { phrases: &["network", "networks"], attribute: "card_network" },
    AttributeRule { phrases: &["card type", "card types", "type", "types"], attribute: "card_type" },
    AttributeRule { phrases: &["card name", "name"], attribute: "card_name" },
];

/// Attribute assumed for a numeric condition that names none ("cards over $5k")
const DEFAULT_CONDITION_ATTRIBUTE: &str = "current_balance";

#[derive(Debug, Clone, Copy, PartialEq)]
struct AttributeMatch {
    attribute: &'static str,
    span: Span,
    rule_index: usize,
}

/// Every attribute phrase occurrence in `text`, minus those shadowed by an
/// overlapping match from an earlier rule or a longer phrase of the same rule.
///
/// Matches are sorted by start and swept once; only matches starting within
/// one phrase length of each other can overlap.
fn attribute_matches(text: &str) -> Vec<AttributeMatch> {
    let mut all: Vec<AttributeMatch> = ATTRIBUTE_RULES
        .iter()
        .enumerate()
        .flat_map(|(rule_index, rule)| {
            rule.phrases.iter().flat_map(move |phrase| {
                find_all_phrases(text, phrase)
                    .into_iter()
                    .map(move |span| AttributeMatch {
                        attribute: rule.attribute,
                        span,
                        rule_index,
                    })
            })
        })
        .collect();
    all.sort_by_key(|m| (m.span.start, m.rule_index, Reverse(m.span.len())));

    let longest = longest_attribute_phrase();
    let mut kept: Vec<AttributeMatch> = Vec::with_capacity(all.len());
    let mut low = 0;

    for m in &all {
        while all[low].span.start + longest <= m.span.start {
            low += 1;
        }
        let shadowed = all[low..]
            .iter()
            .take_while(|other| other.span.start < m.span.end)
            .any(|other| shadows(other, m));
        if !shadowed {
            kept.push(*m);
        }
    }

    kept.dedup_by(|a, b| a.span == b.span);
    kept
}

fn shadows(other: &AttributeMatch, m: &AttributeMatch) -> bool {
    other.span.overlaps(&m.span)
        && (other.rule_index < m.rule_index
            || (other.rule_index == m.rule_index && other.span.len() > m.span.len()))
}

fn longest_attribute_phrase() -> usize {
    ATTRIBUTE_RULES
        .iter()
        .flat_map(|rule| rule.phrases.iter())
        .map(|phrase| phrase.len())
        .max()
        .unwrap_or(0)
}

/// First rule (in rule order) with any occurrence in `text`
fn first_rule_match(text: &str) -> Option<AttributeMatch> {
    ATTRIBUTE_RULES
        .iter()
        .enumerate()
        .find_map(|(rule_index, rule)| {
            rule.phrases
                .iter()
                .filter_map(|phrase| find_phrase(text, phrase))
                .min_by_key(|span| (span.start, Reverse(span.len())))
                .map(|span| AttributeMatch {
                    attribute: rule.attribute,
                    span,
                    rule_index,
                })
        })
}

/// Matches inside `window`; `matches` must be sorted by start
fn matches_within(matches: &[AttributeMatch], window: Span) -> impl Iterator<Item = &AttributeMatch> {
    let first = matches.partition_point(|m| m.span.start < window.start);
    matches[first..]
        .iter()
        .take_while(move |m| m.span.start < window.end)
        .filter(move |m| window.contains(&m.span))
}

/// Whether `span` overlaps any hit; `hits` must be sorted and pairwise disjoint
fn overlaps_any(hits: &[KeywordHit], span: Span) -> bool {
    let index = hits.partition_point(|h| h.span.end <= span.start);
    hits.get(index).map_or(false, |h| h.span.overlaps(&span))
}

/// Negation ending right before a hit: "not from chase", "except amex"
fn is_negated(text: &str, span: Span) -> bool {
    let mut from = span.start.saturating_sub(NEGATION_WINDOW);
    if from > 0 {
        match text[from..span.start].find(' ') {
            Some(offset) => from += offset + 1,
            None => return false,
        }
    }
    NEGATION_RE.is_match(&text[from..span.start])
}

// ============================================================================
// PHRASE TABLES
// ============================================================================

const MODIFIER_RULES: &[(Modifier, &[&str])] = &[
    (Modifier::Highest, &["highest", "largest", "biggest", "greatest", "top", "descending", "desc"]),
    (Modifier::Lowest, &["lowest", "smallest", "cheapest", "bottom", "ascending", "asc"]),
    (Modifier::Maximum, &["maximum", "max"]),
    (Modifier::Minimum, &["minimum", "min"]),
    (Modifier::Most, &["most"]),
    (Modifier::Least, &["least", "fewest"]),
    (Modifier::Average, &["average", "avg", "mean"]),
];

const AGGREGATION_RULES: &[(AggregateOperation, &[&str])] = &[
    (AggregateOperation::Sum, &["total", "sum of", "sum", "add up", "added up", "combined"]),
    (AggregateOperation::Avg, &["average", "avg", "mean"]),
    (AggregateOperation::Count, &["how many", "number of", "count of", "count"]),
    (AggregateOperation::Min, &["minimum", "min", "lowest"]),
    (AggregateOperation::Max, &["maximum", "max", "highest"]),
];

/// Words that make a question about individual records rather than a single figure
const RECORD_NOUNS: &[&str] = &["card", "cards", "which", "account", "accounts"];

const ZERO_BALANCE_PHRASES: &[&str] = &[
    "zero balance",
    "zero balances",
    "0 balance",
    "$0 balance",
    "no balance",
    "paid off",
    "without a balance",
    "without balance",
];

const WITH_BALANCE_PHRASES: &[&str] = &[
    "with an outstanding balance",
    "with a balance",
    "with balances",
    "with balance",
    "carrying a balance",
    "carry a balance",
];

const DISTINCT_FIELD_KEYWORDS: &[(&str, &[&str])] = &[
    ("card_network", &["network", "networks", "card network", "card networks"]),
    ("issuer", &["issuer", "issuers", "bank", "banks", "provider", "providers"]),
    ("card_type", &["type", "types", "card type", "card types", "kind", "kinds"]),
];

/// Field a distinct query falls back to when the text names none
pub const DEFAULT_DISTINCT_FIELD: &str = "issuer";

static COMPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\b(?P<gte>at least|no less than)\b|\b(?P<lte>at most|no more than|up to)\b|\b(?P<gt>more than|greater than|higher than|larger than|bigger than|exceeding|above|over)\b|\b(?P<lt>less than|lower than|smaller than|fewer than|below|under)\b|\b(?P<eq>exactly|equal to|equals)\b|(?P<sym>>=|<=|>|<|=))",
    )
    .unwrap()
});

static SORT_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:sort|sorted|order|ordered|rank|ranked)\s+(?:them\s+|cards\s+|my cards\s+)?by\s+").unwrap()
});

static GROUP_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?P<kw>grouped by|group by|broken down by|breakdown by|distribution by|split by|per|by)\s+(?:each\s+)?(?P<rest>[a-z_][a-z_'-]*(?:\s[a-z_][a-z_'-]*)?)",
    )
    .unwrap()
});

static STRONG_DISTINCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:different|various|unique|distinct)\b(?:\s+(?P<noun>[a-z][a-z'-]*(?:\s[a-z][a-z'-]*)?))?").unwrap()
});

static WEAK_DISTINCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:all the|all my|breakdown of|distribution of|list of)\s+(?P<noun>[a-z][a-z'-]*(?:\s[a-z][a-z'-]*)?)").unwrap()
});

static MCC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmcc\s?(?P<code>\d{4})\b").unwrap());

/// Bytes before a hit searched for a negation
const NEGATION_WINDOW: usize = 48;

static NEGATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:not|except|excluding|besides|other than|no)\s+(?:(?:from|by|on|at|for|the|a|an|my|any|including)\s+){0,2}$",
    )
    .unwrap()
});

static OR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bor\b").unwrap());

// ============================================================================
// ENTITY EXTRACTOR
// ============================================================================

/// Pure pattern matcher over the closed query grammar
pub struct EntityExtractor<'a> {
    vocabulary: &'a Vocabulary,
    fields: &'a FieldMapper,
    amounts: AmountScanner,
}

/// A numeric condition plus the text it was read from
struct LocatedCondition {
    condition: NumericCondition,
    span: Span,
    comparator: Span,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(vocabulary: &'a Vocabulary, fields: &'a FieldMapper) -> Self {
        EntityExtractor {
            vocabulary,
            fields,
            amounts: AmountScanner::new(vocabulary.amount),
        }
    }

    /// Attribute-only shortcut: canonical attribute of the first matching rule
    pub fn extract_attribute(&self, text: &str) -> Option<String> {
        let text = normalize(text);
        first_rule_match(&text).map(|m| m.attribute.to_string())
    }

    /// Extract every entity the grammar recognizes. Never fails.
    pub fn extract_entities(&self, text: &str) -> EntityBag {
        let text = normalize(text);
        if text.is_empty() {
            return EntityBag::default();
        }

        let mut bag = EntityBag::default();
        let attribute_spans = attribute_matches(&text);

        // Numeric conditions first: their comparators are not modifiers
        let conditions = self.extract_conditions(&text, &attribute_spans);

        // Words that belong to attribute phrases or comparators never count as modifiers
        let quiet = mask_all(
            &text,
            attribute_spans
                .iter()
                .map(|m| m.span)
                .chain(conditions.iter().map(|c| c.comparator)),
        );

        bag.attribute = first_rule_match(&text).map(|m| m.attribute.to_string());
        bag.modifier = extract_modifier(&quiet);

        if let Some(sort_attribute) = self.extract_sort_by(&text, &attribute_spans) {
            bag.attribute = Some(sort_attribute);
            if bag.modifier.is_none() {
                bag.modifier = Some(Modifier::Lowest);
            }
        }

        // Category before merchant: a token claimed by a category is not a merchant,
        // even when the category itself is negated
        let mcc = self.extract_mcc(&text);
        let mut category_hits = self.vocabulary.category_hits(&text);
        if let Some(hit) = &mcc {
            let index = category_hits.partition_point(|h| h.span.start < hit.span.start);
            if !category_hits.iter().any(|h| h.span.overlaps(&hit.span)) {
                category_hits.insert(index, hit.clone());
            }
        }
        let category = category_hits
            .iter()
            .find(|h| !is_negated(&text, h.span))
            .cloned();
        let merchant = self
            .vocabulary
            .merchant_hits(&text)
            .into_iter()
            .find(|m| !overlaps_any(&category_hits, m.span) && !is_negated(&text, m.span));

        bag.category = category.as_ref().map(|h| h.value.clone());
        bag.merchant = merchant.as_ref().map(|h| h.value.clone());

        let amount_text = match &mcc {
            Some(hit) => mask(&text, hit.span),
            None => text.clone(),
        };
        bag.amount = self.amounts.scan(&amount_text);

        let balance = extract_balance_filter(&text);
        bag.balance_filter = balance.map(|(filter, _)| filter);

        let identities = self.extract_identity_filters(&text);

        bag.distinct_query = extract_distinct(&text);
        bag.grouping = self.extract_grouping(&text);
        bag.aggregation = extract_aggregation(&quiet, &text, &attribute_spans, bag.attribute.as_deref());

        // "how many different X" is a distinct count, not a record count
        if bag.distinct_query.is_some()
            && matches!(&bag.aggregation, Some(spec) if spec.operation == AggregateOperation::Count)
        {
            bag.aggregation = None;
        }

        // Order the filterable clauses by position and read the connectors between them
        let mut located: Vec<(ClauseKind, Span)> = Vec::new();
        if let Some((_, span)) = balance {
            located.push((ClauseKind::Balance, span));
        }
        for (index, c) in conditions.iter().enumerate() {
            located.push((ClauseKind::Condition(index), c.span));
        }
        for (index, (_, span)) in identities.iter().enumerate() {
            located.push((ClauseKind::Identity(index), *span));
        }
        if let Some(hit) = &category {
            located.push((ClauseKind::Category, hit.span));
        }
        if let Some(hit) = &merchant {
            located.push((ClauseKind::Merchant, hit.span));
        }
        located.sort_by_key(|(_, span)| span.start);

        bag.compound_operators = connectors(&text, &located);
        bag.conditions = conditions.into_iter().map(|c| c.condition).collect();
        bag.identity_filters = identities.into_iter().map(|(f, _)| f).collect();

        debug!(text = %text, entities = ?bag, "extracted entities");
        bag
    }

    fn extract_conditions(&self, text: &str, attributes: &[AttributeMatch]) -> Vec<LocatedCondition> {
        let comparators: Vec<(Operator, Span)> = COMPARATOR_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let operator = if caps.name("gte").is_some() {
                    Operator::Gte
                } else if caps.name("lte").is_some() {
                    Operator::Lte
                } else if caps.name("gt").is_some() {
                    Operator::Gt
                } else if caps.name("lt").is_some() {
                    Operator::Lt
                } else if caps.name("eq").is_some() {
                    Operator::StrictEq
                } else {
                    match caps.name("sym")?.as_str() {
                        ">=" => Operator::Gte,
                        "<=" => Operator::Lte,
                        ">" => Operator::Gt,
                        "<" => Operator::Lt,
                        _ => Operator::StrictEq,
                    }
                };
                Some((operator, Span::new(whole.start(), whole.end())))
            })
            .collect();

        let mut conditions: Vec<LocatedCondition> = Vec::new();
        let mut boundary = 0;

        for (index, (operator, comparator)) in comparators.iter().enumerate() {
            let Some(amount) = self.amounts.find_leading(&text[comparator.end..]) else {
                continue;
            };
            let amount_end = comparator.end + amount.end;
            let next_start = comparators
                .get(index + 1)
                .map(|(_, span)| span.start)
                .unwrap_or(text.len());

            let before = Span::new(boundary, comparator.start);
            let after = Span::new(amount_end, next_start.max(amount_end));

            let preceding = matches_within(attributes, before).max_by_key(|m| m.span.start);
            let (attribute, span) = match preceding {
                Some(m) => (m.attribute, Span::new(m.span.start, amount_end)),
                None => match matches_within(attributes, after).min_by_key(|m| m.span.start) {
                    Some(m) => (m.attribute, Span::new(comparator.start, m.span.end)),
                    None => (DEFAULT_CONDITION_ATTRIBUTE, Span::new(comparator.start, amount_end)),
                },
            };

            boundary = span.end;
            conditions.push(LocatedCondition {
                condition: NumericCondition {
                    attribute: attribute.to_string(),
                    operator: *operator,
                    value: amount.value,
                },
                span,
                comparator: *comparator,
            });
        }

        conditions
    }

    fn extract_sort_by(&self, text: &str, attributes: &[AttributeMatch]) -> Option<String> {
        let found = SORT_BY_RE.find(text)?;
        let rest = Span::new(found.end(), text.len());

        if let Some(m) = matches_within(attributes, rest).min_by_key(|m| m.span.start) {
            return Some(m.attribute.to_string());
        }

        // Fall back to a bare field alias ("sorted by utilization")
        let words: Vec<&str> = text[found.end()..].split(' ').take(2).collect();
        self.resolve_alias(&words).map(|(_, canonical)| canonical)
    }

    fn extract_mcc(&self, text: &str) -> Option<KeywordHit> {
        MCC_RE.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let code: u16 = caps.name("code")?.as_str().parse().ok()?;
            let category = self.vocabulary.category_for_mcc(code)?;
            Some(KeywordHit {
                value: category.to_string(),
                span: Span::new(whole.start(), whole.end()),
            })
        })
    }

    /// Networks are checked first; an issuer keyword inside a network match is
    /// skipped. Negated names ("not from chase") restrict nothing.
    fn extract_identity_filters(&self, text: &str) -> Vec<(IdentityFilter, Span)> {
        let networks = self.vocabulary.network_hits(text);
        let issuers: Vec<KeywordHit> = self
            .vocabulary
            .issuer_hits(text)
            .into_iter()
            .filter(|i| !overlaps_any(&networks, i.span))
            .collect();
        let card_types = self.vocabulary.card_type_hits(text);

        let mut filters: Vec<(IdentityFilter, Span)> = Vec::new();
        let mut seen: HashSet<(&'static str, String)> = HashSet::new();
        let tables = [
            ("card_network", networks),
            ("issuer", issuers),
            ("card_type", card_types),
        ];
        for (field, hits) in tables {
            for hit in hits {
                if is_negated(text, hit.span) {
                    debug!(field, value = %hit.value, "negated identity, not filtering");
                    continue;
                }
                if seen.insert((field, hit.value.clone())) {
                    let filter = IdentityFilter {
                        field: field.to_string(),
                        value: hit.value,
                    };
                    filters.push((filter, hit.span));
                }
            }
        }

        filters.sort_by_key(|(_, span)| span.start);
        filters
    }

    fn extract_grouping(&self, text: &str) -> Option<Grouping> {
        GROUP_BY_RE.captures_iter(text).find_map(|caps| {
            let keyword = caps.name("kw")?;
            let preceding = text[..keyword.start()].trim_end();
            let is_sort = ["sort", "sorted", "order", "ordered", "rank", "ranked"]
                .iter()
                .any(|w| preceding.ends_with(w));
            if is_sort {
                return None;
            }

            let rest = caps.name("rest")?.as_str();
            let mut words: Vec<&str> = rest.split(' ').collect();
            // "by card type" reads as "card type"; "by card" alone is not a field
            if words.first() == Some(&"card") && words.len() == 2 && self.fields.resolve(rest).is_none() {
                words.remove(0);
            }

            let group_by = match self.resolve_alias(&words) {
                Some((alias, _)) => alias,
                None => words.first()?.to_string(),
            };
            Some(Grouping { group_by })
        })
    }

    /// Longest resolvable alias among the leading words (two words, then one).
    ///
    /// Returns the alias as written plus its canonical field.
    fn resolve_alias(&self, words: &[&str]) -> Option<(String, String)> {
        (1..=words.len().min(2)).rev().find_map(|n| {
            let alias = words[..n].join(" ");
            let canonical = self
                .fields
                .resolve(&alias)
                .or_else(|| alias.strip_suffix('s').and_then(|a| self.fields.resolve(a)))?;
            Some((alias.clone(), canonical.to_string()))
        })
    }
}

// ============================================================================
// STATELESS RECOGNIZERS
// ============================================================================

fn extract_modifier(quiet: &str) -> Option<Modifier> {
    MODIFIER_RULES.iter().find_map(|(modifier, words)| {
        words
            .iter()
            .any(|w| find_phrase(quiet, w).is_some())
            .then_some(*modifier)
    })
}

/// "with balance over X" is a numeric condition, not a balance filter.
///
/// A question naming both states ("cards with balance or paid off") covers
/// every card, so it yields no balance filter at all.
fn extract_balance_filter(text: &str) -> Option<(BalanceFilter, Span)> {
    let zero = ZERO_BALANCE_PHRASES.iter().find_map(|p| find_phrase(text, p));
    let with = WITH_BALANCE_PHRASES.iter().find_map(|phrase| {
        let span = find_phrase(text, phrase)?;
        let rest = text[span.end..].trim_start();
        let followed_by_comparator = COMPARATOR_RE
            .find(rest)
            .map_or(false, |m| m.start() == 0);
        (!followed_by_comparator).then_some(span)
    });

    match (zero, with) {
        (Some(_), Some(_)) => {
            debug!("both balance states named, not filtering on balance");
            None
        }
        (Some(span), None) => Some((BalanceFilter::ZeroBalance, span)),
        (None, Some(span)) => Some((BalanceFilter::WithBalance, span)),
        (None, None) => None,
    }
}

fn distinct_field_in(phrase: &str) -> Option<&'static str> {
    DISTINCT_FIELD_KEYWORDS.iter().find_map(|(field, keywords)| {
        keywords
            .iter()
            .any(|k| find_phrase(phrase, k).is_some())
            .then_some(*field)
    })
}

fn extract_distinct(text: &str) -> Option<DistinctQuery> {
    if let Some(caps) = STRONG_DISTINCT_RE.captures(text) {
        let noun = caps.name("noun").map(|m| m.as_str()).unwrap_or("");
        let field = distinct_field_in(noun)
            .or_else(|| distinct_field_in(text))
            .unwrap_or(DEFAULT_DISTINCT_FIELD);
        return Some(DistinctQuery {
            is_distinct: true,
            field: field.to_string(),
        });
    }

    // Weak triggers only count when a field keyword follows them
    WEAK_DISTINCT_RE.captures_iter(text).find_map(|caps| {
        let field = distinct_field_in(caps.name("noun")?.as_str())?;
        Some(DistinctQuery {
            is_distinct: true,
            field: field.to_string(),
        })
    })
}

fn extract_aggregation(
    quiet: &str,
    text: &str,
    attributes: &[AttributeMatch],
    fallback: Option<&str>,
) -> Option<AggregationSpec> {
    let names_records = RECORD_NOUNS.iter().any(|n| find_phrase(text, n).is_some());

    let (operation, trigger) = AGGREGATION_RULES.iter().find_map(|(operation, words)| {
        let is_extreme = matches!(operation, AggregateOperation::Min | AggregateOperation::Max);
        if is_extreme && names_records {
            return None;
        }
        words
            .iter()
            .filter_map(|w| find_phrase(quiet, w))
            .min_by_key(|span| span.start)
            .map(|span| (*operation, span))
    })?;

    if operation == AggregateOperation::Count {
        return Some(AggregationSpec {
            operation,
            field: None,
        });
    }

    let remainder = Span::new(trigger.end, text.len());
    let field = matches_within(attributes, remainder)
        .min_by_key(|m| m.span.start)
        .map(|m| m.attribute.to_string())
        .or_else(|| fallback.map(str::to_string));

    Some(AggregationSpec { operation, field })
}

/// Connectors between clauses in text order; a gap without "or" is AND
fn connectors(text: &str, located: &[(ClauseKind, Span)]) -> CompoundOperators {
    let logical_operators = located
        .windows(2)
        .map(|pair| {
            let (start, end) = (pair[0].1.end, pair[1].1.start);
            if start < end && OR_RE.is_match(&text[start..end]) {
                LogicalOperator::Or
            } else {
                LogicalOperator::And
            }
        })
        .collect();

    CompoundOperators {
        logical_operators,
        clauses: located.iter().map(|(kind, _)| *kind).collect(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> EntityBag {
        let vocab = Vocabulary::default();
        EntityExtractor::new(&vocab, FieldMapper::standard()).extract_entities(text)
    }

    fn attribute(text: &str) -> Option<String> {
        let vocab = Vocabulary::default();
        EntityExtractor::new(&vocab, FieldMapper::standard()).extract_attribute(text)
    }

    #[test]
    fn test_empty_text_yields_default_bag() {
        assert_eq!(extract(""), EntityBag::default());
        assert_eq!(extract("   \t "), EntityBag::default());
        assert_eq!(extract("???"), EntityBag::default());
    }

    #[test]
    fn test_attribute_rule_order_is_a_contract() {
        let order: Vec<&str> = ATTRIBUTE_RULES.iter().map(|r| r.attribute).collect();
        assert_eq!(
            order,
            vec![
                "apr",
                "annual_fee",
                "available_credit",
                "utilization",
                "credit_limit",
                "amount_to_pay",
                "payment_due_date",
                "statement_close_day",
                "grace_period_days",
                "current_balance",
                "reward_rate",
                "annual_fee",
                "nickname",
                "issuer",
                "card_network",
                "card_type",
                "card_name",
            ]
        );
    }

    #[test]
    fn test_specific_phrase_beats_generic_word() {
        assert_eq!(attribute("which card has the lowest interest rate"), Some("apr".to_string()));
        assert_eq!(attribute("best reward rate"), Some("reward_rate".to_string()));
        assert_eq!(attribute("cards with the highest rate"), Some("reward_rate".to_string()));
        assert_eq!(attribute("annual fee under 100"), Some("annual_fee".to_string()));
        assert_eq!(attribute("minimum payment due"), Some("amount_to_pay".to_string()));
    }

    #[test]
    fn test_first_rule_wins_over_text_position() {
        // balance comes first in the text, but the apr rule is earlier in the table
        assert_eq!(attribute("balance and apr"), Some("apr".to_string()));
        assert_eq!(attribute("what is the weather"), None);
    }

    #[test]
    fn test_highest_balance() {
        let bag = extract("cards with highest balance");

        assert_eq!(bag.attribute.as_deref(), Some("current_balance"));
        assert_eq!(bag.modifier, Some(Modifier::Highest));
        assert_eq!(bag.balance_filter, None);
        assert_eq!(bag.aggregation, None);
    }

    #[test]
    fn test_attribute_words_are_not_modifiers() {
        let bag = extract("cards with the highest minimum payment");

        assert_eq!(bag.attribute.as_deref(), Some("amount_to_pay"));
        assert_eq!(bag.modifier, Some(Modifier::Highest));
    }

    #[test]
    fn test_comparators_are_not_modifiers() {
        let bag = extract("cards with apr at least 20");

        assert_eq!(bag.modifier, None);
        assert_eq!(bag.conditions.len(), 1);
        assert_eq!(bag.conditions[0].operator, Operator::Gte);
    }

    #[test]
    fn test_modifier_polarity() {
        assert_eq!(Modifier::Highest.sort_direction(), Some(SortDirection::Desc));
        assert_eq!(Modifier::Most.sort_direction(), Some(SortDirection::Desc));
        assert_eq!(Modifier::Least.sort_direction(), Some(SortDirection::Asc));
        assert_eq!(Modifier::Minimum.sort_direction(), Some(SortDirection::Asc));
        assert_eq!(Modifier::Average.sort_direction(), None);
    }

    #[test]
    fn test_category_and_merchant_from_separate_tokens() {
        let bag = extract("travel at costco");

        assert_eq!(bag.category.as_deref(), Some("travel"));
        assert_eq!(bag.merchant.as_deref(), Some("costco"));
    }

    #[test]
    fn test_category_claims_token_before_merchant() {
        // "uber" is both a transit keyword and a merchant
        let bag = extract("best card for uber");

        assert_eq!(bag.category.as_deref(), Some("transit"));
        assert_eq!(bag.merchant, None);
    }

    #[test]
    fn test_mcc_code_maps_to_category() {
        let bag = extract("cards that earn extra on mcc 5300");

        assert_eq!(bag.category.as_deref(), Some("groceries"));
        assert_eq!(bag.amount, None);
    }

    #[test]
    fn test_amount_recognition() {
        assert_eq!(extract("cards over $5k").amount, Some(5000.0));
        assert_eq!(extract("balance above 1,250.50 dollars").amount, Some(1250.5));
        assert_eq!(extract("which card should I use").amount, None);
    }

    #[test]
    fn test_balance_filters() {
        assert_eq!(extract("cards with balance").balance_filter, Some(BalanceFilter::WithBalance));
        assert_eq!(extract("cards with a balance").balance_filter, Some(BalanceFilter::WithBalance));
        assert_eq!(extract("cards with zero balance").balance_filter, Some(BalanceFilter::ZeroBalance));
        assert_eq!(extract("which cards are paid off").balance_filter, Some(BalanceFilter::ZeroBalance));
        assert_eq!(extract("cards with balance over 100").balance_filter, None);
    }

    #[test]
    fn test_both_balance_states_mean_no_balance_filter() {
        let bag = extract("cards with balance or paid off");

        assert_eq!(bag.balance_filter, None);
        assert!(!bag.compound_operators.clauses.contains(&ClauseKind::Balance));
    }

    #[test]
    fn test_numeric_conditions() {
        let bag = extract("visa cards with balance over 5000 and APR less than 25");

        assert_eq!(
            bag.conditions,
            vec![
                NumericCondition {
                    attribute: "current_balance".to_string(),
                    operator: Operator::Gt,
                    value: 5000.0,
                },
                NumericCondition {
                    attribute: "apr".to_string(),
                    operator: Operator::Lt,
                    value: 25.0,
                },
            ]
        );
        assert_eq!(
            bag.identity_filters,
            vec![IdentityFilter {
                field: "card_network".to_string(),
                value: "visa".to_string(),
            }]
        );
        assert_eq!(
            bag.compound_operators.clauses,
            vec![ClauseKind::Identity(0), ClauseKind::Condition(0), ClauseKind::Condition(1)]
        );
        assert_eq!(
            bag.compound_operators.logical_operators,
            vec![LogicalOperator::And, LogicalOperator::And]
        );
    }

    #[test]
    fn test_condition_attribute_after_amount() {
        let bag = extract("cards under 20% apr");

        assert_eq!(bag.conditions.len(), 1);
        assert_eq!(bag.conditions[0].attribute, "apr");
        assert_eq!(bag.conditions[0].value, 20.0);
    }

    #[test]
    fn test_condition_defaults_to_balance() {
        let bag = extract("cards over $2,000");

        assert_eq!(bag.conditions[0].attribute, "current_balance");
        assert_eq!(bag.conditions[0].operator, Operator::Gt);
    }

    #[test]
    fn test_symbol_comparators() {
        let bag = extract("apr >= 18 and fee <= 95");

        assert_eq!(bag.conditions[0].operator, Operator::Gte);
        assert_eq!(bag.conditions[1].attribute, "annual_fee");
        assert_eq!(bag.conditions[1].operator, Operator::Lte);
    }

    #[test]
    fn test_or_connector() {
        let bag = extract("chase or citi cards");

        assert_eq!(bag.identity_filters.len(), 2);
        assert_eq!(bag.compound_operators.logical_operators, vec![LogicalOperator::Or]);
    }

    #[test]
    fn test_operator_count_is_clauses_minus_one() {
        for text in [
            "cards with balance",
            "chase cards",
            "visa or mastercard with apr under 20 and fee over 0",
            "amex travel cards with balance over 100 or zero balance",
        ] {
            let bag = extract(text);
            let ops = &bag.compound_operators;
            assert_eq!(
                ops.logical_operators.len(),
                ops.clauses.len().saturating_sub(1),
                "text: {}",
                text
            );
        }

        assert!(extract("chase cards").compound_operators.logical_operators.is_empty());
    }

    #[test]
    fn test_network_claims_amex_before_issuer() {
        let bag = extract("amex cards");

        assert_eq!(
            bag.identity_filters,
            vec![IdentityFilter {
                field: "card_network".to_string(),
                value: "american express".to_string(),
            }]
        );
    }

    #[test]
    fn test_distinct_defaults_to_issuer() {
        let bag = extract("what are the different issuers");
        assert_eq!(
            bag.distinct_query,
            Some(DistinctQuery {
                is_distinct: true,
                field: "issuer".to_string(),
            })
        );

        let bag = extract("show me the various cards I have");
        assert_eq!(bag.distinct_query.unwrap().field, "issuer");
    }

    #[test]
    fn test_distinct_field_from_nearby_keyword() {
        assert_eq!(extract("how many different networks").distinct_query.unwrap().field, "card_network");
        assert_eq!(extract("list of card types").distinct_query.unwrap().field, "card_type");
        assert_eq!(extract("distribution of banks").distinct_query.unwrap().field, "issuer");
    }

    #[test]
    fn test_weak_distinct_trigger_needs_field_keyword() {
        assert_eq!(extract("show all the cards with balance").distinct_query, None);
    }

    #[test]
    fn test_distinct_suppresses_count() {
        let bag = extract("how many different issuers do i have");

        assert!(bag.distinct_query.is_some());
        assert_eq!(bag.aggregation, None);
    }

    #[test]
    fn test_grouping() {
        assert_eq!(extract("total balance by issuer").grouping.unwrap().group_by, "issuer");
        assert_eq!(extract("balances grouped by network").grouping.unwrap().group_by, "network");
        assert_eq!(extract("breakdown by card type").grouping.unwrap().group_by, "card type");
        assert_eq!(extract("cards sorted by apr").grouping, None);
    }

    #[test]
    fn test_sort_by_phrase() {
        let bag = extract("show my cards sorted by credit limit");

        assert_eq!(bag.attribute.as_deref(), Some("credit_limit"));
        assert_eq!(bag.modifier, Some(Modifier::Lowest));

        let bag = extract("cards ordered by balance descending");
        assert_eq!(bag.attribute.as_deref(), Some("current_balance"));
        assert_eq!(bag.modifier, Some(Modifier::Highest));
    }

    #[test]
    fn test_aggregations() {
        let total = extract("total balance by issuer").aggregation.unwrap();
        assert_eq!(total.operation, AggregateOperation::Sum);
        assert_eq!(total.field.as_deref(), Some("current_balance"));

        let avg = extract("average apr").aggregation.unwrap();
        assert_eq!(avg.operation, AggregateOperation::Avg);
        assert_eq!(avg.field.as_deref(), Some("apr"));

        let count = extract("how many cards have an annual fee").aggregation.unwrap();
        assert_eq!(count.operation, AggregateOperation::Count);
        assert_eq!(count.field, None);

        let max = extract("what is my maximum credit limit").aggregation.unwrap();
        assert_eq!(max.operation, AggregateOperation::Max);
        assert_eq!(max.field.as_deref(), Some("credit_limit"));
    }

    #[test]
    fn test_extremes_over_records_are_sorting() {
        let bag = extract("which card has the lowest apr");

        assert_eq!(bag.aggregation, None);
        assert_eq!(bag.modifier, Some(Modifier::Lowest));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text = "Chase or Citi cards with APR under 22% and balance over $1,000 by network";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn test_negated_identity_is_not_a_filter() {
        assert!(extract("cards not from chase").identity_filters.is_empty());
        assert!(extract("all cards except amex").identity_filters.is_empty());
        assert!(extract("cards other than the citi ones").identity_filters.is_empty());

        let bag = extract("visa cards excluding chase");
        assert_eq!(
            bag.identity_filters,
            vec![IdentityFilter {
                field: "card_network".to_string(),
                value: "visa".to_string(),
            }]
        );
    }

    #[test]
    fn test_negation_only_reaches_the_next_words() {
        let bag = extract("not the travel ones, chase cards");
        assert_eq!(bag.category, None);
        assert_eq!(bag.identity_filters.len(), 1);

        let bag = extract("travel cards not at costco");
        assert_eq!(bag.category.as_deref(), Some("travel"));
        assert_eq!(bag.merchant, None);
    }

    #[test]
    fn test_long_repetitive_text_stays_linear() {
        let bag = extract(&"apr ".repeat(20_000));
        assert_eq!(bag.attribute.as_deref(), Some("apr"));
        assert!(bag.conditions.is_empty());

        let bag = extract(&"apr over 1 ".repeat(5_000));
        assert_eq!(bag.conditions.len(), 5_000);
        assert!(bag.conditions.iter().all(|c| c.attribute == "apr" && c.operator == Operator::Gt));
        assert_eq!(bag.compound_operators.logical_operators.len(), 4_999);

        let bag = extract(&"chase interest rate ".repeat(10_000));
        assert_eq!(bag.identity_filters.len(), 1);
        assert_eq!(attribute_matches(&normalize(&"interest rate ".repeat(3))).len(), 3);
    }

    #[test]
    fn test_overlapping_attribute_phrases_keep_the_earlier_rule() {
        let matches = attribute_matches("credit limit and annual fee and fee");
        let attributes: Vec<_> = matches.iter().map(|m| m.attribute).collect();

        assert_eq!(attributes, vec!["credit_limit", "annual_fee", "annual_fee"]);
        assert_eq!(matches[1].span, Span::new(17, 27));
    }
}
