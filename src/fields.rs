// 🗺️ Field Mapper - natural-language alias → canonical schema field
// Aliases are data: one definition per canonical field, each listing the words people use for it

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

// ============================================================================
// FIELD TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Timestamp,
    Boolean,
    List,
}

/// Logical group a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldGroup {
    Identity,
    Financial,
    Date,
    /// Not stored; derived from other fields at execution time
    Computed,
    Metadata,
}

// ============================================================================
// FIELD DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Canonical schema name (e.g. "current_balance")
    pub name: String,

    pub field_type: FieldType,

    pub group: FieldGroup,

    pub description: String,

    /// Natural-language names that resolve to this field
    pub aliases: Vec<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, group: FieldGroup) -> Self {
        FieldDefinition {
            name: name.into(),
            field_type,
            group,
            description: String::new(),
            aliases: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add aliases
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases.extend(aliases.iter().map(|a| a.to_string()));
        self
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.field_type, FieldType::Number | FieldType::Boolean)
    }
}

// ============================================================================
// FIELD MAPPER
// ============================================================================

/// Dataset names the card schema answers to
pub const CARD_DATASETS: &[&str] = &["credit_cards", "cards", "user_credit_cards"];

static STANDARD: LazyLock<FieldMapper> = LazyLock::new(FieldMapper::new);

/// Immutable alias table for the card schema.
///
/// Every canonical name resolves to itself, and its underscore-free spelling
/// ("current balance") resolves as well.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    fields: Vec<FieldDefinition>,
    aliases: HashMap<String, usize>,
}

impl FieldMapper {
    /// Build the mapper with every card field registered
    pub fn new() -> Self {
        let mut mapper = FieldMapper {
            fields: Vec::new(),
            aliases: HashMap::new(),
        };

        mapper.register_card_fields();
        mapper
    }

    /// Process-wide instance, built on first use
    pub fn standard() -> &'static FieldMapper {
        &STANDARD
    }

    fn register_card_fields(&mut self) {
        use FieldGroup::{Computed, Financial, Identity, Metadata};
        use FieldType::{Boolean, List, Number, Text, Timestamp};

        // ====================================================================
        // IDENTITY
        // ====================================================================

        self.register(
            FieldDefinition::new("issuer", Text, Identity)
                .with_description("Bank that issued the card")
                .with_aliases(&["issuers", "bank", "banks", "issuing bank", "provider", "providers"]),
        );
        self.register(
            FieldDefinition::new("card_network", Text, Identity)
                .with_description("Payment network (Visa, Mastercard, ...)")
                .with_aliases(&["network", "networks", "card network", "payment network", "brand", "brands"]),
        );
        self.register(
            FieldDefinition::new("card_type", Text, Identity)
                .with_description("Product type (personal, business, secured, ...)")
                .with_aliases(&["type", "types", "card type", "card types", "kind", "kinds"]),
        );
        self.register(
            FieldDefinition::new("card_name", Text, Identity)
                .with_description("Product name")
                .with_aliases(&["name", "names", "card name", "product"]),
        );
        self.register(
            FieldDefinition::new("nickname", Text, Identity)
                .with_description("User-chosen label")
                .with_aliases(&["nick name", "nicknames", "label"]),
        );

        // ====================================================================
        // FINANCIAL
        // ====================================================================

        self.register(
            FieldDefinition::new("current_balance", Number, Financial)
                .with_description("Outstanding balance")
                .with_aliases(&["balance", "balances", "debt", "owe", "owed", "outstanding"]),
        );
        self.register(
            FieldDefinition::new("apr", Number, Financial)
                .with_description("Annual percentage rate, in percent")
                .with_aliases(&["interest", "interest rate", "annual percentage rate", "rate of interest"]),
        );
        self.register(
            FieldDefinition::new("credit_limit", Number, Financial)
                .with_description("Total credit line")
                .with_aliases(&["limit", "limits", "credit line", "spending limit"]),
        );
        self.register(
            FieldDefinition::new("annual_fee", Number, Financial)
                .with_description("Yearly card fee")
                .with_aliases(&["fee", "fees", "annual fees"]),
        );
        self.register(
            FieldDefinition::new("amount_to_pay", Number, Financial)
                .with_description("Amount due this cycle")
                .with_aliases(&["amount due", "payment", "payments", "minimum payment", "payment amount"]),
        );

        // ====================================================================
        // DATES
        // ====================================================================

        self.register(
            FieldDefinition::new("payment_due_date", FieldType::Date, FieldGroup::Date)
                .with_description("Next payment due date")
                .with_aliases(&["due date", "due", "payment due", "payment due date"]),
        );
        self.register(
            FieldDefinition::new("payment_due_day", Number, FieldGroup::Date)
                .with_description("Day of month the payment is due")
                .with_aliases(&["due day", "payment day"]),
        );
        self.register(
            FieldDefinition::new("statement_close_day", Number, FieldGroup::Date)
                .with_description("Day of month the statement closes")
                .with_aliases(&["statement close", "statement closing", "closing date", "close day", "statement date"]),
        );
        self.register(
            FieldDefinition::new("statement_cycle_start", FieldType::Date, FieldGroup::Date)
                .with_aliases(&["cycle start", "statement start"]),
        );
        self.register(
            FieldDefinition::new("statement_cycle_end", FieldType::Date, FieldGroup::Date)
                .with_aliases(&["cycle end", "statement end"]),
        );
        self.register(
            FieldDefinition::new("grace_period_days", Number, FieldGroup::Date)
                .with_description("Days between statement close and payment due")
                .with_aliases(&["grace period", "grace", "grace days"]),
        );

        // ====================================================================
        // COMPUTED
        // ====================================================================

        self.register(
            FieldDefinition::new("utilization", Number, Computed)
                .with_description("current_balance / credit_limit, in percent")
                .with_aliases(&["utilisation", "credit utilization", "usage"]),
        );
        self.register(
            FieldDefinition::new("available_credit", Number, Computed)
                .with_description("credit_limit - current_balance")
                .with_aliases(&["available", "remaining credit", "headroom"]),
        );
        self.register(
            FieldDefinition::new("reward_rate", Number, Computed)
                .with_description("Best multiplier in the reward structure")
                .with_aliases(&["rewards", "reward", "cash back", "cashback", "points", "rate", "multiplier"]),
        );
        self.register(
            FieldDefinition::new("reward_categories", List, Computed)
                .with_description("Categories the card earns bonus rewards in")
                .with_aliases(&["reward category", "category", "categories"]),
        );

        // ====================================================================
        // METADATA
        // ====================================================================

        self.register(
            FieldDefinition::new("is_manual_entry", Boolean, Metadata)
                .with_aliases(&["manual", "manual entry"]),
        );
        self.register(
            FieldDefinition::new("created_at", Timestamp, Metadata)
                .with_aliases(&["created", "added"]),
        );
        self.register(
            FieldDefinition::new("updated_at", Timestamp, Metadata)
                .with_aliases(&["updated", "last updated"]),
        );
    }

    /// Register a field; later registrations win on alias collisions
    pub fn register(&mut self, field: FieldDefinition) {
        let index = self.fields.len();

        let mut keys = vec![field.name.clone(), field.name.replace('_', " ")];
        keys.extend(field.aliases.iter().cloned());
        for key in keys {
            self.aliases.insert(normalize_alias(&key), index);
        }

        self.fields.push(field);
    }

    /// Resolve an alias to its canonical field name
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.definition_for(alias).map(|def| def.name.as_str())
    }

    /// Resolve an alias to its full definition
    pub fn definition_for(&self, alias: &str) -> Option<&FieldDefinition> {
        self.aliases
            .get(&normalize_alias(alias))
            .map(|&index| &self.fields[index])
    }

    /// Get a definition by canonical name only
    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_canonical(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn supports_dataset(&self, dataset: &str) -> bool {
        let dataset = normalize_alias(dataset).replace(' ', "_");
        CARD_DATASETS.contains(&dataset.as_str())
    }

    pub fn list_all(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn fields_in(&self, group: FieldGroup) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.group == group).collect()
    }

    pub fn count(&self) -> usize {
        self.fields.len()
    }
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_alias(alias: &str) -> String {
    alias
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================
