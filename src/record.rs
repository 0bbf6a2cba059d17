// 💳 Card Records - the read-only input of every query
// Records are owned by the persistence layer; the pipeline only reads them

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// CARD RECORD
// ============================================================================

/// One credit card in the user's portfolio.
///
/// Every stored attribute except identity bookkeeping is nullable: a manual
/// entry may only carry an issuer and a balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    /// Stable identity assigned by the record store
    #[serde(default = "default_uuid")]
    pub id: String,

    // ========================================================================
    // IDENTITY FIELDS
    // ========================================================================
    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub card_network: Option<String>,

    #[serde(default)]
    pub card_type: Option<String>,

    #[serde(default)]
    pub card_name: Option<String>,

    #[serde(default)]
    pub nickname: Option<String>,

    // ========================================================================
    // FINANCIAL FIELDS
    // ========================================================================
    #[serde(default)]
    pub apr: Option<f64>,

    #[serde(default)]
    pub credit_limit: Option<f64>,

    #[serde(default)]
    pub current_balance: Option<f64>,

    #[serde(default)]
    pub amount_to_pay: Option<f64>,

    #[serde(default)]
    pub annual_fee: Option<f64>,

    // ========================================================================
    // BILLING CYCLE FIELDS
    // ========================================================================
    #[serde(default)]
    pub payment_due_date: Option<NaiveDate>,

    #[serde(default)]
    pub payment_due_day: Option<u32>,

    #[serde(default)]
    pub statement_close_day: Option<u32>,

    #[serde(default)]
    pub statement_cycle_start: Option<NaiveDate>,

    #[serde(default)]
    pub statement_cycle_end: Option<NaiveDate>,

    #[serde(default)]
    pub grace_period_days: Option<u32>,

    // ========================================================================
    // REWARDS & METADATA
    // ========================================================================
    /// Reward category → multiplier (e.g. "dining" → 3.0)
    #[serde(default)]
    pub reward_structure: BTreeMap<String, f64>,

    #[serde(default)]
    pub is_manual_entry: bool,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl CardRecord {
    /// Create a record with only issuer and card name set
    pub fn new(issuer: impl Into<String>, card_name: impl Into<String>) -> Self {
        CardRecord {
            id: default_uuid(),
            issuer: Some(issuer.into()),
            card_network: None,
            card_type: None,
            card_name: Some(card_name.into()),
            nickname: None,
            apr: None,
            credit_limit: None,
            current_balance: None,
            amount_to_pay: None,
            annual_fee: None,
            payment_due_date: None,
            payment_due_day: None,
            statement_close_day: None,
            statement_cycle_start: None,
            statement_cycle_end: None,
            grace_period_days: None,
            reward_structure: BTreeMap::new(),
            is_manual_entry: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Builder: set card network
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.card_network = Some(network.into());
        self
    }

    /// Builder: set card type
    pub fn with_card_type(mut self, card_type: impl Into<String>) -> Self {
        self.card_type = Some(card_type.into());
        self
    }

    /// Builder: set nickname
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Builder: set current balance
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.current_balance = Some(balance);
        self
    }

    /// Builder: set APR (percent)
    pub fn with_apr(mut self, apr: f64) -> Self {
        self.apr = Some(apr);
        self
    }

    /// Builder: set credit limit
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.credit_limit = Some(limit);
        self
    }

    /// Builder: set annual fee
    pub fn with_annual_fee(mut self, fee: f64) -> Self {
        self.annual_fee = Some(fee);
        self
    }

    /// Builder: set amount to pay
    pub fn with_amount_to_pay(mut self, amount: f64) -> Self {
        self.amount_to_pay = Some(amount);
        self
    }

    /// Builder: set payment due date
    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.payment_due_date = Some(due);
        self
    }

    /// Builder: add a reward multiplier
    pub fn with_reward(mut self, category: impl Into<String>, multiplier: f64) -> Self {
        self.reward_structure.insert(category.into(), multiplier);
        self
    }

    // ========================================================================
    // COMPUTED FIELDS (derived at execution time, never stored)
    // ========================================================================

    /// Balance as a percentage of the credit limit
    pub fn utilization(&self) -> Option<f64> {
        match (self.current_balance, self.credit_limit) {
            (Some(balance), Some(limit)) if limit > 0.0 => Some(balance / limit * 100.0),
            _ => None,
        }
    }

    pub fn available_credit(&self) -> Option<f64> {
        match (self.current_balance, self.credit_limit) {
            (Some(balance), Some(limit)) => Some(limit - balance),
            (None, Some(limit)) => Some(limit),
            _ => None,
        }
    }

    /// Best multiplier across all reward categories
    pub fn reward_rate(&self) -> Option<f64> {
        self.reward_structure
            .values()
            .copied()
            .fold(None, |best, rate| match best {
                Some(b) if b >= rate => Some(b),
                _ => Some(rate),
            })
    }

    pub fn reward_categories(&self) -> Vec<String> {
        self.reward_structure.keys().cloned().collect()
    }

    // ========================================================================
    // NAMED ACCESS
    // ========================================================================

    /// Look up a canonical field by name.
    ///
    /// Returns `None` both for unknown names and for fields that are unset on
    /// this record; callers treat the two identically.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let text = |v: &Option<String>| v.clone().map(FieldValue::Text);
        // NaN and infinities read as missing
        let number = |v: Option<f64>| v.filter(|n| n.is_finite()).map(FieldValue::Number);
        let day = |v: Option<u32>| v.map(|d| FieldValue::Number(d as f64));

        match name {
            "issuer" => text(&self.issuer),
            "card_network" => text(&self.card_network),
            "card_type" => text(&self.card_type),
            "card_name" => text(&self.card_name),
            "nickname" => text(&self.nickname),
            "apr" => number(self.apr),
            "credit_limit" => number(self.credit_limit),
            "current_balance" => number(self.current_balance),
            "amount_to_pay" => number(self.amount_to_pay),
            "annual_fee" => number(self.annual_fee),
            "payment_due_date" => self.payment_due_date.map(FieldValue::Date),
            "payment_due_day" => day(self.payment_due_day),
            "statement_close_day" => day(self.statement_close_day),
            "statement_cycle_start" => self.statement_cycle_start.map(FieldValue::Date),
            "statement_cycle_end" => self.statement_cycle_end.map(FieldValue::Date),
            "grace_period_days" => day(self.grace_period_days),
            "is_manual_entry" => Some(FieldValue::Flag(self.is_manual_entry)),
            "created_at" => self.created_at.map(FieldValue::Timestamp),
            "updated_at" => self.updated_at.map(FieldValue::Timestamp),
            "utilization" => number(self.utilization()),
            "available_credit" => number(self.available_credit()),
            "reward_rate" => number(self.reward_rate()),
            "reward_categories" => {
                if self.reward_structure.is_empty() {
                    None
                } else {
                    Some(FieldValue::List(self.reward_categories()))
                }
            }
            _ => None,
        }
    }
}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A single field read from a record, typed for comparison
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Flag(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Display form used for group labels and distinct values
    pub fn display(&self) -> String {
        match self {
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            FieldValue::Text(s) => s.trim().to_string(),
            FieldValue::Flag(b) => b.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Timestamp(t) => t.to_rfc3339(),
            FieldValue::List(items) => items.join(", "),
        }
    }

    /// Case-normalized key used for partitioning and deduplication
    pub fn normalized_key(&self) -> String {
        self.display().to_lowercase()
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load records from a `.json` array or a `.csv` file
pub fn load_records(path: &Path) -> Result<Vec<CardRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported record file extension {:?}: {:?}", other, path),
    }
}

pub fn load_json(path: &Path) -> Result<Vec<CardRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {:?}", path))?;

    serde_json::from_str(&content).context("Failed to parse card records JSON")
}

/// Flat CSV shape of a card record.
///
/// `reward_structure` is written as `dining=3|travel=2`.
#[derive(Debug, Deserialize)]
struct CsvCardRow {
    id: Option<String>,
    issuer: Option<String>,
    card_network: Option<String>,
    card_type: Option<String>,
    card_name: Option<String>,
    nickname: Option<String>,
    apr: Option<f64>,
    credit_limit: Option<f64>,
    current_balance: Option<f64>,
    amount_to_pay: Option<f64>,
    annual_fee: Option<f64>,
    payment_due_date: Option<NaiveDate>,
    payment_due_day: Option<u32>,
    statement_close_day: Option<u32>,
    statement_cycle_start: Option<NaiveDate>,
    statement_cycle_end: Option<NaiveDate>,
    grace_period_days: Option<u32>,
    reward_structure: Option<String>,
    is_manual_entry: Option<bool>,
}

impl CsvCardRow {
    fn into_record(self) -> Result<CardRecord> {
        let reward_structure = match self.reward_structure.as_deref() {
            Some(raw) => parse_reward_structure(raw)?,
            None => BTreeMap::new(),
        };

        Ok(CardRecord {
            id: self.id.filter(|id| !id.is_empty()).unwrap_or_else(default_uuid),
            issuer: self.issuer,
            card_network: self.card_network,
            card_type: self.card_type,
            card_name: self.card_name,
            nickname: self.nickname,
            apr: finite("apr", self.apr)?,
            credit_limit: finite("credit_limit", self.credit_limit)?,
            current_balance: finite("current_balance", self.current_balance)?,
            amount_to_pay: finite("amount_to_pay", self.amount_to_pay)?,
            annual_fee: finite("annual_fee", self.annual_fee)?,
            payment_due_date: self.payment_due_date,
            payment_due_day: self.payment_due_day,
            statement_close_day: self.statement_close_day,
            statement_cycle_start: self.statement_cycle_start,
            statement_cycle_end: self.statement_cycle_end,
            grace_period_days: self.grace_period_days,
            reward_structure,
            is_manual_entry: self.is_manual_entry.unwrap_or(false),
            created_at: None,
            updated_at: None,
        })
    }
}

fn finite(field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(n) if !n.is_finite() => bail!("{} must be a finite number, got {}", field, n),
        other => Ok(other),
    }
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<CardRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut records = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row: CsvCardRow =
            result.with_context(|| format!("Failed to deserialize card record on line {}", line))?;
        let record = row
            .into_record()
            .with_context(|| format!("Invalid card record on line {}", line))?;
        records.push(record);
    }

    Ok(records)
}

fn parse_reward_structure(raw: &str) -> Result<BTreeMap<String, f64>> {
    let mut rewards = BTreeMap::new();

    for entry in raw.split('|').map(str::trim).filter(|e| !e.is_empty()) {
        let (category, multiplier) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Reward entry {:?} is not category=multiplier", entry))?;
        let multiplier: f64 = multiplier
            .trim()
            .parse()
            .with_context(|| format!("Reward multiplier {:?} is not a number", multiplier))?;
        if !multiplier.is_finite() {
            bail!("Reward multiplier for {:?} must be finite", category);
        }
        rewards.insert(category.trim().to_lowercase(), multiplier);
    }

    Ok(rewards)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_computed_fields() {
        let card = CardRecord::new("Chase", "Sapphire Preferred")
            .with_balance(2500.0)
            .with_limit(10000.0)
            .with_reward("dining", 3.0)
            .with_reward("travel", 2.0);

        assert_eq!(card.utilization(), Some(25.0));
        assert_eq!(card.available_credit(), Some(7500.0));
        assert_eq!(card.reward_rate(), Some(3.0));
        assert_eq!(card.reward_categories(), vec!["dining", "travel"]);
    }

    #[test]
    fn test_utilization_requires_positive_limit() {
        let card = CardRecord::new("Citi", "Double Cash")
            .with_balance(100.0)
            .with_limit(0.0);

        assert_eq!(card.utilization(), None);
        assert_eq!(card.field("utilization"), None);
    }

    #[test]
    fn test_named_field_access() {
        let due = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let card = CardRecord::new("Chase", "Freedom")
            .with_network("Visa")
            .with_card_type("Student")
            .with_nickname("everyday")
            .with_apr(21.5)
            .with_amount_to_pay(35.0)
            .with_due_date(due);

        assert_eq!(card.field("issuer"), Some(FieldValue::Text("Chase".to_string())));
        assert_eq!(card.field("card_type"), Some(FieldValue::Text("Student".to_string())));
        assert_eq!(card.field("nickname"), Some(FieldValue::Text("everyday".to_string())));
        assert_eq!(card.field("apr"), Some(FieldValue::Number(21.5)));
        assert_eq!(card.field("amount_to_pay"), Some(FieldValue::Number(35.0)));
        assert_eq!(card.field("payment_due_date"), Some(FieldValue::Date(due)));
        assert_eq!(card.field("current_balance"), None);
        assert_eq!(card.field("not_a_field"), None);
        assert_eq!(card.field("is_manual_entry"), Some(FieldValue::Flag(false)));
    }

    #[test]
    fn test_non_finite_numbers_read_as_missing() {
        let card = CardRecord::new("Chase", "Freedom")
            .with_balance(f64::NAN)
            .with_limit(f64::INFINITY)
            .with_apr(19.0)
            .with_reward("dining", f64::NAN);

        assert_eq!(card.field("current_balance"), None);
        assert_eq!(card.field("credit_limit"), None);
        assert_eq!(card.field("utilization"), None);
        assert_eq!(card.field("available_credit"), None);
        assert_eq!(card.field("apr"), Some(FieldValue::Number(19.0)));
    }

    #[test]
    fn test_load_csv_rejects_non_finite_numbers() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "issuer,card_name,current_balance").unwrap();
        writeln!(file, "Citi,Double Cash,800").unwrap();
        writeln!(file, "Chase,Freedom,NaN").unwrap();

        let message = format!("{:#}", load_records(file.path()).unwrap_err());
        assert!(message.contains("line 3"));
        assert!(message.contains("current_balance"));

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "issuer,reward_structure").unwrap();
        writeln!(file, "Chase,dining=inf").unwrap();
        assert!(load_records(file.path()).is_err());
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Number(1500.0).display(), "1500");
        assert_eq!(FieldValue::Number(19.99).display(), "19.99");
        assert_eq!(FieldValue::Text("  Chase ".to_string()).normalized_key(), "chase");
    }

    #[test]
    fn test_load_json_records() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[
                {{"issuer": "Chase", "card_name": "Freedom", "current_balance": 1200.5,
                  "reward_structure": {{"dining": 3}}, "payment_due_date": "2024-06-15"}},
                {{"issuer": "Amex"}}
            ]"#
        )
        .unwrap();

        let records = load_records(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].current_balance, Some(1200.5));
        assert_eq!(records[0].reward_structure.get("dining"), Some(&3.0));
        assert_eq!(
            records[0].payment_due_date,
            NaiveDate::from_ymd_opt(2024, 6, 15)
        );
        assert!(records[1].card_name.is_none());
        assert!(!records[1].id.is_empty());
    }

    #[test]
    fn test_load_csv_records() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "issuer,card_name,current_balance,apr,reward_structure").unwrap();
        writeln!(file, "Chase,Freedom,1500,24.99,dining=3|travel=2").unwrap();
        writeln!(file, "Citi,Double Cash,,19.24,").unwrap();

        let records = load_records(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].current_balance, Some(1500.0));
        assert_eq!(records[0].reward_structure.len(), 2);
        assert_eq!(records[1].current_balance, None);
        assert_eq!(records[1].apr, Some(19.24));
        assert!(records[1].reward_structure.is_empty());
    }

    #[test]
    fn test_load_csv_rejects_bad_reward_entry() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "issuer,reward_structure").unwrap();
        writeln!(file, "Chase,dining:3").unwrap();

        let err = load_records(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
        assert!(load_records(file.path()).is_err());
    }
}
