// 📚 Vocabulary - keyword tables as data
// Built once at startup (defaults or a JSON file) and shared read-only by every query

use crate::amount::AmountOptions;
use crate::text::{find_all_phrases, normalize, Span};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// TABLE ENTRIES
// ============================================================================

/// A canonical value and the phrases that name it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub value: String,
    pub keywords: Vec<String>,
}

impl KeywordEntry {
    pub fn new(value: &str, keywords: &[&str]) -> Self {
        KeywordEntry {
            value: value.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Merchant category code → spending category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MccEntry {
    pub code: u16,
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl MccEntry {
    fn new(code: u16, category: &str, description: &str) -> Self {
        MccEntry {
            code,
            category: category.to_string(),
            description: description.to_string(),
        }
    }
}

/// One keyword found in a text
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub value: String,
    pub span: Span,
}

// ============================================================================
// VOCABULARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub categories: Vec<KeywordEntry>,
    pub merchants: Vec<KeywordEntry>,
    pub networks: Vec<KeywordEntry>,
    pub issuers: Vec<KeywordEntry>,
    pub card_types: Vec<KeywordEntry>,
    pub mcc_codes: Vec<MccEntry>,
    pub amount: AmountOptions,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary {
            categories: default_categories(),
            merchants: default_merchants(),
            networks: default_networks(),
            issuers: default_issuers(),
            card_types: default_card_types(),
            mcc_codes: default_mcc_codes(),
            amount: AmountOptions::default(),
        }
    }
}

impl Vocabulary {
    /// Load from a JSON file; tables missing from the file keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read vocabulary file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let vocabulary: Vocabulary =
            serde_json::from_str(content).context("Failed to parse vocabulary JSON")?;

        Ok(vocabulary.normalized())
    }

    /// Keywords are matched against normalized text, so store them normalized
    fn normalized(mut self) -> Self {
        for table in [
            &mut self.categories,
            &mut self.merchants,
            &mut self.networks,
            &mut self.issuers,
            &mut self.card_types,
        ] {
            for entry in table.iter_mut() {
                entry.keywords = entry.keywords.iter().map(|k| normalize(k)).collect();
            }
        }
        self
    }

    pub fn category_for_mcc(&self, code: u16) -> Option<&str> {
        self.mcc_codes
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.category.as_str())
    }

    pub fn category_hits(&self, text: &str) -> Vec<KeywordHit> {
        table_hits(&self.categories, text)
    }

    pub fn merchant_hits(&self, text: &str) -> Vec<KeywordHit> {
        table_hits(&self.merchants, text)
    }

    pub fn network_hits(&self, text: &str) -> Vec<KeywordHit> {
        table_hits(&self.networks, text)
    }

    pub fn issuer_hits(&self, text: &str) -> Vec<KeywordHit> {
        table_hits(&self.issuers, text)
    }

    pub fn card_type_hits(&self, text: &str) -> Vec<KeywordHit> {
        table_hits(&self.card_types, text)
    }
}

/// All keyword hits of a table in text order.
///
/// Overlapping hits keep the longer phrase ("capital one" beats "one").
fn table_hits(table: &[KeywordEntry], text: &str) -> Vec<KeywordHit> {
    let mut hits: Vec<KeywordHit> = table
        .iter()
        .flat_map(|entry| {
            entry.keywords.iter().flat_map(move |keyword| {
                find_all_phrases(text, keyword)
                    .into_iter()
                    .map(move |span| KeywordHit {
                        value: entry.value.clone(),
                        span,
                    })
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then_with(|| b.span.len().cmp(&a.span.len()))
    });

    // Kept hits are disjoint and sorted, so only the last one can reach the next hit
    let mut kept: Vec<KeywordHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        if kept.last().map_or(true, |last| last.span.end <= hit.span.start) {
            kept.push(hit);
        }
    }
    kept
}

// ============================================================================
// DEFAULT TABLES
// ============================================================================

fn default_categories() -> Vec<KeywordEntry> {
    vec![
        KeywordEntry::new("dining", &["dining", "restaurant", "restaurants", "food", "eating out", "takeout"]),
        KeywordEntry::new("groceries", &["grocery", "groceries", "supermarket", "supermarkets", "warehouse club", "warehouse clubs", "wholesale"]),
        KeywordEntry::new("travel", &["travel", "flight", "flights", "airline", "airlines", "hotel", "hotels"]),
        KeywordEntry::new("gas", &["gas", "fuel", "gas station", "gas stations"]),
        KeywordEntry::new("transit", &["transit", "commute", "commuting", "rideshare", "uber", "lyft", "train"]),
        KeywordEntry::new("online_shopping", &["online shopping", "online", "e-commerce"]),
        KeywordEntry::new("entertainment", &["entertainment", "streaming", "movies", "concerts"]),
        KeywordEntry::new("drugstores", &["drugstore", "drugstores", "pharmacy"]),
    ]
}

fn default_merchants() -> Vec<KeywordEntry> {
    vec![
        KeywordEntry::new("costco", &["costco"]),
        KeywordEntry::new("amazon", &["amazon"]),
        KeywordEntry::new("walmart", &["walmart"]),
        KeywordEntry::new("target", &["target"]),
        KeywordEntry::new("whole foods", &["whole foods"]),
        KeywordEntry::new("starbucks", &["starbucks"]),
        KeywordEntry::new("uber", &["uber"]),
        KeywordEntry::new("delta", &["delta"]),
        KeywordEntry::new("united", &["united airlines", "united"]),
        KeywordEntry::new("marriott", &["marriott"]),
        KeywordEntry::new("hilton", &["hilton"]),
        KeywordEntry::new("shell", &["shell"]),
        KeywordEntry::new("best buy", &["best buy"]),
    ]
}

fn default_networks() -> Vec<KeywordEntry> {
    vec![
        KeywordEntry::new("visa", &["visa"]),
        KeywordEntry::new("mastercard", &["mastercard", "master card"]),
        KeywordEntry::new("american express", &["american express", "amex"]),
        KeywordEntry::new("discover", &["discover"]),
    ]
}

fn default_issuers() -> Vec<KeywordEntry> {
    vec![
        KeywordEntry::new("chase", &["chase", "jpmorgan"]),
        KeywordEntry::new("citi", &["citi", "citibank"]),
        KeywordEntry::new("capital one", &["capital one", "capitalone"]),
        KeywordEntry::new("bank of america", &["bank of america", "bofa"]),
        KeywordEntry::new("wells fargo", &["wells fargo"]),
        KeywordEntry::new("us bank", &["us bank", "u.s. bank"]),
        KeywordEntry::new("barclays", &["barclays"]),
        KeywordEntry::new("synchrony", &["synchrony"]),
        KeywordEntry::new("goldman sachs", &["goldman sachs", "goldman"]),
        KeywordEntry::new("american express", &["american express", "amex"]),
        KeywordEntry::new("discover", &["discover"]),
    ]
}

fn default_card_types() -> Vec<KeywordEntry> {
    vec![
        KeywordEntry::new("business", &["business"]),
        KeywordEntry::new("personal", &["personal"]),
        KeywordEntry::new("student", &["student"]),
        KeywordEntry::new("secured", &["secured"]),
    ]
}

fn default_mcc_codes() -> Vec<MccEntry> {
    vec![
        MccEntry::new(5411, "groceries", "Grocery stores, supermarkets"),
        // Wholesale clubs overlap groceries and general merchandise; fixed to groceries
        MccEntry::new(5300, "groceries", "Wholesale clubs"),
        MccEntry::new(5812, "dining", "Eating places, restaurants"),
        MccEntry::new(5813, "dining", "Bars, taverns, nightclubs"),
        MccEntry::new(5814, "dining", "Fast food restaurants"),
        MccEntry::new(5541, "gas", "Service stations"),
        MccEntry::new(5542, "gas", "Automated fuel dispensers"),
        MccEntry::new(4111, "transit", "Commuter transport"),
        MccEntry::new(4121, "transit", "Taxicabs, limousines"),
        MccEntry::new(4511, "travel", "Airlines"),
        MccEntry::new(7011, "travel", "Hotels, motels, resorts"),
        MccEntry::new(5912, "drugstores", "Drug stores, pharmacies"),
        MccEntry::new(7832, "entertainment", "Motion picture theaters"),
        MccEntry::new(5942, "online_shopping", "Book stores"),
    ]
}

// ============================================================================
// TESTS
// ============================================================================
