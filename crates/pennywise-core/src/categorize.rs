//! Merchant keyword categorization
//!
//! Case-insensitive substring match against the merchant, then the remarks.
//! The first category in table order with a matching keyword wins. Config
//! entries extend the built-in table; a config category that already exists
//! gets the extra keywords appended.

use std::collections::BTreeMap;

use crate::models::UNCATEGORIZED;

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    (
        "grocery",
        &[
            "grocery", "supermarket", "food", "restaurant", "cafe", "swiggy", "zomato", "blinkit",
            "bigbasket",
        ],
    ),
    (
        "transport",
        &["uber", "ola", "metro", "bus", "train", "fuel", "petrol", "diesel"],
    ),
    (
        "shopping",
        &["amazon", "flipkart", "myntra", "shopping", "mall", "store"],
    ),
    (
        "entertainment",
        &["netflix", "prime", "hotstar", "movie", "cinema", "theatre"],
    ),
    (
        "utilities",
        &["electricity", "water", "gas", "internet", "mobile", "airtel", "jio"],
    ),
    (
        "healthcare",
        &["hospital", "clinic", "pharmacy", "medical", "doctor"],
    ),
    (
        "education",
        &["school", "college", "university", "course", "training"],
    ),
    ("travel", &["hotel", "flight", "booking", "travel", "tourism"]),
];

/// Ordered category → keywords table
#[derive(Debug, Clone)]
pub struct CategoryTable {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_TABLE
                .iter()
                .map(|(category, keywords)| {
                    (
                        category.to_string(),
                        keywords.iter().map(|k| k.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl CategoryTable {
    /// Built-in table extended with configured categories
    pub fn with_extra(extra: &BTreeMap<String, Vec<String>>) -> Self {
        let mut table = Self::default();
        for (category, keywords) in extra {
            let category = category.trim().to_lowercase();
            let keywords = keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty());

            match table.entries.iter_mut().find(|(name, _)| *name == category) {
                Some((_, existing)) => existing.extend(keywords),
                None => table.entries.push((category, keywords.collect())),
            }
        }
        table
    }

    /// Category for a merchant, or None when nothing matches
    pub fn lookup(&self, merchant: Option<&str>, remarks: Option<&str>) -> Option<&str> {
        [merchant, remarks]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .find_map(|text| {
                self.entries
                    .iter()
                    .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k.as_str())))
                    .map(|(category, _)| category.as_str())
            })
    }

    /// Like [`lookup`](Self::lookup) but falls back to "uncategorized"
    pub fn categorize(&self, merchant: Option<&str>, remarks: Option<&str>) -> String {
        self.lookup(merchant, remarks)
            .unwrap_or(UNCATEGORIZED)
            .to_string()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}
