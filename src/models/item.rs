use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ItemId;

/// Text metadata for one catalog item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemMetadata {
    pub item_id: ItemId,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// When the item entered the catalog; newer items win score ties
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

impl ItemMetadata {
    /// Title, author, genre and description joined by single spaces
    pub fn combined_text(&self) -> String {
        [
            Some(self.title.as_str()),
            self.author.as_deref(),
            self.genre.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|field| !field.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// What the scorer needs to know about an item outside of any signal source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub item_id: ItemId,
    pub genre: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub rating_count: usize,
}

/// Every known item: those with metadata plus those that only appear in ratings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: BTreeMap<ItemId, CatalogEntry>,
}

impl Catalog {
    /// Builds the catalog from item metadata and per-item rating counts
    pub fn build<'a>(
        items: impl IntoIterator<Item = &'a ItemMetadata>,
        rating_counts: &BTreeMap<ItemId, usize>,
    ) -> Self {
        let mut entries: BTreeMap<ItemId, CatalogEntry> = items
            .into_iter()
            .map(|item| {
                (
                    item.item_id.clone(),
                    CatalogEntry {
                        item_id: item.item_id.clone(),
                        genre: item.genre.clone(),
                        added_at: item.added_at,
                        rating_count: 0,
                    },
                )
            })
            .collect();

        for (item_id, count) in rating_counts {
            entries
                .entry(item_id.clone())
                .or_insert_with(|| CatalogEntry {
                    item_id: item_id.clone(),
                    genre: None,
                    added_at: None,
                    rating_count: 0,
                })
                .rating_count = *count;
        }

        Self { entries }
    }

    pub fn get(&self, item_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(item_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_at(&self, item_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(item_id).and_then(|entry| entry.added_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, genre: Option<&str>) -> ItemMetadata {
        ItemMetadata {
            item_id: id.to_string(),
            title: format!("Title {}", id),
            author: None,
            genre: genre.map(str::to_string),
            description: None,
            added_at: None,
        }
    }

    #[test]
    fn test_combined_text_skips_missing_fields() {
        let mut meta = item("b1", Some("Horror"));
        meta.description = Some("   ".to_string());
        assert_eq!(meta.combined_text(), "Title b1 Horror");
    }

    #[test]
    fn test_catalog_includes_rated_items_without_metadata() {
        let items = vec![item("b1", Some("Horror"))];
        let counts = BTreeMap::from([("b1".to_string(), 2), ("b9".to_string(), 5)]);

        let catalog = Catalog::build(&items, &counts);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("b1").unwrap().rating_count, 2);
        assert_eq!(catalog.get("b9").unwrap().genre, None);
        assert_eq!(catalog.get("b9").unwrap().rating_count, 5);
    }
}
