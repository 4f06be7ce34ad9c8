use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::RwLock;

use crate::models::{ItemId, Rating, UserId};

/// Outcome of writing a rating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// A newer rating for the same pair was already stored
    Stale,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, UpsertOutcome::Stale)
    }
}

/// Sparse user x item rating matrix.
///
/// One rating per (user, item) pair; writes for the same pair resolve by
/// timestamp so the newest rating wins regardless of arrival order.
#[derive(Debug, Default)]
pub struct RatingStore {
    ratings: RwLock<HashMap<UserId, HashMap<ItemId, Rating>>>,
}

impl RatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, rating: Rating) -> UpsertOutcome {
        let mut ratings = self.ratings.write().await;
        let user_ratings = ratings.entry(rating.user_id.clone()).or_default();

        match user_ratings.get(&rating.item_id) {
            Some(existing) if existing.timestamp > rating.timestamp => {
                tracing::debug!(
                    user_id = %rating.user_id,
                    item_id = %rating.item_id,
                    "Discarding rating older than the stored one"
                );
                UpsertOutcome::Stale
            }
            Some(_) => {
                user_ratings.insert(rating.item_id.clone(), rating);
                UpsertOutcome::Replaced
            }
            None => {
                user_ratings.insert(rating.item_id.clone(), rating);
                UpsertOutcome::Inserted
            }
        }
    }

    /// A user's ratings ordered by item id
    pub async fn user_ratings(&self, user_id: &str) -> Vec<Rating> {
        let ratings = self.ratings.read().await;
        let mut user_ratings: Vec<Rating> = ratings
            .get(user_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default();
        user_ratings.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        user_ratings
    }

    pub async fn rated_items(&self, user_id: &str) -> BTreeSet<ItemId> {
        let ratings = self.ratings.read().await;
        ratings
            .get(user_id)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Private copy of every rating, for batch training
    pub async fn snapshot(&self) -> Vec<Rating> {
        let ratings = self.ratings.read().await;
        ratings
            .values()
            .flat_map(|items| items.values().cloned())
            .collect()
    }

    /// Number of ratings per item, used as item popularity
    pub async fn rating_counts(&self) -> BTreeMap<ItemId, usize> {
        let ratings = self.ratings.read().await;
        let mut counts = BTreeMap::new();
        for item_id in ratings.values().flat_map(|items| items.keys()) {
            *counts.entry(item_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.ratings.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn rating(user: &str, item: &str, score: u8, age_secs: i64) -> Rating {
        Rating {
            user_id: user.to_string(),
            item_id: item.to_string(),
            score,
            timestamp: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_rerating_overwrites_instead_of_duplicating() {
        let store = RatingStore::new();
        assert_eq!(store.upsert(rating("u1", "b1", 2, 10)).await, UpsertOutcome::Inserted);
        assert_eq!(store.upsert(rating("u1", "b1", 5, 0)).await, UpsertOutcome::Replaced);

        let ratings = store.user_ratings("u1").await;
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].score, 5);
    }

    #[tokio::test]
    async fn test_older_write_loses_to_stored_rating() {
        let store = RatingStore::new();
        store.upsert(rating("u1", "b1", 4, 0)).await;
        let outcome = store.upsert(rating("u1", "b1", 1, 60)).await;

        assert_eq!(outcome, UpsertOutcome::Stale);
        assert_eq!(store.user_ratings("u1").await[0].score, 4);
    }

    #[tokio::test]
    async fn test_rating_counts_per_item() {
        let store = RatingStore::new();
        store.upsert(rating("u1", "b1", 5, 0)).await;
        store.upsert(rating("u2", "b1", 3, 0)).await;
        store.upsert(rating("u2", "b2", 3, 0)).await;

        let counts = store.rating_counts().await;
        assert_eq!(counts.get("b1"), Some(&2));
        assert_eq!(counts.get("b2"), Some(&1));
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_for_different_users() {
        let store = Arc::new(RatingStore::new());
        let mut tasks = Vec::new();

        for user in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for item in 0..10 {
                    store
                        .upsert(rating(&format!("u{}", user), &format!("b{}", item), 3, 0))
                        .await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.len().await, 160);
        assert_eq!(store.rated_items("u7").await.len(), 10);
    }
}
