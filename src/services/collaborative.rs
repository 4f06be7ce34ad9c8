use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, SVD};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::{
    db::RatingStore,
    error::{AppError, AppResult},
    models::{CollabScore, ItemId, Rating, UserId},
};

/// Result of asking the collaborative model about one user
#[derive(Debug, Clone, PartialEq)]
pub enum CollabOutcome {
    /// The user had no ratings when the model was trained
    ColdStart,
    Scored(Vec<CollabScore>),
}

/// Rank-k factorization of the user x item rating matrix.
///
/// All matrices are dense `nalgebra` buffers indexed by (row, col); unrated
/// cells of `ratings` hold 0. Only the user side of the factorization is
/// kept, since predictions aggregate neighbor ratings directly.
#[derive(Debug, Clone)]
pub struct LatentModel {
    users: Vec<UserId>,
    user_index: HashMap<UserId, usize>,
    items: Vec<ItemId>,
    ratings: DMatrix<f64>,
    user_factors: DMatrix<f64>,
    trained_at: DateTime<Utc>,
}

impl LatentModel {
    /// Factorizes the rating matrix with a truncated SVD.
    ///
    /// User factors are `U_k * S_k`. The effective rank is capped by the
    /// matrix dimensions.
    pub fn fit(ratings: &[Rating], rank: usize) -> AppResult<Self> {
        if ratings.is_empty() {
            return Err(AppError::ModelNotTrained);
        }

        let users: Vec<UserId> = ratings
            .iter()
            .map(|r| r.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let items: Vec<ItemId> = ratings
            .iter()
            .map(|r| r.item_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let user_index: HashMap<UserId, usize> = users
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let item_index: HashMap<&str, usize> = items
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut matrix = DMatrix::<f64>::zeros(users.len(), items.len());
        for rating in ratings {
            let row = user_index[&rating.user_id];
            let col = item_index[rating.item_id.as_str()];
            matrix[(row, col)] = f64::from(rating.score);
        }

        let svd = SVD::try_new(matrix.clone(), true, false, f64::EPSILON, 0)
            .ok_or_else(|| AppError::Internal("SVD did not converge".to_string()))?;
        let u = svd
            .u
            .ok_or_else(|| AppError::Internal("SVD failed to compute U".to_string()))?;
        let sigma = svd.singular_values;

        let mut order: Vec<usize> = (0..sigma.len()).collect();
        order.sort_by(|&a, &b| sigma[b].total_cmp(&sigma[a]).then(a.cmp(&b)));
        order.truncate(rank.max(1).min(sigma.len()));
        let k = order.len();

        let user_factors =
            DMatrix::from_fn(users.len(), k, |row, c| u[(row, order[c])] * sigma[order[c]]);

        Ok(Self {
            users,
            user_index,
            items,
            ratings: matrix,
            user_factors,
            trained_at: Utc::now(),
        })
    }

    pub fn rank(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    fn user_cosine(&self, a: usize, b: usize) -> f64 {
        let row_a = self.user_factors.row(a);
        let row_b = self.user_factors.row(b);
        let norms = row_a.norm() * row_b.norm();
        if norms == 0.0 {
            return 0.0;
        }
        row_a.dot(&row_b) / norms
    }

    /// The `k` users nearest to row `idx` in factor space, self excluded
    fn neighbors(&self, idx: usize, k: usize) -> Vec<(usize, f64)> {
        let mut sims: Vec<(usize, f64)> = (0..self.users.len())
            .filter(|&other| other != idx)
            .map(|other| (other, self.user_cosine(idx, other)))
            .collect();
        sims.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        sims.truncate(k);
        sims
    }

    /// Predicts ratings for the user's unrated items from its `neighbor_count`
    /// nearest neighbors and returns the best `n`.
    ///
    /// Neighbors that did not rate an item add nothing to either side of the
    /// weighted average; items no neighbor rated are left out entirely.
    pub fn recommend(
        &self,
        user_id: &str,
        n: usize,
        neighbor_count: usize,
        exclude: &BTreeSet<ItemId>,
    ) -> CollabOutcome {
        let Some(&idx) = self.user_index.get(user_id) else {
            return CollabOutcome::ColdStart;
        };

        let neighbors = self.neighbors(idx, neighbor_count);
        let mut scores = Vec::new();

        for (col, item_id) in self.items.iter().enumerate() {
            if self.ratings[(idx, col)] > 0.0 || exclude.contains(item_id) {
                continue;
            }

            let mut weighted_sum = 0.0;
            let mut similarity_sum = 0.0;
            for &(neighbor, similarity) in &neighbors {
                let rating = self.ratings[(neighbor, col)];
                if rating > 0.0 {
                    weighted_sum += similarity * rating;
                    similarity_sum += similarity.abs();
                }
            }

            if similarity_sum > 0.0 {
                scores.push(CollabScore {
                    item_id: item_id.clone(),
                    predicted_rating: weighted_sum / similarity_sum,
                });
            }
        }

        scores.sort_by(|a, b| {
            b.predicted_rating
                .total_cmp(&a.predicted_rating)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        scores.truncate(n);

        CollabOutcome::Scored(scores)
    }
}

/// Collaborative filter over the shared rating store.
///
/// Training works on a snapshot of the store and publishes the finished model
/// by swapping an `Arc`, so readers see either the previous model or the new
/// one in full.
pub struct CollaborativeFilter {
    store: Arc<RatingStore>,
    rank: usize,
    neighbor_count: usize,
    model: RwLock<Option<Arc<LatentModel>>>,
}

impl CollaborativeFilter {
    pub fn new(store: Arc<RatingStore>, rank: usize, neighbor_count: usize) -> Self {
        Self {
            store,
            rank,
            neighbor_count,
            model: RwLock::new(None),
        }
    }

    pub async fn train(&self) -> AppResult<Arc<LatentModel>> {
        let snapshot = self.store.snapshot().await;
        if snapshot.is_empty() {
            tracing::warn!("Collaborative training skipped: no ratings");
            return Err(AppError::ModelNotTrained);
        }

        let start = Instant::now();
        let rank = self.rank;
        let model = tokio::task::spawn_blocking(move || LatentModel::fit(&snapshot, rank))
            .await
            .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;
        let model = Arc::new(model);

        *self.model.write().await = Some(model.clone());

        tracing::info!(
            users = model.user_count(),
            items = model.item_count(),
            rank = model.rank(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Collaborative model trained"
        );

        Ok(model)
    }

    /// The currently published model
    pub async fn model(&self) -> Option<Arc<LatentModel>> {
        self.model.read().await.clone()
    }

    pub async fn get_user_recommendations(
        &self,
        user_id: &str,
        n: usize,
    ) -> AppResult<CollabOutcome> {
        let model = self.model().await.ok_or(AppError::ModelNotTrained)?;
        // Ratings written since training still count as "already rated"
        let rated = self.store.rated_items(user_id).await;
        let user_id = user_id.to_string();
        let neighbor_count = self.neighbor_count;

        tokio::task::spawn_blocking(move || model.recommend(&user_id, n, neighbor_count, &rated))
            .await
            .map_err(|e| AppError::Internal(format!("Collaborative scoring task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(user: &str, item: &str, score: u8) -> Rating {
        Rating {
            user_id: user.to_string(),
            item_id: item.to_string(),
            score,
            timestamp: Utc::now(),
        }
    }

    async fn store_with(ratings: &[(&str, &str, u8)]) -> Arc<RatingStore> {
        let store = Arc::new(RatingStore::new());
        for (user, item, score) in ratings {
            store.upsert(rating(user, item, *score)).await;
        }
        store
    }

    fn scored(outcome: CollabOutcome) -> Vec<CollabScore> {
        match outcome {
            CollabOutcome::Scored(scores) => scores,
            CollabOutcome::ColdStart => panic!("expected scores, got cold start"),
        }
    }

    #[tokio::test]
    async fn test_train_on_empty_store_fails() {
        let filter = CollaborativeFilter::new(Arc::new(RatingStore::new()), 10, 50);
        assert!(matches!(filter.train().await, Err(AppError::ModelNotTrained)));
    }

    #[tokio::test]
    async fn test_recommendations_before_training_fail() {
        let store = store_with(&[("u1", "b1", 5)]).await;
        let filter = CollaborativeFilter::new(store, 10, 50);
        assert!(matches!(
            filter.get_user_recommendations("u1", 10).await,
            Err(AppError::ModelNotTrained)
        ));
    }

    #[tokio::test]
    async fn test_similar_user_drives_recommendation() {
        let store = store_with(&[
            ("u1", "b1", 5),
            ("u1", "b2", 4),
            ("u1", "b3", 1),
            ("u2", "b1", 5),
            ("u2", "b2", 5),
            ("u2", "b4", 4),
        ])
        .await;
        let filter = CollaborativeFilter::new(store, 10, 50);
        filter.train().await.unwrap();

        let recs = scored(filter.get_user_recommendations("u1", 10).await.unwrap());

        assert_eq!(recs[0].item_id, "b4");
        assert!((recs[0].predicted_rating - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_never_recommends_rated_items() {
        let mut ratings = Vec::new();
        let users = ["u1", "u2", "u3", "u4", "u5"];
        let items = ["b1", "b2", "b3", "b4", "b5", "b6", "b7"];
        for (ui, user) in users.iter().enumerate() {
            for (ii, item) in items.iter().enumerate() {
                if (ui + ii) % 3 != 0 {
                    ratings.push((*user, *item, ((ui * 7 + ii * 3) % 5 + 1) as u8));
                }
            }
        }
        let store = store_with(&ratings).await;
        let filter = CollaborativeFilter::new(store.clone(), 3, 50);
        filter.train().await.unwrap();

        for user in users {
            let rated = store.rated_items(user).await;
            let recs = scored(filter.get_user_recommendations(user, 20).await.unwrap());
            assert!(recs.iter().all(|r| !rated.contains(&r.item_id)));
        }
    }

    #[tokio::test]
    async fn test_rating_after_training_is_excluded() {
        let store = store_with(&[("u1", "b1", 5), ("u2", "b1", 5), ("u2", "b2", 4)]).await;
        let filter = CollaborativeFilter::new(store.clone(), 5, 50);
        filter.train().await.unwrap();

        store.upsert(rating("u1", "b2", 3)).await;

        let recs = scored(filter.get_user_recommendations("u1", 10).await.unwrap());
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_is_cold_start() {
        let store = store_with(&[("u1", "b1", 5), ("u2", "b2", 3)]).await;
        let filter = CollaborativeFilter::new(store, 5, 50);
        filter.train().await.unwrap();

        assert_eq!(
            filter.get_user_recommendations("stranger", 10).await.unwrap(),
            CollabOutcome::ColdStart
        );
    }

    #[test]
    fn test_items_without_neighbor_coverage_are_excluded() {
        // u3 shares nothing with u1 and is the only rater of b9; with K = 1 only u2 counts
        let ratings = vec![
            rating("u1", "b1", 5),
            rating("u2", "b1", 5),
            rating("u2", "b2", 3),
            rating("u3", "b9", 5),
        ];
        let model = LatentModel::fit(&ratings, 3).unwrap();

        let recs = scored(model.recommend("u1", 10, 1, &BTreeSet::new()));
        let ids: Vec<&str> = recs.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["b2"]);
    }

    #[test]
    fn test_ties_break_by_lower_item_id() {
        let ratings = vec![
            rating("u1", "b1", 5),
            rating("u2", "b1", 5),
            rating("u2", "b3", 4),
            rating("u2", "b2", 4),
        ];
        let model = LatentModel::fit(&ratings, 2).unwrap();

        let recs = scored(model.recommend("u1", 10, 50, &BTreeSet::new()));
        let ids: Vec<&str> = recs.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b3"]);
    }

    #[test]
    fn test_rank_is_capped_by_matrix_size() {
        let ratings = vec![rating("u1", "b1", 5), rating("u2", "b2", 3)];
        let model = LatentModel::fit(&ratings, 50).unwrap();
        assert_eq!(model.rank(), 2);
        assert_eq!(model.item_count(), 2);
    }

    #[tokio::test]
    async fn test_retraining_swaps_model_without_touching_readers() {
        let store = store_with(&[("u1", "b1", 5), ("u2", "b2", 3)]).await;
        let filter = CollaborativeFilter::new(store.clone(), 5, 50);
        let first = filter.train().await.unwrap();

        store.upsert(rating("u3", "b3", 4)).await;
        let second = filter.train().await.unwrap();

        assert_eq!(first.user_count(), 2);
        assert_eq!(second.user_count(), 3);
        assert!(Arc::ptr_eq(&filter.model().await.unwrap(), &second));
    }
}
