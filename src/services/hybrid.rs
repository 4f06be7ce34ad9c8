use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{AppError, AppResult},
    models::{
        Catalog, CollabScore, ContentScore, ExternalScore, ItemId, Recommendation,
        RecommendationList, ScoreBreakdown, SourceOmission, SourceOutcome, SourceScore, Strategy,
    },
};

/// Weight of each source in the combined score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub collab: f64,
    pub content: f64,
    pub external: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            collab: 0.40,
            content: 0.35,
            external: 0.25,
        }
    }
}

impl HybridWeights {
    /// Weights must be non-negative and sum to 1.0
    pub fn validate(&self) -> AppResult<()> {
        let weights = [self.collab, self.content, self.external];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AppError::InvalidInput(format!(
                "Weights must be non-negative (got {:?})",
                weights
            )));
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(AppError::InvalidInput(format!(
                "Weights must sum to 1.0 (got {})",
                sum
            )));
        }
        Ok(())
    }

    /// The same weights rescaled to sum to 1
    fn normalized(self) -> Self {
        let sum = self.collab + self.content + self.external;
        Self {
            collab: self.collab / sum,
            content: self.content / sum,
            external: self.external / sum,
        }
    }
}

/// Min-max normalizes one source's scores onto [0, 1].
///
/// A batch whose scores are all equal normalizes to 1.0. Duplicate item ids
/// keep their highest raw score.
fn normalize<T: SourceScore>(outcome: &SourceOutcome<T>) -> Option<BTreeMap<ItemId, f64>> {
    let SourceOutcome::Scored(scores) = outcome else {
        return None;
    };

    let mut raw: BTreeMap<ItemId, f64> = BTreeMap::new();
    for score in scores.iter().filter(|s| s.raw_score().is_finite()) {
        let entry = raw
            .entry(score.item_id().to_string())
            .or_insert(f64::NEG_INFINITY);
        *entry = entry.max(score.raw_score());
    }

    let min = raw.values().copied().fold(f64::INFINITY, f64::min);
    let max = raw.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    Some(
        raw.into_iter()
            .map(|(item_id, score)| {
                let normalized = if range > 0.0 { (score - min) / range } else { 1.0 };
                (item_id, normalized)
            })
            .collect(),
    )
}

/// Higher score first, then newer item, then lower item id
fn rank_order(
    a: (&str, f64, Option<DateTime<Utc>>),
    b: (&str, f64, Option<DateTime<Utc>>),
) -> Ordering {
    b.1.total_cmp(&a.1)
        .then_with(|| b.2.cmp(&a.2))
        .then_with(|| a.0.cmp(b.0))
}

/// Stateless merge of the three signal sources
#[derive(Debug, Clone, Default)]
pub struct HybridScorer {
    weights: HybridWeights,
}

impl HybridScorer {
    pub fn new(weights: HybridWeights) -> AppResult<Self> {
        weights.validate()?;
        Ok(Self {
            weights: weights.normalized(),
        })
    }

    /// Merges per-source results into one ranked list of at most `n` items.
    ///
    /// Each source is normalized independently; an item a source did not
    /// score takes 0 from it. Items in `history` are never returned. When no
    /// source produced anything the list falls back to catalog popularity.
    #[allow(clippy::too_many_arguments)]
    pub fn combine(
        &self,
        user_id: &str,
        collab: SourceOutcome<CollabScore>,
        content: SourceOutcome<ContentScore>,
        external: SourceOutcome<ExternalScore>,
        catalog: &Catalog,
        history: &BTreeSet<ItemId>,
        n: usize,
    ) -> RecommendationList {
        let omitted = Self::omissions(&collab, &content, &external);

        if collab.is_empty() && content.is_empty() && external.is_empty() {
            tracing::info!(user_id = %user_id, "No signal source produced scores, ranking by popularity");
            return RecommendationList {
                user_id: user_id.to_string(),
                strategy: Strategy::Popularity,
                recommendations: Self::popularity(catalog, history, n),
                omitted,
                generated_at: Utc::now(),
            };
        }

        let collab = normalize(&collab);
        let content = normalize(&content);
        let external = normalize(&external);

        let candidates: BTreeSet<&ItemId> = [&collab, &content, &external]
            .into_iter()
            .flatten()
            .flat_map(|scores| scores.keys())
            .filter(|item_id| !history.contains(*item_id))
            .collect();

        let pick = |source: &Option<BTreeMap<ItemId, f64>>, item_id: &ItemId| {
            source
                .as_ref()
                .map(|scores| scores.get(item_id).copied().unwrap_or(0.0))
        };

        let mut recommendations: Vec<Recommendation> = candidates
            .into_iter()
            .map(|item_id| {
                let breakdown = ScoreBreakdown {
                    collab: pick(&collab, item_id),
                    content: pick(&content, item_id),
                    external: pick(&external, item_id),
                };
                let score = (self.weights.collab * breakdown.collab.unwrap_or(0.0)
                    + self.weights.content * breakdown.content.unwrap_or(0.0)
                    + self.weights.external * breakdown.external.unwrap_or(0.0))
                .clamp(0.0, 1.0);

                Recommendation {
                    item_id: item_id.clone(),
                    score,
                    breakdown,
                }
            })
            .collect();

        recommendations.sort_by(|a, b| {
            rank_order(
                (a.item_id.as_str(), a.score, catalog.added_at(&a.item_id)),
                (b.item_id.as_str(), b.score, catalog.added_at(&b.item_id)),
            )
        });
        recommendations.truncate(n);

        RecommendationList {
            user_id: user_id.to_string(),
            strategy: Strategy::Hybrid,
            recommendations,
            omitted,
            generated_at: Utc::now(),
        }
    }

    fn omissions(
        collab: &SourceOutcome<CollabScore>,
        content: &SourceOutcome<ContentScore>,
        external: &SourceOutcome<ExternalScore>,
    ) -> Vec<SourceOmission> {
        [
            (CollabScore::SOURCE, collab.omission()),
            (ContentScore::SOURCE, content.omission()),
            (ExternalScore::SOURCE, external.omission()),
        ]
        .into_iter()
        .filter_map(|(source, omission)| {
            omission.map(|omission| SourceOmission {
                source,
                omission: omission.clone(),
            })
        })
        .collect()
    }

    /// Catalog items ranked by rating count, unrated-by-user items first choice
    fn popularity(catalog: &Catalog, history: &BTreeSet<ItemId>, n: usize) -> Vec<Recommendation> {
        let mut entries: Vec<_> = catalog
            .iter()
            .filter(|entry| !history.contains(&entry.item_id))
            .collect();
        if entries.is_empty() {
            // Everything has been rated already; popularity over the whole catalog
            entries = catalog.iter().collect();
        }

        let max_count = entries.iter().map(|e| e.rating_count).max().unwrap_or(0);
        let mut ranked: Vec<Recommendation> = entries
            .into_iter()
            .map(|entry| Recommendation {
                item_id: entry.item_id.clone(),
                score: if max_count > 0 {
                    entry.rating_count as f64 / max_count as f64
                } else {
                    0.0
                },
                breakdown: ScoreBreakdown::default(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            rank_order(
                (a.item_id.as_str(), a.score, catalog.added_at(&a.item_id)),
                (b.item_id.as_str(), b.score, catalog.added_at(&b.item_id)),
            )
        });
        ranked.truncate(n);
        ranked
    }
}
