use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, AppResult},
    models::{ContentScore, ItemId, ItemMetadata, UserProfile},
};

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "more", "most", "no", "not", "of",
    "on", "one", "or", "our", "out", "she", "so", "some", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "too", "up", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Lowercased word tokens of at least two characters, stop words removed
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Unigram and bigram counts for one document
fn term_counts(text: &str) -> HashMap<String, usize> {
    let tokens = tokenize(text);
    let mut counts = HashMap::new();

    for token in &tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
    }

    counts
}

/// Relative weights of the three content signals. Signals a user cannot
/// provide are dropped and the rest rescaled to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentWeights {
    pub similarity: f64,
    pub genre: f64,
    pub author: f64,
}

impl Default for ContentWeights {
    fn default() -> Self {
        Self {
            similarity: 0.3,
            genre: 0.4,
            author: 0.3,
        }
    }
}

/// Sparse TF-IDF vector: (term id, weight) sorted by term id, unit L2 norm
type SparseVector = Vec<(u32, f64)>;

fn dot(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Immutable term-weighted vectors for one version of the item corpus
#[derive(Debug, Clone, Default)]
pub struct ContentModel {
    items: Vec<ItemMetadata>,
    index: HashMap<ItemId, usize>,
    vectors: Vec<SparseVector>,
    vocabulary: Vec<String>,
    built_at: Option<DateTime<Utc>>,
}

impl ContentModel {
    /// Builds TF-IDF vectors over unigrams and bigrams, keeping the
    /// `vocabulary_cap` terms most frequent across the corpus.
    ///
    /// IDF is smoothed: `ln((1 + n) / (1 + df)) + 1`.
    pub fn build(corpus: Vec<ItemMetadata>, vocabulary_cap: usize) -> Self {
        // Last metadata record for an id wins
        let items: Vec<ItemMetadata> = corpus
            .into_iter()
            .map(|item| (item.item_id.clone(), item))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();

        let docs: Vec<HashMap<String, usize>> = items
            .iter()
            .map(|item| term_counts(&item.combined_text()))
            .collect();

        let mut corpus_frequency: HashMap<&str, usize> = HashMap::new();
        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            for (term, count) in doc {
                *corpus_frequency.entry(term.as_str()).or_insert(0) += count;
                *document_frequency.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = corpus_frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(vocabulary_cap);

        let mut vocabulary: Vec<String> = ranked.iter().map(|(term, _)| term.to_string()).collect();
        vocabulary.sort();
        let term_ids: HashMap<&str, u32> = vocabulary
            .iter()
            .enumerate()
            .map(|(id, term)| (term.as_str(), id as u32))
            .collect();

        let n_docs = docs.len() as f64;
        let vectors: Vec<SparseVector> = docs
            .iter()
            .map(|doc| {
                let mut vector: SparseVector = doc
                    .iter()
                    .filter_map(|(term, &tf)| {
                        let id = *term_ids.get(term.as_str())?;
                        let df = document_frequency[term.as_str()] as f64;
                        let idf = ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0;
                        Some((id, tf as f64 * idf))
                    })
                    .collect();
                vector.sort_by_key(|(id, _)| *id);

                let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in vector.iter_mut() {
                        *w /= norm;
                    }
                }
                vector
            })
            .collect();

        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.item_id.clone(), i))
            .collect();

        Self {
            items,
            index,
            vectors,
            vocabulary,
            built_at: Some(Utc::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Cosine similarity in [0, 1]; `None` if either item is unknown
    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let ia = *self.index.get(a)?;
        let ib = *self.index.get(b)?;
        if ia == ib {
            return Some(1.0);
        }
        Some(dot(&self.vectors[ia], &self.vectors[ib]).clamp(0.0, 1.0))
    }

    /// Scores every item outside the user's history.
    ///
    /// Score = weighted mix of the best similarity to a liked item, a genre
    /// match bonus and an author match bonus. Returns nothing when the
    /// profile carries none of the three signals.
    pub fn recommend(
        &self,
        profile: &UserProfile,
        n: usize,
        weights: ContentWeights,
    ) -> Vec<ContentScore> {
        let liked: Vec<usize> = profile
            .liked
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();

        let use_similarity = !liked.is_empty();
        let use_genre = !profile.preferences.preferred_genres.is_empty();
        let use_author = !profile.preferences.favorite_authors.is_empty();

        let total_weight = [
            (use_similarity, weights.similarity),
            (use_genre, weights.genre),
            (use_author, weights.author),
        ]
        .iter()
        .filter(|(used, _)| *used)
        .map(|(_, w)| w)
        .sum::<f64>();

        if total_weight <= 0.0 {
            return Vec::new();
        }

        let mut scores: Vec<ContentScore> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| !profile.history.contains(&item.item_id))
            .filter_map(|(i, item)| {
                let mut score = 0.0;

                if use_similarity {
                    let best = liked
                        .iter()
                        .map(|&j| dot(&self.vectors[i], &self.vectors[j]).clamp(0.0, 1.0))
                        .fold(0.0, f64::max);
                    score += weights.similarity * best;
                }
                if use_genre && item.genre.as_deref().is_some_and(|g| profile.prefers_genre(g)) {
                    score += weights.genre;
                }
                if use_author && item.author.as_deref().is_some_and(|a| profile.follows_author(a))
                {
                    score += weights.author;
                }

                let score = score / total_weight;
                (score > 0.0).then(|| ContentScore {
                    item_id: item.item_id.clone(),
                    score,
                })
            })
            .collect();

        scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item_id.cmp(&b.item_id)));
        scores.truncate(n);
        scores
    }
}

/// Content index with atomic model replacement on rebuild
pub struct ContentIndex {
    vocabulary_cap: usize,
    weights: ContentWeights,
    model: RwLock<Arc<ContentModel>>,
}

impl ContentIndex {
    pub fn new(vocabulary_cap: usize, weights: ContentWeights) -> Self {
        Self {
            vocabulary_cap,
            weights,
            model: RwLock::new(Arc::new(ContentModel::default())),
        }
    }

    pub async fn build(&self, corpus: Vec<ItemMetadata>) -> AppResult<Arc<ContentModel>> {
        let start = Instant::now();
        let cap = self.vocabulary_cap;
        let model = tokio::task::spawn_blocking(move || ContentModel::build(corpus, cap))
            .await
            .map_err(|e| AppError::Internal(format!("Index build task failed: {}", e)))?;
        let model = Arc::new(model);

        *self.model.write().await = model.clone();

        tracing::info!(
            items = model.len(),
            vocabulary = model.vocabulary_size(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Content index built"
        );

        Ok(model)
    }

    pub async fn model(&self) -> Arc<ContentModel> {
        self.model.read().await.clone()
    }

    pub async fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        self.model().await.similarity(a, b)
    }

    /// Scores candidates on a blocking thread; the caller's deadline can
    /// abandon the wait without stalling the runtime.
    pub async fn get_content_recommendations(
        &self,
        profile: &UserProfile,
        n: usize,
    ) -> AppResult<Vec<ContentScore>> {
        let model = self.model().await;
        let profile = profile.clone();
        let weights = self.weights;

        tokio::task::spawn_blocking(move || model.recommend(&profile, n, weights))
            .await
            .map_err(|e| AppError::Internal(format!("Content scoring task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn book(id: &str, title: &str, author: &str, genre: &str, description: &str) -> ItemMetadata {
        ItemMetadata {
            item_id: id.to_string(),
            title: title.to_string(),
            author: Some(author.to_string()),
            genre: Some(genre.to_string()),
            description: Some(description.to_string()),
            added_at: None,
        }
    }

    fn corpus() -> Vec<ItemMetadata> {
        vec![
            book("b1", "The Haunting", "Shirley Jackson", "Horror", "A haunted house terrifies four guests"),
            book("b2", "Hell House", "Richard Matheson", "Horror", "Investigators explore a haunted house"),
            book("b3", "Emma", "Jane Austen", "Romance", "A matchmaker meddles in village romance"),
            book("b4", "Persuasion", "Jane Austen", "Romance", "A second chance at romance by the sea"),
            book("b5", "Dune", "Frank Herbert", "Science Fiction", "Desert planet politics and spice"),
        ]
    }

    #[test]
    fn test_tokenize_drops_stop_words_and_short_tokens() {
        assert_eq!(tokenize("The Cat sat on a MAT!"), vec!["cat", "sat", "mat"]);
    }

    #[test]
    fn test_bigrams_are_counted() {
        let counts = term_counts("haunted house, haunted house");
        assert_eq!(counts.get("haunted house"), Some(&2));
        assert_eq!(counts.get("house haunted"), Some(&1));
    }

    #[test]
    fn test_similarity_is_symmetric_and_reflexive() {
        let model = ContentModel::build(corpus(), 5000);
        let ids = ["b1", "b2", "b3", "b4", "b5"];

        for a in ids {
            assert_eq!(model.similarity(a, a), Some(1.0));
            for b in ids {
                let ab = model.similarity(a, b).unwrap();
                assert_eq!(ab, model.similarity(b, a).unwrap());
                assert!((0.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn test_related_items_are_more_similar() {
        let model = ContentModel::build(corpus(), 5000);
        let haunted = model.similarity("b1", "b2").unwrap();
        let unrelated = model.similarity("b1", "b5").unwrap();
        assert!(haunted > unrelated);
    }

    #[test]
    fn test_vocabulary_cap_is_enforced() {
        let model = ContentModel::build(corpus(), 10);
        assert_eq!(model.vocabulary_size(), 10);
    }

    #[test]
    fn test_unknown_item_has_no_similarity() {
        let model = ContentModel::build(corpus(), 5000);
        assert_eq!(model.similarity("b1", "missing"), None);
    }

    #[test]
    fn test_recommendations_exclude_history() {
        let model = ContentModel::build(corpus(), 5000);
        let mut profile = UserProfile::new("u1");
        profile.history = BTreeSet::from(["b1".to_string(), "b3".to_string()]);
        profile.liked = vec!["b1".to_string()];
        profile.preferences.add_genre("Romance");

        let recs = model.recommend(&profile, 10, ContentWeights::default());

        assert!(recs.iter().all(|r| r.item_id != "b1" && r.item_id != "b3"));
        assert!(!recs.is_empty());
    }

    #[test]
    fn test_weights_rescale_without_history() {
        let model = ContentModel::build(corpus(), 5000);
        let mut profile = UserProfile::new("u1");
        profile.preferences.add_genre("Romance");
        profile.preferences.add_author("Jane Austen");

        let recs = model.recommend(&profile, 10, ContentWeights::default());

        // genre (0.4) + author (0.3), rescaled over 0.7
        assert_eq!(recs[0].item_id, "b3");
        assert!((recs[0].score - 1.0).abs() < 1e-9);
        assert_eq!(recs[1].item_id, "b4");
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn test_genre_only_profile_scores_matches_fully() {
        let model = ContentModel::build(corpus(), 5000);
        let mut profile = UserProfile::new("u1");
        profile.preferences.add_genre("horror");

        let recs = model.recommend(&profile, 10, ContentWeights::default());
        let ids: Vec<&str> = recs.iter().map(|r| r.item_id.as_str()).collect();

        assert_eq!(ids, vec!["b1", "b2"]);
        assert!(recs.iter().all(|r| (r.score - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_empty_profile_yields_nothing() {
        let model = ContentModel::build(corpus(), 5000);
        let recs = model.recommend(&UserProfile::new("u1"), 10, ContentWeights::default());
        assert!(recs.is_empty());
    }

    #[test]
    fn test_liked_history_ranks_similar_item_first() {
        let model = ContentModel::build(corpus(), 5000);
        let mut profile = UserProfile::new("u1");
        profile.history = BTreeSet::from(["b1".to_string()]);
        profile.liked = vec!["b1".to_string()];

        let recs = model.recommend(&profile, 10, ContentWeights::default());
        assert_eq!(recs[0].item_id, "b2");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_model() {
        let index = ContentIndex::new(5000, ContentWeights::default());
        assert!(index.model().await.is_empty());

        index.build(corpus()).await.unwrap();
        assert_eq!(index.model().await.len(), 5);
        assert_eq!(index.similarity("b3", "b3").await, Some(1.0));

        let mut profile = UserProfile::new("u1");
        profile.preferences.add_genre("Science Fiction");
        let recs = index.get_content_recommendations(&profile, 10).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].item_id, "b5");
    }
}
