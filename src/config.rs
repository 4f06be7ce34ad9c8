use serde::Deserialize;
use std::time::Duration;

use crate::services::{
    content::ContentWeights,
    hybrid::HybridWeights,
    signals::{MapperSettings, MoodThresholds},
};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL for the durable cache tier. Without it the
    /// durable tier lives in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_weight_collab")]
    pub hybrid_weight_collab: f64,
    #[serde(default = "default_weight_content")]
    pub hybrid_weight_content: f64,
    #[serde(default = "default_weight_external")]
    pub hybrid_weight_external: f64,

    #[serde(default = "default_content_weight_similarity")]
    pub content_weight_similarity: f64,
    #[serde(default = "default_content_weight_genre")]
    pub content_weight_genre: f64,
    #[serde(default = "default_content_weight_author")]
    pub content_weight_author: f64,

    /// Rank k of the latent factorization
    #[serde(default = "default_factorization_rank")]
    pub factorization_rank: usize,

    /// Number of nearest users K used for rating prediction
    #[serde(default = "default_neighbor_count")]
    pub neighbor_count: usize,

    /// TTL of cached recommendation lists, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Capacity of the in-process cache tier
    #[serde(default = "default_local_cache_capacity")]
    pub local_cache_capacity: u64,

    /// Length of the list computed and cached per user; requests are served by truncation
    #[serde(default = "default_max_cached_results")]
    pub max_cached_results: usize,

    /// Maximum number of terms kept by the content index
    #[serde(default = "default_vocabulary_cap")]
    pub vocabulary_cap: usize,

    #[serde(default = "default_color_clusters")]
    pub color_clusters: usize,
    #[serde(default = "default_kmeans_max_iterations")]
    pub kmeans_max_iterations: usize,
    #[serde(default = "default_kmeans_seed")]
    pub kmeans_seed: u64,

    #[serde(default = "default_minimalist_max_saturation")]
    pub minimalist_max_saturation: f64,
    #[serde(default = "default_minimalist_min_value")]
    pub minimalist_min_value: f64,
    #[serde(default = "default_dark_max_value")]
    pub dark_max_value: f64,
    #[serde(default = "default_bright_min_saturation")]
    pub bright_min_saturation: f64,
    #[serde(default = "default_bright_min_value")]
    pub bright_min_value: f64,
    /// Hue (0-1) above which a color reads as romantic pink/red
    #[serde(default = "default_romantic_min_hue")]
    pub romantic_min_hue: f64,
    /// Hue (0-1) below which a color reads as romantic red
    #[serde(default = "default_romantic_max_hue")]
    pub romantic_max_hue: f64,

    /// Genre affinity at or above which a genre counts as preferred
    #[serde(default = "default_affinity_threshold")]
    pub affinity_threshold: f64,

    /// Share of a personality profile taken from the quiz when reading
    /// history is also available
    #[serde(default = "default_personality_quiz_weight")]
    pub personality_quiz_weight: f64,

    /// Ratings at or above this score form the positively-rated history
    #[serde(default = "default_positive_rating_threshold")]
    pub positive_rating_threshold: u8,

    /// Per-source deadline when computing a recommendation, in milliseconds
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Interval of the background retrain loop; 0 disables it
    #[serde(default)]
    pub retrain_interval_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_weight_collab() -> f64 {
    0.40
}

fn default_weight_content() -> f64 {
    0.35
}

fn default_weight_external() -> f64 {
    0.25
}

fn default_content_weight_similarity() -> f64 {
    0.3
}

fn default_content_weight_genre() -> f64 {
    0.4
}

fn default_content_weight_author() -> f64 {
    0.3
}

fn default_factorization_rank() -> usize {
    50
}

fn default_neighbor_count() -> usize {
    50
}

fn default_cache_ttl_secs() -> u64 {
    1800
}

fn default_local_cache_capacity() -> u64 {
    1000
}

fn default_max_cached_results() -> usize {
    50
}

fn default_vocabulary_cap() -> usize {
    5000
}

fn default_color_clusters() -> usize {
    5
}

fn default_kmeans_max_iterations() -> usize {
    25
}

fn default_kmeans_seed() -> u64 {
    42
}

fn default_minimalist_max_saturation() -> f64 {
    0.3
}

fn default_minimalist_min_value() -> f64 {
    0.8
}

fn default_dark_max_value() -> f64 {
    0.3
}

fn default_bright_min_saturation() -> f64 {
    0.7
}

fn default_bright_min_value() -> f64 {
    0.7
}

fn default_romantic_min_hue() -> f64 {
    0.8
}

fn default_romantic_max_hue() -> f64 {
    0.1
}

fn default_affinity_threshold() -> f64 {
    0.4
}

fn default_personality_quiz_weight() -> f64 {
    0.7
}

fn default_positive_rating_threshold() -> u8 {
    4
}

fn default_source_timeout_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            host: default_host(),
            port: default_port(),
            hybrid_weight_collab: default_weight_collab(),
            hybrid_weight_content: default_weight_content(),
            hybrid_weight_external: default_weight_external(),
            content_weight_similarity: default_content_weight_similarity(),
            content_weight_genre: default_content_weight_genre(),
            content_weight_author: default_content_weight_author(),
            factorization_rank: default_factorization_rank(),
            neighbor_count: default_neighbor_count(),
            cache_ttl_secs: default_cache_ttl_secs(),
            local_cache_capacity: default_local_cache_capacity(),
            max_cached_results: default_max_cached_results(),
            vocabulary_cap: default_vocabulary_cap(),
            color_clusters: default_color_clusters(),
            kmeans_max_iterations: default_kmeans_max_iterations(),
            kmeans_seed: default_kmeans_seed(),
            minimalist_max_saturation: default_minimalist_max_saturation(),
            minimalist_min_value: default_minimalist_min_value(),
            dark_max_value: default_dark_max_value(),
            bright_min_saturation: default_bright_min_saturation(),
            bright_min_value: default_bright_min_value(),
            romantic_min_hue: default_romantic_min_hue(),
            romantic_max_hue: default_romantic_max_hue(),
            affinity_threshold: default_affinity_threshold(),
            personality_quiz_weight: default_personality_quiz_weight(),
            positive_rating_threshold: default_positive_rating_threshold(),
            source_timeout_ms: default_source_timeout_ms(),
            retrain_interval_secs: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.hybrid_weights()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid hybrid weights: {}", e))?;

        if self.factorization_rank == 0 {
            anyhow::bail!("FACTORIZATION_RANK must be at least 1");
        }
        if self.neighbor_count == 0 {
            anyhow::bail!("NEIGHBOR_COUNT must be at least 1");
        }
        if self.color_clusters == 0 {
            anyhow::bail!("COLOR_CLUSTERS must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.romantic_min_hue)
            || !(0.0..=1.0).contains(&self.romantic_max_hue)
        {
            anyhow::bail!("ROMANTIC_MIN_HUE and ROMANTIC_MAX_HUE must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.personality_quiz_weight) {
            anyhow::bail!("PERSONALITY_QUIZ_WEIGHT must be between 0 and 1");
        }
        if !(1..=5).contains(&self.positive_rating_threshold) {
            anyhow::bail!("POSITIVE_RATING_THRESHOLD must be between 1 and 5");
        }

        Ok(())
    }

    pub fn hybrid_weights(&self) -> HybridWeights {
        HybridWeights {
            collab: self.hybrid_weight_collab,
            content: self.hybrid_weight_content,
            external: self.hybrid_weight_external,
        }
    }

    pub fn content_weights(&self) -> ContentWeights {
        ContentWeights {
            similarity: self.content_weight_similarity,
            genre: self.content_weight_genre,
            author: self.content_weight_author,
        }
    }

    pub fn mood_thresholds(&self) -> MoodThresholds {
        MoodThresholds {
            minimalist_max_saturation: self.minimalist_max_saturation,
            minimalist_min_value: self.minimalist_min_value,
            dark_max_value: self.dark_max_value,
            bright_min_saturation: self.bright_min_saturation,
            bright_min_value: self.bright_min_value,
            romantic_min_hue: self.romantic_min_hue,
            romantic_max_hue: self.romantic_max_hue,
        }
    }

    pub fn mapper_settings(&self) -> MapperSettings {
        MapperSettings {
            clusters: self.color_clusters,
            max_iterations: self.kmeans_max_iterations,
            seed: self.kmeans_seed,
            moods: self.mood_thresholds(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn retrain_interval(&self) -> Option<Duration> {
        (self.retrain_interval_secs > 0).then(|| Duration::from_secs(self.retrain_interval_secs))
    }
}
