use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::models::{AudioSignal, ExternalSignal, GenreAffinity, VisualSignal};

pub const MOOD_ROMANTIC: &str = "romantic";
pub const MOOD_DARK: &str = "dark";
pub const MOOD_BRIGHT: &str = "bright";
pub const MOOD_MINIMALIST: &str = "minimalist";

const MOODS: [&str; 4] = [MOOD_ROMANTIC, MOOD_DARK, MOOD_BRIGHT, MOOD_MINIMALIST];

/// (mood, score must exceed, genres credited with the mood score)
const VISUAL_MOOD_RULES: &[(&str, f64, &[&str])] = &[
    (MOOD_ROMANTIC, 0.3, &["Romance"]),
    (MOOD_DARK, 0.4, &["Horror", "Mystery", "Thriller"]),
    (MOOD_BRIGHT, 0.4, &["Comedy", "Adventure"]),
    (MOOD_MINIMALIST, 0.3, &["Literary Fiction", "Philosophy"]),
];

/// Keyword fragment -> genres, each credited with `KEYWORD_INCREMENT` per match
const KEYWORD_RULES: &[(&str, &[&str])] = &[
    ("vintage", &["Historical Fiction"]),
    ("nature", &["Adventure", "Environmental"]),
    ("travel", &["Adventure", "Travel"]),
    ("art", &["Art", "Biography"]),
    ("fashion", &["Contemporary Fiction"]),
    ("food", &["Cooking", "Memoir"]),
    ("quotes", &["Poetry", "Philosophy"]),
];

const KEYWORD_INCREMENT: f64 = 0.2;

/// Music genre fragment -> genres, credited with the fragment's share of tracks
const MUSIC_GENRE_RULES: &[(&str, &[&str])] = &[
    ("classical", &["Classical Literature", "Philosophy", "History"]),
    ("jazz", &["Beat Literature", "Biography", "Music"]),
    ("rock", &["Counterculture", "Biography", "Music"]),
    ("electronic", &["Science Fiction", "Cyberpunk", "Futurism"]),
    ("folk", &["Historical Fiction", "Nature Writing", "Americana"]),
    ("hip-hop", &["Urban Fiction", "Social Commentary", "Biography"]),
    ("country", &["Southern Fiction", "Americana", "Rural Life"]),
    ("indie", &["Independent Literature", "Alternative Fiction"]),
];

const HIGH_ENERGY_GENRES: &[&str] = &["Action", "Adventure", "Thriller"];
const LOW_ENERGY_GENRES: &[&str] = &["Literary Fiction", "Poetry", "Philosophy"];
const HIGH_VALENCE_GENRES: &[&str] = &["Comedy", "Romance", "Feel-good Fiction"];
const LOW_VALENCE_GENRES: &[&str] = &["Drama", "Literary Fiction", "Memoir"];
const ACOUSTIC_GENRES: &[&str] = &["Meditation", "Nature Writing", "Poetry"];

/// HSV cut-offs deciding which mood bucket a color falls in.
///
/// Buckets are tested in order minimalist, dark, bright, romantic; a color
/// lands in the first bucket it matches, or none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodThresholds {
    pub minimalist_max_saturation: f64,
    pub minimalist_min_value: f64,
    pub dark_max_value: f64,
    pub bright_min_saturation: f64,
    pub bright_min_value: f64,
    /// Hues above this (toward 1.0) read as pink/red
    pub romantic_min_hue: f64,
    /// Hues below this (from 0.0) read as red
    pub romantic_max_hue: f64,
}

impl Default for MoodThresholds {
    fn default() -> Self {
        Self {
            minimalist_max_saturation: 0.3,
            minimalist_min_value: 0.8,
            dark_max_value: 0.3,
            bright_min_saturation: 0.7,
            bright_min_value: 0.7,
            romantic_min_hue: 0.8,
            romantic_max_hue: 0.1,
        }
    }
}

impl MoodThresholds {
    fn classify(&self, (hue, saturation, value): (f64, f64, f64)) -> Option<&'static str> {
        if saturation < self.minimalist_max_saturation && value > self.minimalist_min_value {
            Some(MOOD_MINIMALIST)
        } else if value < self.dark_max_value {
            Some(MOOD_DARK)
        } else if saturation > self.bright_min_saturation && value > self.bright_min_value {
            Some(MOOD_BRIGHT)
        } else if hue > self.romantic_min_hue || (hue > 0.0 && hue < self.romantic_max_hue) {
            Some(MOOD_ROMANTIC)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapperSettings {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub moods: MoodThresholds,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            clusters: 5,
            max_iterations: 25,
            seed: 42,
            moods: MoodThresholds::default(),
        }
    }
}

/// An 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (the leading `#` is optional)
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
        Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Hue, saturation and value, each in [0, 1]
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let value = max;
        if max == min {
            return (0.0, 0.0, value);
        }

        let delta = max - min;
        let saturation = delta / max;
        let hue = if max == r {
            (g - b) / delta
        } else if max == g {
            2.0 + (b - r) / delta
        } else {
            4.0 + (r - g) / delta
        };
        let hue = (hue / 6.0).rem_euclid(1.0);

        (hue, saturation, value)
    }
}

fn credit(scores: &mut BTreeMap<String, f64>, genres: &[&str], amount: f64) {
    for genre in genres {
        *scores.entry((*genre).to_string()).or_insert(0.0) += amount;
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Turns external aesthetic and listening signals into genre affinities.
///
/// Every operation is a pure function of its input and the settings; the
/// clustering RNG is reseeded on every call.
#[derive(Debug, Clone, Default)]
pub struct SignalMapper {
    settings: MapperSettings,
}

impl SignalMapper {
    pub fn new(settings: MapperSettings) -> Self {
        Self { settings }
    }

    /// Clusters sampled pixels into at most `k` colors with seeded k-means++.
    ///
    /// Colors come back largest cluster first, as `#rrggbb`. Fewer than `k`
    /// colors are returned when the sample has fewer distinct colors.
    pub fn cluster_colors(&self, pixels: &[Rgb], k: usize) -> Vec<String> {
        if pixels.is_empty() || k == 0 {
            return Vec::new();
        }

        // n x 3 row-major
        let data: Vec<f64> = pixels
            .iter()
            .flat_map(|p| [f64::from(p.r), f64::from(p.g), f64::from(p.b)])
            .collect();
        let n = pixels.len();
        let point = |i: usize| &data[i * 3..i * 3 + 3];
        let dist2 = |a: &[f64], b: &[f64]| -> f64 {
            a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
        };

        let mut rng = StdRng::seed_from_u64(self.settings.seed);

        let mut centroids: Vec<f64> = Vec::with_capacity(k * 3);
        centroids.extend_from_slice(point(rng.gen_range(0..n)));
        let mut nearest: Vec<f64> = (0..n).map(|i| dist2(point(i), &centroids[0..3])).collect();

        while centroids.len() / 3 < k {
            let total: f64 = nearest.iter().sum();
            if total <= 0.0 {
                break;
            }
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, d) in nearest.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }

            let start = centroids.len();
            centroids.extend_from_slice(point(chosen));
            for (i, d) in nearest.iter_mut().enumerate() {
                *d = d.min(dist2(point(i), &centroids[start..start + 3]));
            }
        }

        let k = centroids.len() / 3;
        let mut labels = vec![usize::MAX; n];

        for _ in 0..self.settings.max_iterations.max(1) {
            let mut changed = false;
            for (i, label) in labels.iter_mut().enumerate() {
                let best = (0..k)
                    .min_by(|&a, &b| {
                        dist2(point(i), &centroids[a * 3..a * 3 + 3])
                            .total_cmp(&dist2(point(i), &centroids[b * 3..b * 3 + 3]))
                    })
                    .unwrap_or(0);
                if *label != best {
                    *label = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![0.0; k * 3];
            let mut counts = vec![0usize; k];
            for (i, &label) in labels.iter().enumerate() {
                counts[label] += 1;
                for c in 0..3 {
                    sums[label * 3 + c] += data[i * 3 + c];
                }
            }
            for cluster in 0..k {
                // An emptied cluster keeps its previous centroid
                if counts[cluster] > 0 {
                    for c in 0..3 {
                        centroids[cluster * 3 + c] = sums[cluster * 3 + c] / counts[cluster] as f64;
                    }
                }
            }
        }

        let mut sizes = vec![0usize; k];
        for &label in &labels {
            sizes[label] += 1;
        }

        let mut clusters: Vec<(usize, String)> = (0..k)
            .filter(|&cluster| sizes[cluster] > 0)
            .map(|cluster| {
                let channel = |c: usize| centroids[cluster * 3 + c].round().clamp(0.0, 255.0) as u8;
                (sizes[cluster], Rgb::new(channel(0), channel(1), channel(2)).to_hex())
            })
            .collect();
        clusters.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        clusters.into_iter().map(|(_, hex)| hex).collect()
    }

    /// Share of the analyzed colors falling in each mood bucket.
    ///
    /// Unparseable colors are skipped and not counted.
    pub fn mood_from_colors(&self, colors: &[String]) -> BTreeMap<String, f64> {
        let mut scores: BTreeMap<String, f64> =
            MOODS.iter().map(|mood| (mood.to_string(), 0.0)).collect();

        let parsed: Vec<Rgb> = colors
            .iter()
            .filter_map(|hex| {
                let rgb = Rgb::from_hex(hex);
                if rgb.is_none() {
                    tracing::debug!(color = %hex, "Skipping unparseable color");
                }
                rgb
            })
            .collect();

        if parsed.is_empty() {
            return scores;
        }

        for rgb in &parsed {
            if let Some(mood) = self.settings.moods.classify(rgb.to_hsv()) {
                *scores.entry(mood.to_string()).or_insert(0.0) += 1.0;
            }
        }

        let total = parsed.len() as f64;
        for score in scores.values_mut() {
            *score /= total;
        }

        scores
    }

    /// Clusters a sampled image and derives its visual signal
    pub fn analyze_pixels(&self, pixels: &[Rgb]) -> VisualSignal {
        let dominant_colors = self.cluster_colors(pixels, self.settings.clusters);
        let mood_scores = self.mood_from_colors(&dominant_colors);
        VisualSignal {
            dominant_colors,
            text_keywords: Vec::new(),
            mood_scores,
        }
    }

    /// Mood profile of a visual signal: the mean of its supplied mood scores
    /// and the moods derived from its dominant colors, over whichever of the
    /// two is present.
    fn visual_moods(&self, signal: &VisualSignal) -> BTreeMap<String, f64> {
        let mut sources: Vec<BTreeMap<String, f64>> = Vec::new();
        if !signal.mood_scores.is_empty() {
            sources.push(
                signal
                    .mood_scores
                    .iter()
                    .map(|(mood, score)| (mood.to_lowercase(), unit(*score)))
                    .collect(),
            );
        }
        if !signal.dominant_colors.is_empty() {
            sources.push(self.mood_from_colors(&signal.dominant_colors));
        }

        let mut profile = BTreeMap::new();
        if sources.is_empty() {
            return profile;
        }
        for mood in MOODS {
            let sum: f64 = sources
                .iter()
                .map(|source| source.get(mood).copied().unwrap_or(0.0))
                .sum();
            profile.insert(mood.to_string(), sum / sources.len() as f64);
        }
        profile
    }

    fn visual_increments(&self, signal: &VisualSignal) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        let moods = self.visual_moods(signal);

        for (mood, threshold, genres) in VISUAL_MOOD_RULES {
            let score = moods.get(*mood).copied().unwrap_or(0.0);
            if score > *threshold {
                credit(&mut scores, genres, score);
            }
        }

        for keyword in &signal.text_keywords {
            let keyword = keyword.to_lowercase();
            for (fragment, genres) in KEYWORD_RULES {
                if keyword.contains(fragment) {
                    credit(&mut scores, genres, KEYWORD_INCREMENT);
                }
            }
        }

        scores
    }

    fn audio_increments(&self, signal: &AudioSignal) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        let energy = unit(signal.energy);
        let valence = unit(signal.valence);
        let acousticness = unit(signal.acousticness);

        if energy > 0.7 {
            credit(&mut scores, HIGH_ENERGY_GENRES, energy);
        } else if energy < 0.3 {
            credit(&mut scores, LOW_ENERGY_GENRES, 1.0 - energy);
        }

        if valence > 0.7 {
            credit(&mut scores, HIGH_VALENCE_GENRES, valence);
        } else if valence < 0.3 {
            credit(&mut scores, LOW_VALENCE_GENRES, 1.0 - valence);
        }

        if acousticness > 0.6 {
            credit(&mut scores, ACOUSTIC_GENRES, acousticness);
        }

        let total_tracks: u64 = signal.genre_histogram.values().map(|&c| u64::from(c)).sum();
        if total_tracks > 0 {
            for (music_genre, &count) in &signal.genre_histogram {
                let share = f64::from(count) / total_tracks as f64;
                let music_genre = music_genre.to_lowercase();
                for (fragment, genres) in MUSIC_GENRE_RULES {
                    if music_genre.contains(fragment) {
                        credit(&mut scores, genres, share);
                    }
                }
            }
        }

        scores
    }

    /// Genre increments contributed by a single signal, before averaging
    pub fn signal_increments(&self, signal: &ExternalSignal) -> BTreeMap<String, f64> {
        match signal {
            ExternalSignal::Visual(visual) => self.visual_increments(visual),
            ExternalSignal::Audio(audio) => self.audio_increments(audio),
        }
    }

    /// Sums the rule-table increments of every signal, divides by the number
    /// of signals analyzed and clamps each affinity into [0, 1].
    pub fn map_to_genre_affinities(&self, signals: &[ExternalSignal]) -> GenreAffinity {
        if signals.is_empty() {
            return GenreAffinity::default();
        }

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for signal in signals {
            for (genre, increment) in self.signal_increments(signal) {
                *totals.entry(genre).or_insert(0.0) += increment;
            }
        }

        let count = signals.len() as f64;
        let affinities = totals
            .into_iter()
            .map(|(genre, total)| (genre, unit(total / count)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        GenreAffinity::new(affinities)
    }
}
