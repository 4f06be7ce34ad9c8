use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::{ItemId, UserId};

/// Lowest accepted rating score
pub const MIN_SCORE: u8 = 1;
/// Highest accepted rating score
pub const MAX_SCORE: u8 = 5;

/// A rating event as delivered by the ingestion collaborator.
///
/// The score is carried unvalidated; converting into [`Rating`] rejects
/// anything outside 1-5.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: i64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A validated explicit rating, unique per (user, item)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: u8,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<RatingEvent> for Rating {
    type Error = AppError;

    fn try_from(event: RatingEvent) -> Result<Self, Self::Error> {
        if event.score < MIN_SCORE as i64 || event.score > MAX_SCORE as i64 {
            return Err(AppError::InvalidRatingValue(event.score));
        }
        if event.user_id.trim().is_empty() || event.item_id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Rating requires both user_id and item_id".to_string(),
            ));
        }

        Ok(Rating {
            user_id: event.user_id,
            item_id: event.item_id,
            score: event.score as u8,
            timestamp: event.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(score: i64) -> RatingEvent {
        RatingEvent {
            user_id: "u1".to_string(),
            item_id: "b1".to_string(),
            score,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_valid_scores_convert() {
        for score in 1..=5 {
            let rating = Rating::try_from(event(score)).unwrap();
            assert_eq!(rating.score as i64, score);
        }
    }

    #[test]
    fn test_out_of_range_scores_are_rejected() {
        for score in [0, 6, -3] {
            let err = Rating::try_from(event(score)).unwrap_err();
            assert!(matches!(err, AppError::InvalidRatingValue(s) if s == score));
        }
    }

    #[test]
    fn test_blank_ids_are_rejected() {
        let mut blank = event(3);
        blank.item_id = "  ".to_string();
        assert!(matches!(
            Rating::try_from(blank),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let parsed: RatingEvent =
            serde_json::from_str(r#"{"user_id":"u1","item_id":"b1","score":4}"#).unwrap();
        assert!(Utc::now() - parsed.timestamp < chrono::Duration::seconds(5));
    }
}
