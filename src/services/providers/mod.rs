use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::instrument;

/// External signal provider abstraction
///
/// The integration collaborator completes OAuth and third-party API fetches
/// on its own and hands over normalized `ExternalSignal` payloads. This trait
/// is the only way the engine sees them.
use crate::{
    error::{AppError, AppResult},
    models::{ExternalSignal, UserId},
};

/// Trait for external signal providers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SignalProvider: Send + Sync {
    /// Every normalized signal known for a user, oldest first.
    ///
    /// An empty list means the user has connected nothing.
    async fn fetch_signals(&self, user_id: &str) -> AppResult<Vec<ExternalSignal>>;

    /// Hands signals for a user to the provider, returning how many it now holds.
    ///
    /// Providers that pull from elsewhere reject pushed signals.
    async fn accept_signals(&self, user_id: &str, signals: Vec<ExternalSignal>) -> AppResult<usize> {
        let _ = (user_id, signals);
        Err(AppError::InvalidInput(format!(
            "Signal provider '{}' does not accept pushed signals",
            self.name()
        )))
    }

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Provider backed by signals pushed into the process by the integration layer
#[derive(Default)]
pub struct InMemorySignalProvider {
    signals: RwLock<HashMap<UserId, Vec<ExternalSignal>>>,
}

impl InMemorySignalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends signals for a user and returns how many the user now has
    #[instrument(skip(self, signals), fields(count = signals.len()))]
    pub async fn push_signals(&self, user_id: &str, signals: Vec<ExternalSignal>) -> usize {
        let mut stored = self.signals.write().await;
        let entry = stored.entry(user_id.to_string()).or_default();
        entry.extend(signals);
        entry.len()
    }
}

#[async_trait::async_trait]
impl SignalProvider for InMemorySignalProvider {
    async fn fetch_signals(&self, user_id: &str) -> AppResult<Vec<ExternalSignal>> {
        Ok(self
            .signals
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn accept_signals(&self, user_id: &str, signals: Vec<ExternalSignal>) -> AppResult<usize> {
        Ok(self.push_signals(user_id, signals).await)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioSignal;
    use std::collections::BTreeMap;

    fn audio(energy: f64) -> ExternalSignal {
        ExternalSignal::Audio(AudioSignal {
            genre_histogram: BTreeMap::new(),
            energy,
            valence: 0.5,
            acousticness: 0.5,
        })
    }

    #[tokio::test]
    async fn test_push_then_fetch_preserves_order() {
        let provider = InMemorySignalProvider::new();
        assert_eq!(provider.push_signals("u1", vec![audio(0.1)]).await, 1);
        assert_eq!(provider.push_signals("u1", vec![audio(0.9)]).await, 2);

        let fetched = provider.fetch_signals("u1").await.unwrap();
        assert_eq!(fetched, vec![audio(0.1), audio(0.9)]);
        assert!(provider.fetch_signals("u2").await.unwrap().is_empty());
    }
}
