//! Points awarded when a game finishes.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum PointsError {
    #[error("points store unavailable: {0}")]
    Unavailable(String),
}

/// Persists player points. Called once per finished game with the points
/// each player earned.
#[async_trait]
pub trait PointsStore: Send + Sync {
    async fn increment_points(&self, deltas: HashMap<String, u32>) -> Result<(), PointsError>;
}

/// Keeps points for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryPoints {
    points: RwLock<HashMap<String, u64>>,
}

impl InMemoryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn points(&self, username: &str) -> u64 {
        self.points.read().await.get(username).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PointsStore for InMemoryPoints {
    async fn increment_points(&self, deltas: HashMap<String, u32>) -> Result<(), PointsError> {
        let mut points = self.points.write().await;
        for (username, delta) in deltas {
            *points.entry(username).or_insert(0) += u64::from(delta);
        }
        Ok(())
    }
}
