use crate::model::RaceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// In-process advisory locks keyed by race id.
///
/// Every writer that touches a race's results or ratings holds the race's
/// lock for the duration of the write, so two attempts of the same task
/// (or two tasks) never interleave on one race.
#[derive(Clone, Default)]
pub struct RaceLocks {
    inner: Arc<Mutex<HashMap<RaceId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, race_id: RaceId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(race_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}
