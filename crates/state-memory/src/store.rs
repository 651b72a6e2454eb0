use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use tollgate_state::error::StateError;
use tollgate_state::key::{KeyKind, StateKey};
use tollgate_state::store::{CasResult, StateStore};

/// One stored value with its revision counter and optional expiry deadline.
#[derive(Debug, Clone)]
struct Slot {
    payload: String,
    revision: u64,
    deadline: Option<Instant>,
}

impl Slot {
    fn new(payload: &str, ttl: Option<Duration>) -> Self {
        Self {
            payload: payload.to_owned(),
            revision: 1,
            deadline: ttl.map(deadline_after),
        }
    }

    fn live(&self) -> bool {
        self.deadline.is_none_or(|deadline| Instant::now() < deadline)
    }
}

fn deadline_after(ttl: Duration) -> Instant {
    Instant::now() + ttl
}

/// In-memory [`StateStore`] over a [`DashMap`].
///
/// There is no background sweeper: every operation first drops a stale
/// slot under its key, so expiry is observable as plain absence. Deadlines
/// use `tokio::time::Instant`, which paused-clock tests can advance.
#[derive(Default)]
pub struct MemoryStateStore {
    slots: DashMap<String, Slot>,
}

impl std::fmt::Debug for MemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl MemoryStateStore {
    /// Create a new, empty in-memory state store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_stale(&self, key: &str) {
        self.slots.remove_if(key, |_, slot| !slot.live());
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let key = key.canonical();
        self.drop_stale(&key);
        Ok(match self.slots.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl));
                true
            }
        })
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        Ok(self.get_versioned(key).await?.map(|(payload, _)| payload))
    }

    async fn get_versioned(
        &self,
        key: &StateKey,
    ) -> Result<Option<(String, u64)>, StateError> {
        let key = key.canonical();
        self.drop_stale(&key);
        Ok(self
            .slots
            .get(&key)
            .map(|slot| (slot.payload.clone(), slot.revision)))
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let key = key.canonical();
        self.drop_stale(&key);
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.payload = value.to_owned();
                slot.revision += 1;
                slot.deadline = ttl.map(deadline_after);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl));
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let key = key.canonical();
        // A slot past its deadline counts as already gone.
        self.drop_stale(&key);
        Ok(self.slots.remove(&key).is_some())
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let key = key.canonical();
        // An expired counter restarts from zero.
        self.drop_stale(&key);
        match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let current: i64 = slot.payload.parse().map_err(|e: std::num::ParseIntError| {
                    StateError::Serialization(format!("counter holds a non-integer value: {e}"))
                })?;
                let next = current + delta;
                slot.payload = next.to_string();
                slot.revision += 1;
                if let Some(ttl) = ttl {
                    slot.deadline = Some(deadline_after(ttl));
                }
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(&delta.to_string(), ttl));
                Ok(delta)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError> {
        let key = key.canonical();
        self.drop_stale(&key);

        if expected_version == 0 {
            // Create-only semantics.
            return Ok(match self.slots.entry(key) {
                Entry::Occupied(occupied) => CasResult::Conflict {
                    current_value: Some(occupied.get().payload.clone()),
                    current_version: occupied.get().revision,
                },
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::new(new_value, ttl));
                    CasResult::Ok
                }
            });
        }

        match self.slots.get_mut(&key) {
            None => Ok(CasResult::Conflict {
                current_value: None,
                current_version: 0,
            }),
            Some(slot) if slot.revision != expected_version => Ok(CasResult::Conflict {
                current_value: Some(slot.payload.clone()),
                current_version: slot.revision,
            }),
            Some(mut slot) => {
                slot.payload = new_value.to_owned();
                slot.revision += 1;
                if let Some(ttl) = ttl {
                    slot.deadline = Some(deadline_after(ttl));
                }
                Ok(CasResult::Ok)
            }
        }
    }

    async fn scan_keys(
        &self,
        tenant: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError> {
        let wanted = match prefix {
            Some(prefix) => format!("{tenant}:{kind}:{prefix}"),
            None => format!("{tenant}:{kind}:"),
        };
        Ok(self
            .slots
            .iter()
            .filter(|entry| entry.key().starts_with(&wanted) && entry.value().live())
            .map(|entry| (entry.key().clone(), entry.value().payload.clone()))
            .collect())
    }
}
