//! Incremental synchronization of serializable state using the delta codec.
//!
//! The owning side keeps a [`StateTracker`] and calls
//! [`update`](StateTracker::update) after every mutation; it yields the
//! compressed delta (or nothing when the serialized form is unchanged).
//! Each observer keeps a [`StateReplica`] seeded from a full snapshot and
//! applies the deltas in order.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::delta::{self, DeltaError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("state serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}

/// Producer side: remembers the last serialized state it published.
#[derive(Debug)]
pub struct StateTracker<T> {
    last: Vec<u8>,
    _state: PhantomData<fn(&T)>,
}

impl<T: Serialize> StateTracker<T> {
    /// Starts tracking from `initial`.  The returned tracker's
    /// [`snapshot`](Self::snapshot) seeds new replicas.
    pub fn new(initial: &T) -> Result<Self, SyncError> {
        Ok(Self {
            last: bincode::serialize(initial)?,
            _state: PhantomData,
        })
    }

    /// Full serialized form of the last published state.
    pub fn snapshot(&self) -> &[u8] {
        &self.last
    }

    /// Records `state` and returns the delta from the previous state, or
    /// `None` when nothing changed.
    pub fn update(&mut self, state: &T) -> Result<Option<Vec<u8>>, SyncError> {
        let current = bincode::serialize(state)?;
        if current == self.last {
            return Ok(None);
        }
        let encoded = delta::compress(&self.last, &current);
        self.last = current;
        Ok(Some(encoded))
    }
}

/// Observer side: reconstructs state from a snapshot plus deltas.
#[derive(Debug)]
pub struct StateReplica<T> {
    bytes: Vec<u8>,
    _state: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StateReplica<T> {
    /// Seeds a replica, checking that the snapshot actually decodes.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, SyncError> {
        let _: T = bincode::deserialize(snapshot)?;
        Ok(Self {
            bytes: snapshot.to_vec(),
            _state: PhantomData,
        })
    }

    /// Applies one delta and returns the resulting state.
    ///
    /// On error the replica keeps its previous state.
    pub fn apply(&mut self, encoded: &[u8]) -> Result<T, SyncError> {
        let next = delta::decompress(&self.bytes, encoded)?;
        let state = bincode::deserialize(&next)?;
        self.bytes = next;
        Ok(state)
    }

    pub fn current(&self) -> Result<T, SyncError> {
        Ok(bincode::deserialize(&self.bytes)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SceneObject {
        name: String,
        position: [f32; 3],
        tags: Vec<String>,
    }

    fn cube() -> SceneObject {
        SceneObject {
            name: "cube".to_string(),
            position: [0.0, 1.0, 2.0],
            tags: vec!["static".to_string()],
        }
    }

    #[test]
    fn test_unchanged_state_yields_no_delta() {
        let obj = cube();
        let mut tracker = StateTracker::new(&obj).unwrap();
        assert!(tracker.update(&obj).unwrap().is_none());
    }

    #[test]
    fn test_replica_follows_tracker_through_mutations() {
        // Arrange
        let mut obj = cube();
        let mut tracker = StateTracker::new(&obj).unwrap();
        let mut replica = StateReplica::<SceneObject>::from_snapshot(tracker.snapshot()).unwrap();

        // Act: same-length change, then a longer one, then a shorter one
        obj.position[1] = 5.0;
        let d1 = tracker.update(&obj).unwrap().unwrap();
        assert_eq!(replica.apply(&d1).unwrap(), obj);

        obj.tags.push("selected".to_string());
        let d2 = tracker.update(&obj).unwrap().unwrap();
        assert_eq!(replica.apply(&d2).unwrap(), obj);

        obj.tags.clear();
        let d3 = tracker.update(&obj).unwrap().unwrap();

        // Assert
        assert_eq!(replica.apply(&d3).unwrap(), obj);
        assert_eq!(replica.current().unwrap(), obj);
    }

    #[test]
    fn test_small_change_produces_small_delta() {
        let mut obj = cube();
        let mut tracker = StateTracker::new(&obj).unwrap();
        obj.position[0] = 9.0;
        let d = tracker.update(&obj).unwrap().unwrap();
        assert!(d.len() < tracker.snapshot().len());
    }

    #[test]
    fn test_bad_delta_leaves_replica_unchanged() {
        let obj = cube();
        let tracker = StateTracker::new(&obj).unwrap();
        let mut replica = StateReplica::<SceneObject>::from_snapshot(tracker.snapshot()).unwrap();
        assert!(matches!(replica.apply(&[1, 2]), Err(SyncError::Delta(_))));
        assert_eq!(replica.current().unwrap(), obj);
    }

    #[test]
    fn test_garbage_snapshot_is_rejected() {
        assert!(StateReplica::<SceneObject>::from_snapshot(&[0xFF; 3]).is_err());
    }
}
