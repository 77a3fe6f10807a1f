//! Transfer tracker: in-flight resource transfers keyed by (peer, transfer ID).
//!
//! Each key is one leg of a transcript. An inbound transfer has a single leg; a resource sent to
//! N peers has N legs sharing one transcript, whose progress is the mean of its legs. Unknown keys
//! are never an error: transport events race with cleanup, so lookups just return `None`.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::identity::PeerId;
use crate::transcript::{Direction, ResourceRef, Transcript, TranscriptId, TransferStatus};

/// Transfer ID: 16 opaque bytes naming one peer's transfer stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TransferId([u8; 16]);

impl TransferId {
    pub fn generate() -> Self {
        TransferId(Uuid::new_v4().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TransferId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Uuid::from_bytes(self.0).hyphenated().fmt(f)
    }
}

/// Terminal outcome reported for one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// `location` is where a received resource was stored; ignored for sent legs.
    Completed { location: Option<ResourceRef> },
    Failed { reason: String },
}

type TransferKey = (PeerId, TransferId);

struct Leg {
    fraction: f64,
    finished: bool,
    /// Tick of the last event seen on this leg (for stall eviction).
    last_activity: u64,
}

/// A transcript and every leg feeding it, finished or not.
struct TrackedTranscript {
    transcript: Transcript,
    legs: HashMap<TransferKey, Leg>,
    first_failure: Option<String>,
}

impl TrackedTranscript {
    /// Recompute aggregate progress from the legs. Returns true if the visible value changed.
    fn refresh_progress(&mut self) -> bool {
        if self.legs.is_empty() {
            return false;
        }
        let sum: f64 = self.legs.values().map(|l| l.fraction).sum();
        let mean = (sum / self.legs.len() as f64).clamp(0.0, 1.0);
        match self.transcript.resource_mut() {
            Some(r) if r.progress != mean => {
                r.progress = mean;
                true
            }
            _ => false,
        }
    }

    fn all_finished(&self) -> bool {
        self.legs.values().all(|l| l.finished)
    }

    /// Fold the leg outcomes into the terminal status: Completed only if no leg failed.
    fn conclude(&mut self) {
        let failure = self.first_failure.clone();
        if let Some(r) = self.transcript.resource_mut() {
            match failure {
                Some(reason) => {
                    r.status = TransferStatus::Failed;
                    r.error = Some(reason);
                }
                None => {
                    r.status = TransferStatus::Completed;
                    r.progress = 1.0;
                }
            }
        }
    }
}

#[derive(Default)]
pub struct TransferTracker {
    /// Unfinished legs -> owning transcript.
    active: HashMap<TransferKey, TranscriptId>,
    transcripts: HashMap<TranscriptId, TrackedTranscript>,
    clock: u64,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leg for `transcript`. Registering another key with the same transcript adds a
    /// leg to it. Returns false (no-op) for a key already in use or a non-resource transcript.
    pub fn begin(&mut self, peer: PeerId, transfer_id: TransferId, transcript: &Transcript) -> bool {
        let key = (peer, transfer_id);
        if self.active.contains_key(&key) || transcript.resource().is_none() {
            return false;
        }
        let tracked = self
            .transcripts
            .entry(transcript.id())
            .or_insert_with(|| TrackedTranscript {
                transcript: transcript.clone(),
                legs: HashMap::new(),
                first_failure: None,
            });
        if tracked.legs.contains_key(&key) {
            return false;
        }
        tracked.legs.insert(
            key,
            Leg {
                fraction: 0.0,
                finished: false,
                last_activity: self.clock,
            },
        );
        tracked.refresh_progress();
        self.active.insert(key, transcript.id());
        true
    }

    /// Record progress on a leg. Returns the updated snapshot, or `None` for unknown keys and
    /// for updates that leave the visible progress unchanged. Progress never moves backwards.
    pub fn progress(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        fraction: f64,
    ) -> Option<Transcript> {
        if fraction.is_nan() {
            return None;
        }
        let key = (peer, transfer_id);
        let id = *self.active.get(&key)?;
        let tracked = self.transcripts.get_mut(&id)?;
        let leg = tracked.legs.get_mut(&key)?;
        leg.last_activity = self.clock;
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= leg.fraction {
            return None;
        }
        leg.fraction = fraction;
        if tracked.refresh_progress() {
            Some(tracked.transcript.clone())
        } else {
            None
        }
    }

    /// Finish a leg. Once every leg of the transcript has finished, the returned snapshot carries
    /// the terminal status and the transcript is dropped from the tracker. Before that, returns
    /// the progress update if the leg changed it.
    pub fn finish(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    ) -> Option<Transcript> {
        let key = (peer, transfer_id);
        let id = self.active.remove(&key)?;
        let tracked = self.transcripts.get_mut(&id)?;
        let direction = tracked.transcript.direction();
        if let Some(leg) = tracked.legs.get_mut(&key) {
            leg.finished = true;
            leg.last_activity = self.clock;
            match outcome {
                TransferOutcome::Completed { location } => {
                    leg.fraction = 1.0;
                    if let (Direction::Received, Some(location)) = (direction, location) {
                        if let Some(r) = tracked.transcript.resource_mut() {
                            r.location = Some(location);
                        }
                    }
                }
                TransferOutcome::Failed { reason } => {
                    tracked.first_failure.get_or_insert(reason);
                }
            }
        }
        let changed = tracked.refresh_progress();
        if tracked.all_finished() {
            let mut tracked = self.transcripts.remove(&id)?;
            tracked.conclude();
            return Some(tracked.transcript);
        }
        changed.then(|| tracked.transcript.clone())
    }

    /// Fail every unfinished leg involving `peer`. Returns the resulting snapshots in order.
    pub fn fail_peer(&mut self, peer: PeerId, reason: &str) -> Vec<Transcript> {
        let mut keys: Vec<TransferKey> = self
            .active
            .keys()
            .filter(|(p, _)| *p == peer)
            .copied()
            .collect();
        keys.sort();
        self.fail_legs(keys, reason)
    }

    /// Advance the tracker's logical clock by one tick. Returns the new tick.
    pub fn tick(&mut self) -> u64 {
        self.clock = self.clock.saturating_add(1);
        self.clock
    }

    /// Fail legs idle for more than `timeout_ticks` ticks. A timeout of 0 disables eviction.
    pub fn evict_stalled(&mut self, timeout_ticks: u64) -> Vec<Transcript> {
        if timeout_ticks == 0 {
            return Vec::new();
        }
        let now = self.clock;
        let mut keys: Vec<TransferKey> = self
            .active
            .iter()
            .filter(|(key, id)| {
                self.transcripts
                    .get(*id)
                    .and_then(|t| t.legs.get(*key))
                    .is_some_and(|leg| now.saturating_sub(leg.last_activity) > timeout_ticks)
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        self.fail_legs(keys, "timed out")
    }

    fn fail_legs(&mut self, keys: Vec<TransferKey>, reason: &str) -> Vec<Transcript> {
        keys.into_iter()
            .filter_map(|(peer, transfer_id)| {
                self.finish(
                    peer,
                    transfer_id,
                    TransferOutcome::Failed {
                        reason: reason.to_string(),
                    },
                )
            })
            .collect()
    }

    /// Current snapshot of an in-flight transcript.
    pub fn transcript(&self, id: &TranscriptId) -> Option<&Transcript> {
        self.transcripts.get(id).map(|t| &t.transcript)
    }

    pub fn contains(&self, peer: PeerId, transfer_id: TransferId) -> bool {
        self.active.contains_key(&(peer, transfer_id))
    }

    /// Number of unfinished legs.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
