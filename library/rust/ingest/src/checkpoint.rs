use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Event, Offset};

/// Checkpoint はパーティションごとの処理済み位置を表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partition_id: String,
    pub offset: Offset,
    pub sequence_number: u64,
}

impl Checkpoint {
    pub fn for_event(event: &Event) -> Self {
        Self {
            partition_id: event.partition_id.clone(),
            offset: event.offset,
            sequence_number: event.sequence_number,
        }
    }

    /// self が previous より先の位置にあるかどうか。
    pub fn is_ahead_of(&self, previous: &Checkpoint) -> bool {
        (self.offset, self.sequence_number) > (previous.offset, previous.sequence_number)
    }
}

/// Advance はチェックポイント更新の判定結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// 位置が前進した。
    Advanced,
    /// 記録済みの位置以前だったため無視した（再配信など）。
    Stale,
}

/// CheckpointLedger はパーティションごとのチェックポイントを単調に保持する。
/// 後退する更新は受け付けない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointLedger {
    entries: BTreeMap<String, Checkpoint>,
}

impl CheckpointLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// candidate が記録済みの位置より前進している場合に限り反映する。
    pub fn advance(&mut self, candidate: Checkpoint) -> Advance {
        match self.entries.get(&candidate.partition_id) {
            Some(current) if !candidate.is_ahead_of(current) => Advance::Stale,
            _ => {
                self.entries
                    .insert(candidate.partition_id.clone(), candidate);
                Advance::Advanced
            }
        }
    }

    /// 更新すれば前進になるかどうかを、反映せずに判定する。
    pub fn would_advance(&self, candidate: &Checkpoint) -> bool {
        self.entries
            .get(&candidate.partition_id)
            .map_or(true, |current| candidate.is_ahead_of(current))
    }

    pub fn get(&self, partition_id: &str) -> Option<&Checkpoint> {
        self.entries.get(partition_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entries.values()
    }
}
