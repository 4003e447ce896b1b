use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// EventBuffer は受信順のイベント列。
/// 収集中はハーネスだけが追記し、収集後は読み取り専用として扱う。
/// capacity を指定した場合、満杯時は最も古いイベントを破棄する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventBuffer {
    events: VecDeque<Event>,
    capacity: Option<usize>,
    evicted: u64,
}

impl EventBuffer {
    /// 上限なしのバッファを生成する。
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// 最大 capacity 件を保持するバッファを生成する。0 は 1 として扱う。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: Some(capacity.max(1)),
            evicted: 0,
        }
    }

    pub(crate) fn new(capacity: Option<usize>) -> Self {
        capacity.map_or_else(Self::unbounded, Self::with_capacity)
    }

    /// 末尾にイベントを追加する。上限に達していれば先頭を破棄する。
    pub(crate) fn push(&mut self, event: Event) {
        if let Some(capacity) = self.capacity {
            while self.events.len() >= capacity {
                self.events.pop_front();
                self.evicted += 1;
            }
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// 上限超過で破棄したイベント数。
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// エクスポートから読み戻したバッファに破棄件数を復元する。
    pub(crate) fn restore_evicted(&mut self, evicted: u64) {
        self.evicted = evicted;
    }

    /// 受信順（古い順）に走査する。
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Event> + ExactSizeIterator {
        self.events.iter()
    }

    /// 最後に追加されたイベント。
    pub fn last(&self) -> Option<&Event> {
        self.events.back()
    }

    /// 新しい順に最大 limit 件を返す。
    pub fn recent(&self, limit: usize) -> Vec<&Event> {
        self.events.iter().rev().take(limit).collect()
    }
}

impl From<Vec<Event>> for EventBuffer {
    fn from(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
            capacity: None,
            evicted: 0,
        }
    }
}

impl From<EventBuffer> for Vec<Event> {
    fn from(buffer: EventBuffer) -> Self {
        buffer.events.into()
    }
}

impl FromIterator<Event> for EventBuffer {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBody, Offset};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(seq: u64) -> Event {
        Event {
            partition_id: "0".to_string(),
            offset: Offset::new(seq * 100),
            sequence_number: seq,
            enqueued_time: Utc::now(),
            properties: BTreeMap::new(),
            body: EventBody::Raw(Vec::new()),
        }
    }

    #[test]
    fn test_push_keeps_arrival_order() {
        let mut buffer = EventBuffer::unbounded();
        for seq in 1..=3 {
            buffer.push(event(seq));
        }
        let seqs: Vec<u64> = buffer.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(buffer.evicted(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = EventBuffer::with_capacity(2);
        for seq in 1..=5 {
            buffer.push(event(seq));
        }
        let seqs: Vec<u64> = buffer.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(buffer.evicted(), 3);
        assert_eq!(buffer.capacity(), Some(2));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut buffer = EventBuffer::with_capacity(0);
        buffer.push(event(1));
        buffer.push(event(2));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.recent(5)[0].sequence_number, 2);
    }

    #[test]
    fn test_recent_newest_first() {
        let buffer: EventBuffer = (1..=4).map(event).collect();
        let seqs: Vec<u64> = buffer.recent(2).iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![4, 3]);
        assert_eq!(buffer.recent(10).len(), 4);
        assert!(buffer.recent(0).is_empty());
    }

    #[test]
    fn test_serializes_as_event_list() {
        let buffer: EventBuffer = (1..=2).map(event).collect();
        let value = serde_json::to_value(&buffer).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        let restored: EventBuffer = serde_json::from_value(value).unwrap();
        assert_eq!(restored, buffer);
    }
}
