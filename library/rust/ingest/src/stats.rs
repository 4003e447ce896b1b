use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// CollectionStats は収集セッションの集計値。
/// カウンタはハーネスが record() 経由でのみ更新し、外部からは読み取り専用。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    total_events: u64,
    events_by_type: BTreeMap<String, u64>,
    events_by_partition: BTreeMap<String, u64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl CollectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// セッション開始時刻を記録する。
    pub(crate) fn begin(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
        self.end_time = None;
    }

    /// セッション終了時刻を記録する。
    pub(crate) fn finish(&mut self, at: DateTime<Utc>) {
        if self.start_time.is_none() {
            self.start_time = Some(at);
        }
        self.end_time = Some(at);
    }

    /// イベント 1 件を集計に反映する。
    pub(crate) fn record(&mut self, event: &Event) {
        self.total_events += 1;
        *self
            .events_by_type
            .entry(event.event_type().to_string())
            .or_insert(0) += 1;
        *self
            .events_by_partition
            .entry(event.partition_id.clone())
            .or_insert(0) += 1;
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn events_by_type(&self) -> &BTreeMap<String, u64> {
        &self.events_by_type
    }

    pub fn events_by_partition(&self) -> &BTreeMap<String, u64> {
        &self.events_by_partition
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// 収集期間の長さ。終了していない、または時刻が逆転している場合は 0。
    pub fn elapsed(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// 1 秒あたりのイベント数。経過時間が 0 の場合は 0 を返す。
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_events as f64 / secs
        } else {
            0.0
        }
    }
}

/// パーティション ID の並び順。数値 ID は数値として比較する（"2" < "10"）。
pub fn compare_partition_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBody, Offset, EVENT_TYPE_PROPERTY};

    fn event(partition: &str, event_type: Option<&str>) -> Event {
        let mut properties = BTreeMap::new();
        if let Some(t) = event_type {
            properties.insert(EVENT_TYPE_PROPERTY.to_string(), t.to_string());
        }
        Event {
            partition_id: partition.to_string(),
            offset: Offset::new(0),
            sequence_number: 0,
            enqueued_time: Utc::now(),
            properties,
            body: EventBody::Raw(Vec::new()),
        }
    }

    #[test]
    fn test_record_counts_by_type_and_partition() {
        let mut stats = CollectionStats::new();
        stats.record(&event("0", Some("login")));
        stats.record(&event("1", Some("login")));
        stats.record(&event("0", None));

        assert_eq!(stats.total_events(), 3);
        assert_eq!(stats.events_by_type()["login"], 2);
        assert_eq!(stats.events_by_type()["unknown"], 1);
        assert_eq!(stats.events_by_partition()["0"], 2);
        assert_eq!(stats.events_by_partition()["1"], 1);
    }

    #[test]
    fn test_breakdown_sums_match_total() {
        let mut stats = CollectionStats::new();
        for (i, t) in ["a", "b", "c", "a", "unknown", "b", "a"].iter().enumerate() {
            stats.record(&event(&(i % 3).to_string(), Some(t)));
        }
        let by_type: u64 = stats.events_by_type().values().sum();
        let by_partition: u64 = stats.events_by_partition().values().sum();
        assert_eq!(by_type, stats.total_events());
        assert_eq!(by_partition, stats.total_events());
    }

    #[test]
    fn test_throughput_and_elapsed() {
        let mut stats = CollectionStats::new();
        let start = Utc::now();
        stats.begin(start);
        for _ in 0..10 {
            stats.record(&event("0", Some("view")));
        }
        stats.finish(start + chrono::Duration::seconds(5));
        assert_eq!(stats.elapsed(), Duration::from_secs(5));
        assert!((stats.throughput() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_throughput_zero_when_no_elapsed_time() {
        let mut stats = CollectionStats::new();
        let at = Utc::now();
        stats.begin(at);
        stats.record(&event("0", None));
        stats.finish(at);
        assert_eq!(stats.throughput(), 0.0);

        assert_eq!(CollectionStats::new().throughput(), 0.0);
    }

    #[test]
    fn test_finish_without_begin_sets_both_times() {
        let mut stats = CollectionStats::new();
        let at = Utc::now();
        stats.finish(at);
        assert_eq!(stats.start_time(), Some(at));
        assert_eq!(stats.end_time(), Some(at));
    }

    #[test]
    fn test_compare_partition_ids() {
        let mut ids = vec!["10", "2", "0", "b", "a", "1"];
        ids.sort_by(|a, b| compare_partition_ids(a, b));
        assert_eq!(ids, vec!["0", "1", "2", "10", "a", "b"]);
    }
}
