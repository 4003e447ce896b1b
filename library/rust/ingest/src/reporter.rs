//! 収集結果の要約・一覧表示・JSON エクスポート。

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::buffer::EventBuffer;
use crate::error::ExportError;
use crate::event::{Event, EventBody};
use crate::stats::{compare_partition_ids, CollectionStats};

/// Breakdown は集計の 1 行（キー・件数・割合）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub key: String,
    pub count: u64,
    /// 全体に対する割合（0.0〜100.0）。総数 0 の場合は 0.0。
    pub percentage: f64,
}

/// SummaryView は CollectionStats の表示用ビュー。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryView {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub total_events: u64,
    pub throughput: f64,
    /// 件数の降順、同数は種別名の昇順。
    pub by_type: Vec<Breakdown>,
    /// パーティション ID の昇順（数値 ID は数値として比較）。
    pub by_partition: Vec<Breakdown>,
}

#[allow(clippy::cast_precision_loss)]
fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn breakdown<'a>(
    counts: impl IntoIterator<Item = (&'a String, &'a u64)>,
    total: u64,
    order: impl Fn(&Breakdown, &Breakdown) -> Ordering,
) -> Vec<Breakdown> {
    let mut rows: Vec<Breakdown> = counts
        .into_iter()
        .map(|(key, &count)| Breakdown {
            key: key.clone(),
            count,
            percentage: percentage(count, total),
        })
        .collect();
    rows.sort_by(order);
    rows
}

/// 集計値から要約ビューを作る。
pub fn summarize(stats: &CollectionStats) -> SummaryView {
    let total = stats.total_events();
    SummaryView {
        start_time: stats.start_time(),
        end_time: stats.end_time(),
        duration: stats.elapsed(),
        total_events: total,
        throughput: stats.throughput(),
        by_type: breakdown(stats.events_by_type(), total, |a, b| {
            b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key))
        }),
        by_partition: breakdown(stats.events_by_partition(), total, |a, b| {
            compare_partition_ids(&a.key, &b.key)
        }),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
}

impl fmt::Display for SummaryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Collection summary")?;
        writeln!(f, "  start:       {}", format_time(self.start_time))?;
        writeln!(f, "  end:         {}", format_time(self.end_time))?;
        writeln!(f, "  duration:    {:.1}s", self.duration.as_secs_f64())?;
        writeln!(f, "  events:      {}", self.total_events)?;
        writeln!(f, "  throughput:  {:.2} events/s", self.throughput)?;

        writeln!(f, "Events by type:")?;
        if self.by_type.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for row in &self.by_type {
            writeln!(f, "  {:<16} {:>6} ({:5.1}%)", row.key, row.count, row.percentage)?;
        }

        writeln!(f, "Events by partition:")?;
        if self.by_partition.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for row in &self.by_partition {
            writeln!(f, "  partition {:<6} {:>6} ({:5.1}%)", row.key, row.count, row.percentage)?;
        }
        Ok(())
    }
}

/// 直近のイベントを新しい順に最大 limit 件返す。バッファは変更しない。
pub fn recent_events(buffer: &EventBuffer, limit: usize) -> Vec<&Event> {
    buffer.recent(limit)
}

/// 収集期間。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPeriod {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// ExportInfo はエクスポート文書のヘッダー。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub exported_at: DateTime<Utc>,
    /// 集計上の総イベント数（バッファから破棄された分を含む）。
    pub total_events: u64,
    pub buffered_events: usize,
    pub evicted_events: u64,
    pub collection_period: CollectionPeriod,
}

/// ExportDocument は読み込んだエクスポート文書。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportDocument {
    pub export_info: ExportInfo,
    pub statistics: CollectionStats,
    pub events: EventBuffer,
}

#[derive(Serialize)]
struct ExportRef<'a> {
    export_info: ExportInfo,
    statistics: &'a CollectionStats,
    events: Vec<&'a Event>,
}

/// 現在時刻を exported_at としてエクスポート文書を生成する。
pub fn export(stats: &CollectionStats, buffer: &EventBuffer) -> Result<String, ExportError> {
    export_at(stats, buffer, Utc::now())
}

/// exported_at を指定してエクスポート文書（整形済み JSON）を生成する。
/// マップはキー順に出力されるため、同じ入力からは同じ文書が得られる。
pub fn export_at(
    stats: &CollectionStats,
    buffer: &EventBuffer,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    let document = ExportRef {
        export_info: ExportInfo {
            exported_at,
            total_events: stats.total_events(),
            buffered_events: buffer.len(),
            evicted_events: buffer.evicted(),
            collection_period: CollectionPeriod {
                start: stats.start_time(),
                end: stats.end_time(),
            },
        },
        statistics: stats,
        events: buffer.iter().collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// エクスポート文書を読み込む。破棄件数はヘッダーの evicted_events からバッファへ戻す。
pub fn import(text: &str) -> Result<ExportDocument, ExportError> {
    let mut document: ExportDocument = serde_json::from_str(text)?;
    document
        .events
        .restore_evicted(document.export_info.evicted_events);
    Ok(document)
}

/// エクスポート文書をファイルに書き出す。
pub fn write_export(
    path: impl AsRef<Path>,
    stats: &CollectionStats,
    buffer: &EventBuffer,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    let document = export(stats, buffer)?;
    std::fs::write(path, document)?;
    tracing::info!(
        path = %path.display(),
        events = buffer.len(),
        "export written"
    );
    Ok(())
}

/// イベント 1 件をコンソール表示用の複数行文字列にする。
pub fn render_event(index: usize, event: &Event) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Event #{index}");
    let _ = writeln!(out, "  partition:   {}", event.partition_id);
    let _ = writeln!(out, "  offset:      {}", event.offset);
    let _ = writeln!(out, "  sequence:    {}", event.sequence_number);
    let _ = writeln!(out, "  enqueued:    {}", event.enqueued_time.to_rfc3339());
    let _ = writeln!(out, "  type:        {}", event.event_type());
    if !event.properties.is_empty() {
        let _ = writeln!(out, "  properties:");
        for (key, value) in &event.properties {
            let _ = writeln!(out, "    {key}: {value}");
        }
    }
    let body = match &event.body {
        EventBody::Structured(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        EventBody::Raw(_) => event.body.as_text().into_owned(),
    };
    let _ = writeln!(out, "  body:");
    for line in body.lines() {
        let _ = writeln!(out, "    {line}");
    }
    out
}
