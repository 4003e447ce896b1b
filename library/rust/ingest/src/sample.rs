//! 合成イベントの生成。

use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::event::{EventBody, EventData, EVENT_TYPE_PROPERTY};

/// 合成イベントで使用する種別。
pub const SAMPLE_EVENT_TYPES: [&str; 5] = ["user_login", "purchase", "page_view", "error", "api_call"];

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const USER_COUNT: u32 = 100;

/// SampleGenerator は合成ペイロードを生成する。
/// seeded() で生成した場合、種別・ユーザー・データ部は決定的になる。
pub struct SampleGenerator<R = StdRng> {
    rng: R,
    source: String,
    environment: String,
}

impl SampleGenerator<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for SampleGenerator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> SampleGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            source: "evhub".to_string(),
            environment: "development".to_string(),
        }
    }

    /// metadata.environment に記録する環境名を設定する。
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// 合成ペイロードを生成する。event_type を省略した場合は無作為に選ぶ。
    pub fn payload(&mut self, event_type: Option<&str>) -> Value {
        let event_type = event_type.map_or_else(
            || {
                SAMPLE_EVENT_TYPES
                    .choose(&mut self.rng)
                    .copied()
                    .unwrap_or("user_login")
                    .to_string()
            },
            str::to_string,
        );
        let user_id = format!("user_{:03}", self.rng.gen_range(1..=USER_COUNT));
        let now = Utc::now();

        json!({
            "event_id": format!("evt_{}", now.timestamp_millis()),
            "event_type": event_type,
            "user_id": user_id,
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Micros, true),
            "data": {
                "session_id": format!("sess_{}", self.rng.gen_range(1000..=9999)),
                "ip_address": format!(
                    "192.168.{}.{}",
                    self.rng.gen_range(1..=255),
                    self.rng.gen_range(1..=255)
                ),
                "user_agent": USER_AGENT,
                "page_url": format!("https://example.com/page/{}", self.rng.gen_range(1..=50)),
                "value": self.rng.gen_range(10.0..1000.0),
            },
            "metadata": {
                "source": self.source,
                "version": env!("CARGO_PKG_VERSION"),
                "environment": self.environment,
            },
        })
    }

    /// 合成ペイロードを EventData に包む。
    /// プロパティに event_type・user_id・timestamp を設定し、user_id をパーティションキーにする。
    pub fn event(&mut self, event_type: Option<&str>) -> EventData {
        let payload = self.payload(event_type);
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let (event_type, user_id, timestamp) = (field("event_type"), field("user_id"), field("timestamp"));

        EventData::new(EventBody::Structured(payload))
            .with_property(EVENT_TYPE_PROPERTY, event_type)
            .with_property("user_id", user_id.clone())
            .with_property("timestamp", timestamp)
            .with_partition_key(user_id)
    }
}

/// デモ用の固定 3 イベント。
pub fn demo_events() -> Vec<EventData> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let payloads = [
        json!({
            "event_type": "user_login",
            "user_id": "user_001",
            "message": "User logged in",
            "timestamp": timestamp,
            "data": {"session_id": "sess_123", "ip": "192.168.1.100"},
        }),
        json!({
            "event_type": "purchase",
            "user_id": "user_002",
            "message": "Purchase completed",
            "timestamp": timestamp,
            "data": {"order_id": "ord_456", "amount": 99.99},
        }),
        json!({
            "event_type": "page_view",
            "user_id": "user_003",
            "message": "Page viewed",
            "timestamp": timestamp,
            "data": {"page": "/products", "duration": 45},
        }),
    ];

    payloads
        .into_iter()
        .map(|payload| {
            let event_type = payload["event_type"].as_str().unwrap_or_default().to_string();
            let user_id = payload["user_id"].as_str().unwrap_or_default().to_string();
            EventData::new(EventBody::Structured(payload))
                .with_property(EVENT_TYPE_PROPERTY, event_type)
                .with_property("user_id", user_id)
                .with_property("demo", "true")
        })
        .collect()
}
