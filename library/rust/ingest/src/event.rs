use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// イベント種別を格納するプロパティキー。
pub const EVENT_TYPE_PROPERTY: &str = "event_type";

/// 種別を特定できないイベントに割り当てる種別名。
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Offset はパーティション内の位置を表す不透明なトークン。
/// パーティション内で単調増加するが、連続しているとは限らない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(u64);

impl Offset {
    pub const fn new(position: u64) -> Self {
        Self(position)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// EventBody はイベントのペイロード。
/// 受信時に JSON として解釈できれば Structured、できなければ Raw になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "BodyRepr", try_from = "BodyRepr")]
pub enum EventBody {
    Structured(serde_json::Value),
    Raw(Vec<u8>),
}

impl EventBody {
    /// バイト列をボディに変換する。JSON として解釈できない場合は Raw にフォールバックし、失敗しない。
    pub fn decode(bytes: &[u8]) -> Self {
        match Self::try_structured(bytes) {
            Ok(value) => EventBody::Structured(value),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "body kept as raw payload");
                EventBody::Raw(bytes.to_vec())
            }
        }
    }

    /// バイト列を厳密に JSON として解釈する。
    pub fn try_structured(bytes: &[u8]) -> Result<serde_json::Value, PayloadError> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }

    /// 送信用のバイト列表現を返す。
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            EventBody::Structured(value) => value.to_string().into_bytes(),
            EventBody::Raw(bytes) => bytes.clone(),
        }
    }

    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            EventBody::Structured(value) => Some(value),
            EventBody::Raw(_) => None,
        }
    }

    /// 表示用の文字列を返す。Raw は不正な UTF-8 を置換文字で表す。
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            EventBody::Structured(value) => Cow::Owned(value.to_string()),
            EventBody::Raw(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// ペイロードのバイト長。
    pub fn len(&self) -> usize {
        match self {
            EventBody::Structured(value) => value.to_string().len(),
            EventBody::Raw(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// エクスポート文書でのボディ表現。
#[derive(Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "lowercase")]
enum BodyRepr {
    Json(serde_json::Value),
    Utf8(String),
    Hex(String),
}

impl From<EventBody> for BodyRepr {
    fn from(body: EventBody) -> Self {
        match body {
            EventBody::Structured(value) => BodyRepr::Json(value),
            EventBody::Raw(bytes) => match String::from_utf8(bytes) {
                Ok(text) => BodyRepr::Utf8(text),
                Err(e) => BodyRepr::Hex(hex::encode(e.into_bytes())),
            },
        }
    }
}

impl TryFrom<BodyRepr> for EventBody {
    type Error = hex::FromHexError;

    fn try_from(repr: BodyRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            BodyRepr::Json(value) => EventBody::Structured(value),
            BodyRepr::Utf8(text) => EventBody::Raw(text.into_bytes()),
            BodyRepr::Hex(encoded) => EventBody::Raw(hex::decode(encoded)?),
        })
    }
}

/// プロパティ、次いで構造化ボディの event_type フィールドから種別を決定する。
fn derive_event_type<'a>(properties: &'a BTreeMap<String, String>, body: &'a EventBody) -> &'a str {
    if let Some(event_type) = properties.get(EVENT_TYPE_PROPERTY) {
        return event_type;
    }
    body.as_structured()
        .and_then(|value| value.get(EVENT_TYPE_PROPERTY))
        .and_then(serde_json::Value::as_str)
        .unwrap_or(UNKNOWN_EVENT_TYPE)
}

/// EventData は送信前のイベント。パーティション・オフセットはトランスポートが割り当てる。
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub body: EventBody,
    pub properties: BTreeMap<String, String>,
    /// 同一キーのイベントは同一パーティションに送られる。
    pub partition_key: Option<String>,
    /// 送信先パーティションの明示指定。partition_key より優先される。
    pub partition_id: Option<String>,
}

impl EventData {
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            properties: BTreeMap::new(),
            partition_key: None,
            partition_id: None,
        }
    }

    /// JSON ペイロードで EventData を生成する。
    pub fn json<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(EventBody::Structured(serde_json::to_value(
            payload,
        )?)))
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_partition_id(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn event_type(&self) -> &str {
        derive_event_type(&self.properties, &self.body)
    }
}

/// Event はトランスポートから受信したイベント。
/// ハーネスが一度だけ消費し、その後は変更されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub partition_id: String,
    pub offset: Offset,
    pub sequence_number: u64,
    pub enqueued_time: DateTime<Utc>,
    pub properties: BTreeMap<String, String>,
    pub body: EventBody,
}

impl Event {
    pub fn event_type(&self) -> &str {
        derive_event_type(&self.properties, &self.body)
    }
}
