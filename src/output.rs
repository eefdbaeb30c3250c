//! Rendering of delivered messages for the console

use crate::transport::{qos_level, InboundMessage};
use chrono::{DateTime, TimeZone};
use serde_json::{json, Value};

/// `[hh:mm:ss.zzz][QoS<n>][R| ] Topic: <topic> | Message: <payload>`
pub fn render_line<Tz: TimeZone>(message: &InboundMessage, received_at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "[{}][QoS{}][{}] Topic: {} | Message: {}",
        received_at.format("%H:%M:%S%.3f"),
        qos_level(message.qos),
        if message.retain { "R" } else { " " },
        message.topic,
        message.payload_text()
    )
}

/// One JSON object per message
pub fn render_json<Tz: TimeZone>(message: &InboundMessage, received_at: &DateTime<Tz>) -> Value
where
    Tz::Offset: std::fmt::Display,
{
    json!({
        "received_at": received_at.to_rfc3339(),
        "topic": message.topic,
        "qos": qos_level(message.qos),
        "retain": message.retain,
        "payload": message.payload_text(),
    })
}
