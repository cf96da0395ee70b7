use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 推送消息：`{ "type", "payload", "timestamp" }`
#[derive(Debug, Serialize)]
pub struct BroadcastMessage<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub message_type: &'a str,
    pub payload: &'a T,
    pub timestamp: DateTime<Utc>,
}

impl<'a, T: Serialize> BroadcastMessage<'a, T> {
    pub fn new(message_type: &'a str, payload: &'a T) -> Self {
        Self {
            message_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// 只序列化一次，所有观看者共享同一份文本
    pub fn encode(&self) -> Result<Arc<str>> {
        Ok(serde_json::to_string(self)?.into())
    }
}
