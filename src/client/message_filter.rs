//! Inbound message filtering
//!
//! Decides whether a message reaches the application. Rules are applied in
//! order and the first match wins:
//!
//! 1. payload starts with this client's `[ClientID:<id>]` marker: drop
//! 2. retained message on a topic already delivered this session: drop,
//!    otherwise remember the topic
//! 3. QoS 0 payload that mentions the client id anywhere: drop
//! 4. deliver

use crate::transport::{InboundMessage, QoS};
use std::collections::HashSet;
use tracing::debug;

/// Why a message was or wasn't delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Deliver,
    DropSelfMarker,
    DropRetainedDuplicate,
    DropSelfMention,
}

impl FilterDecision {
    pub fn is_deliver(self) -> bool {
        matches!(self, FilterDecision::Deliver)
    }
}

/// Classify `msg`, recording retained topics in `retained` (pure apart from
/// the set mutation)
pub fn classify(msg: &InboundMessage, own_id: &str, retained: &mut HashSet<String>) -> FilterDecision {
    let marker = format!("[ClientID:{own_id}]");
    if msg.payload.starts_with(marker.as_bytes()) {
        return FilterDecision::DropSelfMarker;
    }

    if msg.retain && !retained.insert(msg.topic.clone()) {
        return FilterDecision::DropRetainedDuplicate;
    }

    if msg.qos == QoS::AtMostOnce && !own_id.is_empty() && msg.payload_text().contains(own_id) {
        return FilterDecision::DropSelfMention;
    }

    FilterDecision::Deliver
}

/// Boolean form of [`classify`]
pub fn should_deliver(msg: &InboundMessage, own_id: &str, retained: &mut HashSet<String>) -> bool {
    classify(msg, own_id, retained).is_deliver()
}

/// Filter state for one client: its id plus the retained topics seen since
/// the last successful connect
#[derive(Debug, Clone)]
pub struct MessageFilter {
    own_id: String,
    retained: HashSet<String>,
}

impl MessageFilter {
    pub fn new(own_id: impl Into<String>) -> Self {
        Self {
            own_id: own_id.into(),
            retained: HashSet::new(),
        }
    }

    pub fn check(&mut self, msg: &InboundMessage) -> FilterDecision {
        let decision = classify(msg, &self.own_id, &mut self.retained);
        if !decision.is_deliver() {
            debug!(topic = %msg.topic, ?decision, "Dropping inbound message");
        }
        decision
    }

    /// Forget retained topics; called on every successful connect
    pub fn clear_retained(&mut self) {
        self.retained.clear();
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}
