use danzin_llm::{SessionFailure, StreamEventPayload};

use crate::chat::message::{ExchangeTransition, StreamTarget};

/// Session event translated into chat routing terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn new(target: StreamTarget, payload: StreamEventPayload) -> Self {
        Self { target, payload }
    }

    /// Synthetic failure for a session whose channel closed without a terminal event.
    pub fn channel_closed(target: StreamTarget) -> Self {
        Self::new(
            target,
            StreamEventPayload::Error(SessionFailure::abnormal_close()),
        )
    }

    /// Maps lifecycle payloads to exchange transitions.
    ///
    /// Chunks return `None`: they grow the reply, not the state.
    pub fn transition(&self) -> Option<ExchangeTransition> {
        match self.payload {
            StreamEventPayload::PayloadSent => Some(ExchangeTransition::Sent(self.target)),
            StreamEventPayload::Chunk(_) => None,
            StreamEventPayload::Done => Some(ExchangeTransition::Complete(self.target)),
            StreamEventPayload::Error(_) => Some(ExchangeTransition::Fail(self.target)),
        }
    }
}
