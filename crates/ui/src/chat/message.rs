use danzin_llm::StreamSessionId;
use danzin_storage::ConversationId;

/// Routing key for one exchange; late events with another key are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// Lifecycle of the single in-flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    /// Session opened, outbound payload (and image encoding) not yet confirmed.
    Sending(StreamTarget),
    Streaming(StreamTarget),
}

/// Requested state change, always naming the exchange it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeTransition {
    Start(StreamTarget),
    Sent(StreamTarget),
    Complete(StreamTarget),
    Fail(StreamTarget),
    Cancel(StreamTarget),
}

/// Why [`ExchangeState::apply`] refused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeTransitionRejection {
    AlreadyInFlight {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveExchange,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type ExchangeTransitionResult = Result<ExchangeState, ExchangeTransitionRejection>;

impl ExchangeState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Target of the in-flight exchange, if any.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Sending(target) | Self::Streaming(target) => Some(*target),
            Self::Idle => None,
        }
    }

    /// True when an event for `target` belongs to the in-flight exchange.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition.
    ///
    /// Only `Idle` may start an exchange; every other transition must name the active target.
    pub fn apply(&self, transition: ExchangeTransition) -> ExchangeTransitionResult {
        match transition {
            ExchangeTransition::Start(target) => match self.active_target() {
                Some(active) => Err(ExchangeTransitionRejection::AlreadyInFlight {
                    active,
                    attempted: target,
                }),
                None => Ok(Self::Sending(target)),
            },
            ExchangeTransition::Sent(target) => {
                self.ensure_active(target)?;
                Ok(Self::Streaming(target))
            }
            ExchangeTransition::Complete(target)
            | ExchangeTransition::Fail(target)
            | ExchangeTransition::Cancel(target) => {
                self.ensure_active(target)?;
                Ok(Self::Idle)
            }
        }
    }

    fn ensure_active(&self, attempted: StreamTarget) -> Result<(), ExchangeTransitionRejection> {
        match self.active_target() {
            Some(active) if active == attempted => Ok(()),
            Some(active) => Err(ExchangeTransitionRejection::SessionMismatch { active, attempted }),
            None => Err(ExchangeTransitionRejection::NoActiveExchange),
        }
    }
}
