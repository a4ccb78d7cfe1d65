/// Exchange orchestration over the store and the streaming backend.
pub mod controller;
pub mod error;
/// Session events mapped onto chat routing targets.
pub mod events;
pub mod input;
/// Exchange lifecycle state and its transitions.
pub mod message;
pub mod preview;
pub mod sidebar;
pub mod surface;

pub use controller::{ChatController, SendOutcome, SendRejection};
pub use error::{ChatError, ChatResult};
pub use events::StreamEventMapped;
pub use input::{DEFAULT_MAX_IMAGE_BYTES, Submission, load_image};
pub use message::{
    ExchangeState, ExchangeTransition, ExchangeTransitionRejection, ExchangeTransitionResult,
    StreamTarget,
};
pub use preview::PreviewRegistry;
pub use sidebar::{SidebarEntry, filter_entries, format_time_ago, sidebar_entries};
pub use surface::{ChatSurface, NullSurface};
