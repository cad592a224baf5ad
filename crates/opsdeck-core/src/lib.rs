pub mod errors;
pub mod events;
pub mod ids;
pub mod overlay;

pub use errors::StreamError;
pub use events::{ChannelEvent, TransportEvent};
pub use ids::{HandleId, ResourceId, SessionId};
pub use overlay::{DismissTrigger, OverlayRenderer, OverlaySink, OverlaySnapshot, OverlayTarget};
