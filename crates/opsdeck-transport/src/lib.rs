pub mod handle;
pub mod http;
pub mod mock;
pub mod sse;

pub use handle::{StreamTransport, TransportFeed, TransportHandle};
pub use http::{HttpTransport, TransportConfig};
pub use mock::MockTransport;
pub use sse::{parse_sse_text, SseDecoder};
