pub mod api;
pub mod sse;
pub mod stream;

pub use api::BackendClient;
pub use sse::FrameDecoder;
