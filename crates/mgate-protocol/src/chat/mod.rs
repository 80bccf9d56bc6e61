pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use request::ChatRequest;
pub use response::{ChatChoice, ChatResponse};
pub use stream::{StreamChoice, StreamChunk, StreamDelta};
pub use types::{ChatMessage, Usage};
