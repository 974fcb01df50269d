pub mod client;
pub mod error;
pub mod types;

pub use client::{AnthropicClient, ModelClient};
pub use error::AnthropicError;
pub use types::{Message, MessagesRequest, MessagesResponse, Usage};
