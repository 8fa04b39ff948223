//! Upstream provider clients for chat and image generation.

mod chat;
mod error;
mod image;
mod types;

pub use chat::ChatClient;
pub use error::LLMError;
pub use image::{ImageClient, ImageGenerator, ImageInput, ImageResult};
pub use types::{ChatRequest, ChatStream, Message, Role, StreamEvent};
