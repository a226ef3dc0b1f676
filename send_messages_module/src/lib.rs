//! Outbound messaging for the LINE Messaging API.
//!
//! - `LineClient`: reply/push messages, download message content, look up profiles
//! - `ExternalApiError`: the response shape every outbound HTTP integration reports

mod error;
mod line;
mod types;

pub use error::{ApiResponse, ExternalApiError, ExternalService, MessagingError};
pub use line::{LineClient, DEFAULT_LINE_API_BASE, DEFAULT_LINE_DATA_API_BASE};
pub use types::{Message, MessageContent, Profile};
