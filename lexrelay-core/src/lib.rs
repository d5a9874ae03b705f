pub mod config;
pub mod error;
pub mod frame;
pub mod session;
pub mod sse;
pub mod upstream;

pub use config::RelayConfig;
pub use error::RelayError;
pub use frame::EventFrame;
pub use session::{Outcome, RelaySession};
pub use sse::LineReassembler;
pub use upstream::{ByteStream, ChatBackend, ChatRequest, DifyClient, UpstreamError};
