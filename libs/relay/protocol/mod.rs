//! Wire protocol: envelopes, validation and the inbound frame handler

pub mod envelope;
pub mod handler;
pub mod validation;

pub use envelope::{
    ChatRequest, ClientEnvelope, FilePayload, HistoryMessage, MessageResponse, ProgressUpdate,
    ResponseStatus, ServerEnvelope,
};
pub use handler::{HandlerConfig, Outbox, ProtocolHandler};
pub use validation::{parse_client_frame, ValidationError};
