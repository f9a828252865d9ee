use thiserror::Error;

/// Failure decoding an inbound channel payload. Handlers convert these into
/// an `"Error: <detail>"` status string rather than letting anything escape
/// to the transport.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid RPC data format")]
    MissingPayload,
    #[error("payload is not valid JSON: {0}")]
    UnparsablePayload(String),
    #[error("payload is missing an action discriminator")]
    MissingAction,
    #[error("malformed {kind} payload: {detail}")]
    MalformedFields { kind: &'static str, detail: String },
}
