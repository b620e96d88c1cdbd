use thiserror::Error;

/// Engine-level failures. Event dispatch is exhaustively matched over a
/// closed enum, so there is no "unhandled event type" variant here — that
/// case cannot occur by construction.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
