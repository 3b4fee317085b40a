//! Connection-time auth gate
//!
//! The bearer credential arrives as a `token` query parameter and is checked
//! exactly once, before any session logic runs. Failure closes the socket
//! with close code 4001 so clients can tell an auth rejection apart from a
//! transport drop. Credential issuance is out of scope.

use crate::AUTH_FAILURE_CLOSE_CODE;
use axum::extract::ws::{CloseFrame, Message, WebSocket};

pub fn check_token(provided: Option<&str>, expected: &str) -> Result<(), &'static str> {
    match provided {
        None => Err("Missing token"),
        Some(token) if token == expected => Ok(()),
        Some(_) => Err("Invalid token"),
    }
}

/// Close a just-upgraded socket that failed the credential check.
pub async fn reject_socket(mut socket: WebSocket, reason: &'static str) {
    tracing::warn!("Rejecting connection: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: AUTH_FAILURE_CLOSE_CODE,
            reason: reason.into(),
        })))
        .await;
}
