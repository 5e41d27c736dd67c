use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_chat::ChatError;
use parley_types::api::Claims;

/// Authenticate a WebSocket upgrade request from its handshake metadata.
///
/// The credential is a bearer token in the Authorization header. Signature
/// and expiry are checked against the shared secret; the resulting claims
/// carry the actor identifier for the lifetime of the connection.
pub fn authenticate(headers: &HeaderMap, secret: &str) -> Result<Claims, ChatError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ChatError::Auth("No authorization header found".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ChatError::Auth("Invalid or missing token".into()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ChatError::Auth(format!("Token verification failed: {e}")))?;

    Ok(token_data.claims)
}
