use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims attached to every WebSocket upgrade request.
/// Canonical definition lives here so the gateway and any token issuer
/// agree on the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}
