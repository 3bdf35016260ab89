pub mod routes;
pub mod server;
#[cfg(test)]
pub mod tests;

use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier};
use shared::security::auth_signature_middleware::{parse_signature_header, signing_string};
use shared::security::keys;

use crate::api::server::AppState;
use crate::error::ExplorerError;

/// The authenticated caller of a write endpoint, resolved from the HTTP
/// signature header against the registered pubkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signer(pub i64);

impl Signer {
    /// Write endpoints bind the body identity to the transport identity.
    pub fn require(&self, customer_tid: i64) -> Result<(), ExplorerError> {
        if self.0 != customer_tid {
            return Err(ExplorerError::Unauthenticated(
                "request user identity does not match the customer tid".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromRequest for Signer {
    type Error = ExplorerError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let state = req
                .app_data::<Data<AppState>>()
                .cloned()
                .ok_or_else(|| ExplorerError::Fatal("app state missing".to_string()))?;

            let header = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(parse_signature_header)
                .ok_or_else(|| {
                    ExplorerError::Unauthenticated(
                        "missing or malformed signature header".to_string(),
                    )
                })?;

            if !header.fresh(Utc::now().timestamp()) {
                return Err(ExplorerError::Unauthenticated(
                    "signature header expired".to_string(),
                ));
            }

            let pubkey = state
                .store_context
                .user_store
                .pubkey_of(header.key_id)
                .await
                .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?
                .ok_or_else(|| {
                    ExplorerError::Unauthenticated("unknown signing identity".to_string())
                })?;

            let key = keys::verifying_key(&pubkey).map_err(|_| {
                ExplorerError::Unauthenticated("registered pubkey is not a valid key".to_string())
            })?;
            let signature = Signature::from_slice(&header.signature)
                .map_err(|_| ExplorerError::Unauthenticated("malformed signature".to_string()))?;
            let message = signing_string(header.created, header.key_id);
            key.verify(message.as_bytes(), &signature).map_err(|_| {
                ExplorerError::Unauthenticated("signature verification failed".to_string())
            })?;

            Ok(Signer(header.key_id))
        })
    }
}
