use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::error::ErrorUnauthorized;
use actix_web::{Error, HttpMessage, Result};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier};
use futures_util::future::LocalBoxFuture;
use log::debug;

use crate::security::keys;

/// Maximum age of the `created` timestamp in a signature header.
const REQUEST_EXPIRY_SECS: i64 = 300;

/// The authenticated caller, injected into request extensions on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerId(pub i64);

type PubkeyResolver =
    Arc<dyn Fn(i64) -> LocalBoxFuture<'static, Option<String>> + Send + Sync>;

/// Resolves a caller id to its registered ed25519 pubkey. The lookup is
/// asynchronous so it can go through the user store.
#[derive(Clone)]
pub struct ValidatorState {
    resolver: PubkeyResolver,
}

impl ValidatorState {
    pub fn new<F>(resolver: F) -> Self
    where
        F: Fn(i64) -> LocalBoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    async fn pubkey_for(&self, user_id: i64) -> Option<String> {
        (self.resolver)(user_id).await
    }
}

pub struct ParsedHeader {
    pub key_id: i64,
    pub created: i64,
    pub signature: Vec<u8>,
}

impl ParsedHeader {
    /// Whether the `created` stamp is within the replay window around `now`.
    pub fn fresh(&self, now: i64) -> bool {
        (now - self.created).abs() <= REQUEST_EXPIRY_SECS
    }
}

/// Parse an `Authorization: Signature keyId="..",algorithm="ed25519",
/// created="..",signature=".."` header.
pub fn parse_signature_header(value: &str) -> Option<ParsedHeader> {
    let params = value.strip_prefix("Signature ")?;

    let mut key_id = None;
    let mut created = None;
    let mut signature = None;
    let mut algorithm = None;
    for part in params.split(',') {
        let (name, raw) = part.trim().split_once('=')?;
        let raw = raw.trim_matches('"');
        match name {
            "keyId" => key_id = raw.parse::<i64>().ok(),
            "created" => created = raw.parse::<i64>().ok(),
            "signature" => {
                signature = base64::engine::general_purpose::STANDARD.decode(raw).ok()
            }
            "algorithm" => algorithm = Some(raw.to_string()),
            _ => {}
        }
    }

    if algorithm.as_deref() != Some("ed25519") {
        return None;
    }

    Some(ParsedHeader {
        key_id: key_id?,
        created: created?,
        signature: signature?,
    })
}

/// The byte string the caller signs: binds the timestamp and the identity.
pub fn signing_string(created: i64, user_id: i64) -> String {
    format!("(created): {}\nuser-id: {}", created, user_id)
}

/// Actix middleware enforcing the HTTP signature scheme on a scope. On
/// success the caller's [`SignerId`] is available from request extensions.
pub struct ValidateSignature {
    state: Arc<ValidatorState>,
}

impl ValidateSignature {
    pub fn new(state: Arc<ValidatorState>) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ValidateSignature
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ValidateSignatureMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ValidateSignatureMiddleware {
            service: Rc::new(service),
            state: self.state.clone(),
        }))
    }
}

pub struct ValidateSignatureMiddleware<S> {
    service: Rc<S>,
    state: Arc<ValidatorState>,
}

impl<S, B> Service<ServiceRequest> for ValidateSignatureMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.clone();

        Box::pin(async move {
            let header = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(parse_signature_header)
                .ok_or_else(|| ErrorUnauthorized("missing or malformed signature header"))?;

            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if !header.fresh(now) {
                return Err(ErrorUnauthorized("signature header expired"));
            }

            let pubkey = state
                .pubkey_for(header.key_id)
                .await
                .ok_or_else(|| ErrorUnauthorized("unknown signing identity"))?;

            let key = keys::verifying_key(&pubkey)
                .map_err(|_| ErrorUnauthorized("registered pubkey is not a valid key"))?;
            let signature = Signature::from_slice(&header.signature)
                .map_err(|_| ErrorUnauthorized("malformed signature"))?;
            let message = signing_string(header.created, header.key_id);
            key.verify(message.as_bytes(), &signature)
                .map_err(|_| ErrorUnauthorized("signature verification failed"))?;

            debug!("authenticated request from user {}", header.key_id);
            req.extensions_mut().insert(SignerId(header.key_id));
            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn header_for(key: &SigningKey, key_id: i64, created: i64) -> String {
        let signature = key.sign(signing_string(created, key_id).as_bytes());
        format!(
            r#"Signature keyId="{}",algorithm="ed25519",created="{}",signature="{}""#,
            key_id,
            created,
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
        )
    }

    #[test]
    fn parses_well_formed_header() {
        let key = SigningKey::generate(&mut OsRng);
        let header = header_for(&key, 42, 1_700_000_000);

        let parsed = parse_signature_header(&header).unwrap();
        assert_eq!(parsed.key_id, 42);
        assert_eq!(parsed.created, 1_700_000_000);
        assert_eq!(parsed.signature.len(), 64);
    }

    #[test]
    fn rejects_wrong_algorithm() {
        let header = r#"Signature keyId="42",algorithm="rsa",created="1",signature="aGk=""#;
        assert!(parse_signature_header(header).is_none());
    }

    #[test]
    fn rejects_missing_fields() {
        let header = r#"Signature keyId="42",algorithm="ed25519""#;
        assert!(parse_signature_header(header).is_none());
    }
}
