use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Parse a hex encoded 32 byte ed25519 verifying key.
pub fn verifying_key(pubkey_hex: &str) -> anyhow::Result<VerifyingKey> {
    let raw = hex::decode(pubkey_hex)?;
    let raw: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("pubkey must be 32 bytes, got {}", raw.len()))?;
    Ok(VerifyingKey::from_bytes(&raw)?)
}

/// Verify a hex encoded ed25519 signature over `message`.
pub fn verify_hex(pubkey_hex: &str, message: &[u8], signature_hex: &str) -> anyhow::Result<()> {
    let key = verifying_key(pubkey_hex)?;
    let raw = hex::decode(signature_hex)
        .map_err(|_| anyhow::anyhow!("invalid signature format, expecting hex encoded string"))?;
    let signature = Signature::from_slice(&raw)?;
    key.verify(message, &signature)
        .map_err(|_| anyhow::anyhow!("signature verification failed"))
}

/// Sign `message` and return the signature hex encoded.
pub fn sign_hex(key: &SigningKey, message: &[u8]) -> String {
    hex::encode(key.sign(message).to_bytes())
}

/// Load a signing key from its hex encoded 32 byte seed.
pub fn signing_key(seed_hex: &str) -> anyhow::Result<SigningKey> {
    let raw = hex::decode(seed_hex)?;
    let raw: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed must be 32 bytes, got {}", raw.len()))?;
    Ok(SigningKey::from_bytes(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_verify_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let pubkey_hex = hex::encode(key.verifying_key().to_bytes());

        let signature = sign_hex(&key, b"payload");
        assert!(verify_hex(&pubkey_hex, b"payload", &signature).is_ok());
        assert!(verify_hex(&pubkey_hex, b"tampered", &signature).is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(verifying_key("zz").is_err());
        assert!(verifying_key("aabb").is_err());
        let key = SigningKey::generate(&mut OsRng);
        let pubkey_hex = hex::encode(key.verifying_key().to_bytes());
        assert!(verify_hex(&pubkey_hex, b"x", "not-hex").is_err());
    }
}
