//! Self-describing signed QR payloads.
//!
//! Wire format: `base64url(JSON) "." base64url(HMAC_SHA256(key, base64url(JSON)))`,
//! both parts unpadded. The JSON carries a `ver` field selecting the signing
//! key, so keys can rotate without invalidating codes already issued.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::ticket::PaymentMethod;
use crate::utils::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Source of versioned signing keys.
pub trait KeyProvider: Send + Sync {
    /// Version used for newly issued payloads.
    fn current_version(&self) -> u32;

    fn key(&self, version: u32) -> Option<&[u8]>;
}

#[derive(Clone)]
pub struct KeyRing {
    current: u32,
    keys: HashMap<u32, Vec<u8>>,
}

impl KeyRing {
    pub fn new(version: u32, secret: impl Into<Vec<u8>>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(version, secret.into());
        Self {
            current: version,
            keys,
        }
    }

    /// Keeps an older key around so previously issued codes still verify.
    pub fn with_retired(mut self, version: u32, secret: impl Into<Vec<u8>>) -> Self {
        if version != self.current {
            self.keys.insert(version, secret.into());
        }
        self
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut versions: Vec<_> = self.keys.keys().copied().collect();
        versions.sort_unstable();
        f.debug_struct("KeyRing")
            .field("current", &self.current)
            .field("versions", &versions)
            .finish()
    }
}

impl KeyProvider for KeyRing {
    fn current_version(&self) -> u32 {
        self.current
    }

    fn key(&self, version: u32) -> Option<&[u8]> {
        self.keys.get(&version).map(Vec::as_slice)
    }
}

/// A payload type that can travel inside a signed QR code.
pub trait QrPayload: Serialize + DeserializeOwned {
    /// Value of the payload's `type` field.
    const KIND: &'static str;

    fn version(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQr {
    #[serde(rename = "type")]
    pub kind: String,
    pub ver: u32,
    pub intent_hint: String,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    /// Expiry as unix seconds.
    pub exp: i64,
}

impl QrPayload for PaymentQr {
    const KIND: &'static str = "payment";

    fn version(&self) -> u32 {
        self.ver
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInQr {
    #[serde(rename = "type")]
    pub kind: String,
    pub ver: u32,
    pub ticket_id: Uuid,
    pub schedule_id: Uuid,
    pub seats: Vec<String>,
    /// Issue time as unix seconds.
    pub ts: i64,
}

impl QrPayload for CheckInQr {
    const KIND: &'static str = "ticket";

    fn version(&self) -> u32 {
        self.ver
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQr {
    pub payload: String,
    pub signature: String,
}

impl SignedQr {
    pub fn content(&self) -> String {
        format!("{}.{}", self.payload, self.signature)
    }

    pub fn parse(content: &str) -> AppResult<Self> {
        let (payload, signature) = content
            .trim()
            .split_once('.')
            .filter(|(p, s)| !p.is_empty() && !s.is_empty())
            .ok_or_else(|| AppError::ValidationError("Malformed QR content".to_string()))?;
        Ok(Self {
            payload: payload.to_string(),
            signature: signature.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct QrSigner {
    keys: Arc<dyn KeyProvider>,
}

impl QrSigner {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn current_version(&self) -> u32 {
        self.keys.current_version()
    }

    pub fn sign<P: QrPayload>(&self, payload: &P) -> AppResult<SignedQr> {
        let key = self.keys.key(payload.version()).ok_or_else(|| {
            AppError::InternalServerError(format!(
                "No signing key for version {}",
                payload.version()
            ))
        })?;
        let json = serde_json::to_vec(payload)
            .map_err(|e| AppError::InternalServerError(format!("QR payload encoding: {e}")))?;
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(mac(key, &encoded)?.finalize().into_bytes());
        Ok(SignedQr {
            payload: encoded,
            signature,
        })
    }

    /// Verifies the signature, then decodes the payload and checks its type.
    pub fn verify<P: QrPayload>(&self, content: &str) -> AppResult<(SignedQr, P)> {
        let signed = SignedQr::parse(content)?;
        let json = URL_SAFE_NO_PAD
            .decode(signed.payload.as_bytes())
            .map_err(|_| AppError::ValidationError("QR payload is not valid base64".to_string()))?;
        let value: serde_json::Value = serde_json::from_slice(&json)
            .map_err(|_| AppError::ValidationError("QR payload is not valid JSON".to_string()))?;

        // Only the key version is read before the signature is checked.
        let version = value
            .get("ver")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);
        let key = self
            .keys
            .key(version)
            .ok_or_else(|| AppError::Conflict("Invalid QR signature".to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signed.signature.as_bytes())
            .map_err(|_| AppError::Conflict("Invalid QR signature".to_string()))?;
        mac(key, &signed.payload)?
            .verify_slice(&signature)
            .map_err(|_| AppError::Conflict("Invalid QR signature".to_string()))?;

        if value.get("type").and_then(serde_json::Value::as_str) != Some(P::KIND) {
            return Err(AppError::ValidationError(format!(
                "QR code is not a {} code",
                P::KIND
            )));
        }
        let payload = serde_json::from_value(value)
            .map_err(|e| AppError::ValidationError(format!("QR payload is incomplete: {e}")))?;
        Ok((signed, payload))
    }
}

fn mac(key: &[u8], message: &str) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| AppError::InternalServerError("HMAC key error".to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> QrSigner {
        QrSigner::new(Arc::new(KeyRing::new(2, "current-secret").with_retired(1, "old-secret")))
    }

    fn check_in(ver: u32) -> CheckInQr {
        CheckInQr {
            kind: CheckInQr::KIND.to_string(),
            ver,
            ticket_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            seats: vec!["A1".into(), "A2".into()],
            ts: 1_700_000_000,
        }
    }

    #[test]
    fn test_signed_content_verifies() {
        let signer = signer();
        let payload = check_in(2);
        let signed = signer.sign(&payload).unwrap();
        let (_, decoded) = signer.verify::<CheckInQr>(&signed.content()).unwrap();
        assert_eq!(decoded, payload);
        assert!(!signed.payload.contains('='));
    }

    #[test]
    fn test_retired_key_still_verifies() {
        let signer = signer();
        let signed = signer.sign(&check_in(1)).unwrap();
        assert!(signer.verify::<CheckInQr>(&signed.content()).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = signer();
        let signed = signer.sign(&check_in(2)).unwrap();

        let mut forged = check_in(2);
        forged.seats = vec!["VIP1".into()];
        let forged_payload = signer.sign(&forged).unwrap().payload;
        let tampered = format!("{}.{}", forged_payload, signed.signature);

        assert!(matches!(
            signer.verify::<CheckInQr>(&tampered),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let signer = signer();
        let signed = signer.sign(&check_in(2)).unwrap();
        let mut sig = signed.signature.clone();
        let flipped = if sig.ends_with('A') { 'B' } else { 'A' };
        sig.pop();
        sig.push(flipped);
        let content = format!("{}.{}", signed.payload, sig);
        assert!(signer.verify::<CheckInQr>(&content).is_err());
    }

    #[test]
    fn test_foreign_key_rejected() {
        let other = QrSigner::new(Arc::new(KeyRing::new(2, "someone-else")));
        let signed = other.sign(&check_in(2)).unwrap();
        assert!(signer().verify::<CheckInQr>(&signed.content()).is_err());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let signer = signer();
        let signed = signer.sign(&check_in(2)).unwrap();
        assert!(matches!(
            signer.verify::<PaymentQr>(&signed.content()),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_malformed_content_rejected() {
        assert!(SignedQr::parse("no-dot-here").is_err());
        assert!(SignedQr::parse(".sig").is_err());
    }
}
