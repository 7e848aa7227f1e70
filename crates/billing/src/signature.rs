//! Webhook signature verification
//!
//! Paddle signs webhook deliveries with a header of the form
//! `ts=<unix-seconds>;h1=<hex-hmac>` where the MAC is HMAC-SHA256 over
//! `"{ts}:{body}"` with the shared webhook secret. Verification fails closed:
//! any missing component, malformed header, or mismatch is reported as an
//! invalid signature and nothing downstream runs.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Verifies raw webhook payloads before anything parses them.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify `signature_header` against the raw request body.
    ///
    /// The body is treated as an opaque byte string; it is never parsed
    /// before this step.
    pub fn verify(&self, body: &[u8], signature_header: &str) -> BillingResult<()> {
        let (ts, received_mac) = parse_signature_header(signature_header)?;

        let received = hex::decode(received_mac).map_err(|_| {
            tracing::warn!("Webhook signature h1 component is not valid hex");
            BillingError::WebhookSignatureInvalid
        })?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(ts.as_bytes());
        mac.update(b":");
        mac.update(body);
        let computed = mac.finalize().into_bytes();

        // Constant-time comparison over the raw MAC bytes
        if computed.ct_eq(received.as_slice()).into() {
            Ok(())
        } else {
            tracing::warn!("Webhook signature mismatch");
            Err(BillingError::WebhookSignatureInvalid)
        }
    }
}

/// Parse `ts=<unix-seconds>;h1=<hex>` into its components.
///
/// The timestamp is validated as an integer here but staleness is judged
/// later, from the event's own `occurred_at`, by the replay window filter.
fn parse_signature_header(header: &str) -> BillingResult<(&str, &str)> {
    let mut ts: Option<&str> = None;
    let mut h1: Option<&str> = None;

    for part in header.split(';') {
        match part.split_once('=') {
            Some(("ts", value)) => ts = Some(value),
            Some(("h1", value)) => h1 = Some(value),
            _ => {}
        }
    }

    let ts = ts.ok_or(BillingError::WebhookSignatureInvalid)?;
    let h1 = h1.ok_or(BillingError::WebhookSignatureInvalid)?;

    if ts.is_empty() || ts.parse::<i64>().is_err() {
        return Err(BillingError::WebhookSignatureInvalid);
    }
    if h1.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok((ts, h1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.as_bytes());
        mac.update(b":");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn header(secret: &str, ts: &str, body: &[u8]) -> String {
        format!("ts={};h1={}", ts, sign(secret, ts, body))
    }

    #[test]
    fn accepts_valid_signature() {
        let verifier = SignatureVerifier::new("whsec_test");
        let body = br#"{"event_type":"subscription.created"}"#;
        let sig = header("whsec_test", "1700000000", body);
        assert!(verifier.verify(body, &sig).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = SignatureVerifier::new("whsec_test");
        let sig = header("whsec_test", "1700000000", b"original");
        assert!(matches!(
            verifier.verify(b"tampered", &sig),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = SignatureVerifier::new("whsec_real");
        let body = b"payload";
        let sig = header("whsec_other", "1700000000", body);
        assert!(verifier.verify(body, &sig).is_err());
    }

    #[test]
    fn rejects_tampered_timestamp() {
        let verifier = SignatureVerifier::new("whsec_test");
        let body = b"payload";
        // Valid MAC over ts=100, header claims ts=200
        let mac = sign("whsec_test", "100", body);
        let sig = format!("ts=200;h1={mac}");
        assert!(verifier.verify(body, &sig).is_err());
    }

    #[test]
    fn rejects_malformed_headers() {
        let verifier = SignatureVerifier::new("whsec_test");
        let body = b"payload";
        let cases = [
            "",
            "ts=1700000000",
            "h1=deadbeef",
            "ts=;h1=deadbeef",
            "ts=notanumber;h1=deadbeef",
            "ts=1700000000;h1=",
            "ts=1700000000;h1=nothex!!",
            "garbage",
        ];
        for case in cases {
            assert!(
                verifier.verify(body, case).is_err(),
                "header {case:?} should be rejected"
            );
        }
    }
}
