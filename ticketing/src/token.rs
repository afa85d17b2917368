//! HMAC-SHA256 redemption tokens.
//!
//! Format: `v1.<claims>.<signature>`, where `claims` is the base64url (unpadded)
//! JSON encoding of [`TicketClaims`] and `signature` is the base64url HMAC-SHA256
//! of the string `v1.<claims>`. Scanners verify offline with the shared key; the
//! ticket row remains the authority on status.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use turnstile_core::RedemptionToken;
use turnstile_core::token::{TicketClaims, TokenError, TokenIssuer, TokenVerifier};

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v1";

/// Signs and verifies redemption tokens with a shared secret.
#[derive(Clone)]
pub struct HmacTokenSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for HmacTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenSigner").finish_non_exhaustive()
    }
}

impl HmacTokenSigner {
    /// Create a signer from the raw secret.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, signed: &str) -> Result<HmacSha256, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| TokenError::Key(e.to_string()))?;
        mac.update(signed.as_bytes());
        Ok(mac)
    }
}

impl TokenIssuer for HmacTokenSigner {
    fn issue(&self, claims: &TicketClaims) -> Result<RedemptionToken, TokenError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signed = format!("{VERSION}.{}", URL_SAFE_NO_PAD.encode(payload));
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&signed)?.finalize().into_bytes());
        Ok(RedemptionToken::new(format!("{signed}.{signature}")))
    }
}

impl TokenVerifier for HmacTokenSigner {
    fn verify(&self, token: &str) -> Result<TicketClaims, TokenError> {
        let (signed, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature".to_string()))?;
        let (version, payload) = signed
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing payload".to_string()))?;
        if version != VERSION {
            return Err(TokenError::Malformed(format!("unsupported version {version:?}")));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| TokenError::Malformed(format!("signature: {e}")))?;
        self.mac(signed)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
        serde_json::from_slice(&payload).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}
