use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TTL_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Serialize)]
pub struct CaptchaChallenge {
    pub question: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CaptchaPayload {
    answer: i64,
    ts: i64,
}

/// Stateless arithmetic captcha: the answer travels inside an HMAC-signed token.
pub struct CaptchaService {
    secret: String,
}

impl CaptchaService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn generate(&self) -> anyhow::Result<CaptchaChallenge> {
        let mut rng = rand::rng();
        let a: i64 = rng.random_range(1..=9);
        let b: i64 = rng.random_range(1..=9);
        let add = rng.random_bool(0.5);
        let (answer, op) = if add { (a + b, '+') } else { (a - b, '-') };

        let token = self.issue(answer, Utc::now().timestamp_millis())?;
        Ok(CaptchaChallenge {
            question: format!("{a} {op} {b} = ?"),
            token,
        })
    }

    fn issue(&self, answer: i64, ts: i64) -> anyhow::Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&CaptchaPayload { answer, ts })?);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    fn mac(&self, payload: &str) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid captcha secret: {e}"))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn verify(&self, token: &str, answer: &str) -> bool {
        self.verify_at(token, answer, Utc::now().timestamp_millis())
    }

    fn verify_at(&self, token: &str, answer: &str, now_ms: i64) -> bool {
        let Some((payload, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        // verify_slice compares in constant time
        let Ok(mac) = self.mac(payload) else {
            return false;
        };
        if mac.verify_slice(&signature).is_err() {
            return false;
        }

        let Some(data) = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<CaptchaPayload>(&bytes).ok())
        else {
            return false;
        };

        if now_ms - data.ts > TTL_MS {
            return false;
        }

        answer
            .trim()
            .parse::<i64>()
            .is_ok_and(|given| given == data.answer)
    }
}
