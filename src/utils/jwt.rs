use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey,
                   Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppErr, AppResult};

/// Tokens grant control of one room and expire after a week.
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    room: String,
    exp: i64,
}

#[derive(Clone)]
pub struct TokenService {
    enc: EncodingKey,
    dec: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            enc: EncodingKey::from_secret(secret.as_bytes()),
            dec: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, room: &str) -> AppResult<String> {
        let claims = Claims {
            room: room.into(),
            exp: Utc::now().timestamp() + TOKEN_TTL_SECS,
        };
        Ok(encode(&Header::default(), &claims, &self.enc)?)
    }

    /// The room a token grants. Bad signature, expiry and malformed
    /// input all come back as `Unauthorized`, never as "no token".
    pub fn verify(&self, token: &str) -> AppResult<String> {
        decode::<Claims>(token, &self.dec, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims.room)
            .map_err(|_| AppErr::Unauthorized("invalid or expired token".into()))
    }

    pub fn authorize(&self, token: &str, room: &str) -> AppResult<()> {
        let granted = self.verify(token)?;
        if granted != room {
            return Err(AppErr::Unauthorized(format!(
                "token is not valid for room '{room}'"
            )));
        }
        Ok(())
    }
}
