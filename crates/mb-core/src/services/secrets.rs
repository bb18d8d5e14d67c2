use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;

use crate::error::{FleetError, Result};
use crate::models::Credentials;

pub const DEFAULT_DASHBOARD_USER: &str = "supabase";
const JWT_ISSUER: &str = "supabase";

/// Source of instance credentials. Consumed once at creation and again on
/// explicit rotation.
pub trait SecretsGenerator: Send + Sync {
    fn generate(&self) -> Result<Credentials>;

    /// Replace the JWT secret, both API keys and the database password.
    /// Everything else is left as is.
    fn rotate_keys(&self, credentials: &mut Credentials) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RandomSecrets {
    expiry_years: i64,
}

impl RandomSecrets {
    pub fn new(expiry_years: i64) -> Self {
        Self {
            expiry_years: expiry_years.max(1),
        }
    }

    fn keys_for(&self, jwt_secret: &str) -> Result<(String, String)> {
        let anon = sign_role_token(jwt_secret, "anon", self.expiry_years)?;
        let service = sign_role_token(jwt_secret, "service_role", self.expiry_years)?;
        Ok((anon, service))
    }
}

impl Default for RandomSecrets {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SecretsGenerator for RandomSecrets {
    fn generate(&self) -> Result<Credentials> {
        let jwt_secret = random_string(40);
        let (anon_key, service_role_key) = self.keys_for(&jwt_secret)?;
        Ok(Credentials {
            jwt_secret,
            anon_key,
            service_role_key,
            postgres_password: random_string(32),
            dashboard_username: DEFAULT_DASHBOARD_USER.to_string(),
            dashboard_password: random_string(16),
            secret_key_base: random_string(64),
            vault_enc_key: random_string(32),
            logflare_api_key: random_string(32),
        })
    }

    fn rotate_keys(&self, credentials: &mut Credentials) -> Result<()> {
        let jwt_secret = random_string(40);
        let (anon_key, service_role_key) = self.keys_for(&jwt_secret)?;
        credentials.jwt_secret = jwt_secret;
        credentials.anon_key = anon_key;
        credentials.service_role_key = service_role_key;
        credentials.postgres_password = random_string(32);
        Ok(())
    }
}

pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// HS256 token carrying `{role, iss, iat, exp}`.
pub fn sign_role_token(secret: &str, role: &str, expiry_years: i64) -> Result<String> {
    let now = Utc::now();
    let exp = now + Duration::days(365 * expiry_years);
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let payload = serde_json::json!({
        "role": role,
        "iss": JWT_ISSUER,
        "iat": now.timestamp(),
        "exp": exp.timestamp(),
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| FleetError::Validation(format!("jwt secret: {e}")))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

/// True when `token` is an HS256 token whose signature checks out against
/// `secret`.
pub fn token_signed_with(secret: &str, token: &str) -> bool {
    let Some((signing_input, signature)) = token.rsplit_once('.') else {
        return false;
    };
    let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// Decoded payload of a JWT, without checking the signature.
pub fn token_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}
