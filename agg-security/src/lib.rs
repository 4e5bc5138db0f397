//! # Secret Store
//!
//! Encrypted-at-rest, per-configuration secret bag with reference
//! expansion at dispatch time.
//!
//! Values are sealed with `ring`'s AEAD (`CHACHA20_POLY1305`) under a
//! process-wide symmetric key, one nonce per value. Encryption is the only
//! cryptographic primitive this component needs — there is no key rotation
//! or multi-algorithm agility here, unlike the grounding database's
//! `SecurityFramework`, which additionally manages zero-trust policy and
//! compliance modes that this runtime has no use for.

use agg_core::ConfigId;
use dashmap::DashMap;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("missing secret: {0}")]
    MissingSecret(String),
    #[error("secret store key is not configured")]
    KeyNotConfigured,
    #[error("encryption failure: {0}")]
    Crypto(String),
}

/// A single encrypted secret value.
#[derive(Debug, Clone)]
struct SealedSecret {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Per-configuration encrypted secret bag.
///
/// `decrypt` is only ever called from [`resolve_parameters`] — the single
/// recursive walk that is allowed to bring secret plaintext into memory,
/// per the design note about centralizing where `process.env.X` references
/// are expanded.
pub struct SecretStore {
    key: LessSafeKey,
    rng: SystemRandom,
    secrets: DashMap<ConfigId, HashMap<String, SealedSecret>>,
}

impl SecretStore {
    /// Build a store from a 32-byte symmetric key.
    pub fn new(key_bytes: &[u8]) -> Result<Self, SecretError> {
        let unbound = UnboundKey::new(&CHACHA20_POLY1305, key_bytes)
            .map_err(|_| SecretError::Crypto("invalid key length".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            secrets: DashMap::new(),
        })
    }

    pub fn set_secret(
        &self,
        config_id: ConfigId,
        name: &str,
        plaintext: &str,
    ) -> Result<(), SecretError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SecretError::Crypto("rng failure".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Crypto("seal failure".to_string()))?;

        self.secrets
            .entry(config_id)
            .or_default()
            .insert(
                name.to_string(),
                SealedSecret {
                    nonce: nonce_bytes,
                    ciphertext: in_out,
                },
            );
        debug!(config_id = %config_id, secret = name, "secret stored");
        Ok(())
    }

    fn decrypt(&self, config_id: ConfigId, name: &str) -> Result<String, SecretError> {
        let bag = self
            .secrets
            .get(&config_id)
            .ok_or_else(|| SecretError::MissingSecret(name.to_string()))?;
        let sealed = bag
            .get(name)
            .ok_or_else(|| SecretError::MissingSecret(name.to_string()))?;

        let nonce = Nonce::assume_unique_for_key(sealed.nonce);
        let mut in_out = sealed.ciphertext.clone();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Crypto("open failure".to_string()))?;

        String::from_utf8(plaintext.to_vec()).map_err(|e| SecretError::Crypto(e.to_string()))
    }
}

/// Prefix that marks a parameter value as a secret reference.
const ENV_REF_PREFIX: &str = "process.env.";

/// Recursively walk a parameter tree, replacing any string value of the
/// form `process.env.<NAME>` with the decrypted plaintext of `<NAME>` from
/// the configuration's secret bag.
///
/// This is the only place secrets enter plaintext form, which keeps the
/// audit surface to one function per the design notes.
pub fn resolve_parameters(
    store: &SecretStore,
    config_id: ConfigId,
    params: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>, SecretError> {
    let mut resolved = HashMap::with_capacity(params.len());
    for (key, value) in params {
        resolved.insert(key.clone(), resolve_value(store, config_id, value)?);
    }
    Ok(resolved)
}

fn resolve_value(
    store: &SecretStore,
    config_id: ConfigId,
    value: &Value,
) -> Result<Value, SecretError> {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix(ENV_REF_PREFIX) {
                let plaintext = store.decrypt(config_id, name)?;
                Ok(Value::String(plaintext))
            } else {
                Ok(value.clone())
            }
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(store, config_id, v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(store, config_id, item)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Thin wrapper so callers can share a store without threading `&` lifetimes
/// through job-creation code; mirrors how other components hold their
/// dependencies as `Arc<T>`.
pub type SharedSecretStore = Arc<SecretStore>;

pub fn warn_if_key_missing(settings: &agg_core::RuntimeSettings) {
    if settings.secret_key_b64.is_none() {
        warn!("AGG_SECRET_KEY is not set; secret references cannot be resolved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn store() -> SecretStore {
        SecretStore::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_a_secret() {
        let store = store();
        let config_id = ConfigId(Uuid::new_v4());
        store.set_secret(config_id, "DISCORD_TOKEN", "super-secret").unwrap();
        assert_eq!(store.decrypt(config_id, "DISCORD_TOKEN").unwrap(), "super-secret");
    }

    #[test]
    fn missing_secret_is_typed_error() {
        let store = store();
        let config_id = ConfigId(Uuid::new_v4());
        let err = store.decrypt(config_id, "NOPE").unwrap_err();
        assert!(matches!(err, SecretError::MissingSecret(_)));
    }

    #[test]
    fn resolves_nested_references_only() {
        let store = store();
        let config_id = ConfigId(Uuid::new_v4());
        store.set_secret(config_id, "API_KEY", "sk-test").unwrap();

        let mut params = HashMap::new();
        params.insert("literal".to_string(), Value::from("unchanged"));
        params.insert("secret".to_string(), Value::from("process.env.API_KEY"));
        let mut nested = serde_json::Map::new();
        nested.insert("inner".to_string(), Value::from("process.env.API_KEY"));
        params.insert("nested".to_string(), Value::Object(nested));

        let resolved = resolve_parameters(&store, config_id, &params).unwrap();
        assert_eq!(resolved["literal"], Value::from("unchanged"));
        assert_eq!(resolved["secret"], Value::from("sk-test"));
        assert_eq!(resolved["nested"]["inner"], Value::from("sk-test"));
    }
}
