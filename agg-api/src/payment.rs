//! # Payment Gate (x402-style)
//!
//! The grounding workspace's `aerolithdb-plugins::payment` module provides
//! the shape (a manager, pluggable network providers, a config) but
//! targets wallet-to-wallet crypto rails; this is narrower — HTTP 402 plus
//! a single facilitator signature-verification call — so the facilitator
//! is a small trait with one `reqwest`-backed implementation rather than a
//! network-plugin registry.

use agg_core::{ConfigId, Configuration, Payment};
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("missing payment proof")]
    MissingProof,
    #[error("invalid payment proof: {0}")]
    InvalidProof(String),
    #[error("payment already used")]
    AlreadyUsed,
    #[error("payment proof expired")]
    Expired,
}

pub enum PaymentGateOutcome {
    Allowed,
    PaymentRequired(Value),
    InvalidProof(String),
    AlreadyUsed,
}

#[derive(Debug, Deserialize)]
pub struct PaymentProof {
    pub signature: String,
    pub memo: String,
}

/// Parses the `X-Payment-Proof` header, a JSON object `{signature, memo}`.
pub fn parse_proof_header(headers: &HeaderMap) -> Result<PaymentProof, PaymentError> {
    let raw = headers
        .get("X-Payment-Proof")
        .ok_or(PaymentError::MissingProof)?
        .to_str()
        .map_err(|_| PaymentError::InvalidProof("header is not valid utf-8".to_string()))?;
    serde_json::from_str(raw).map_err(|e| PaymentError::InvalidProof(e.to_string()))
}

/// Builds the unique memo carried on a payment-required response and
/// later matched against the submitted proof: `ctx:{configId}:{ts}:{nonce}`.
pub fn generate_memo(config_id: ConfigId, nonce: &str) -> String {
    format!("ctx:{}:{}:{}", config_id, Utc::now().timestamp_millis(), nonce)
}

/// Extracts the millisecond timestamp embedded in a memo produced by
/// [`generate_memo`].
fn memo_timestamp_ms(memo: &str) -> Option<i64> {
    memo.split(':').nth(2)?.parse().ok()
}

fn memo_is_expired(memo: &str, expiry: std::time::Duration) -> bool {
    match memo_timestamp_ms(memo) {
        Some(ts) => Utc::now().timestamp_millis() - ts > expiry.as_millis() as i64,
        None => true,
    }
}

/// Splits a total amount into platform fee and owner amount, flooring the
/// fee (integer division) so any remainder (dust) is left with the owner
/// rather than the platform.
pub fn split_amount(amount: u64, platform_fee_percent_bp: u32) -> (u64, u64) {
    let fee = amount * platform_fee_percent_bp as u64 / 10_000;
    (fee, amount - fee)
}

#[async_trait]
pub trait FacilitatorClient: Send + Sync {
    /// Verifies that `proof` authorizes at least `amount` from payer to
    /// the given recipients under the stated memo.
    async fn verify(
        &self,
        facilitator_url: &str,
        proof: &PaymentProof,
        amount: u64,
        owner_wallet: &str,
        platform_wallet: &str,
    ) -> Result<bool, PaymentError>;
}

pub struct ReqwestFacilitatorClient {
    client: reqwest::Client,
}

impl ReqwestFacilitatorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestFacilitatorClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct FacilitatorVerifyRequest<'a> {
    signature: &'a str,
    memo: &'a str,
    amount: u64,
    owner_wallet: &'a str,
    platform_wallet: &'a str,
}

#[derive(Deserialize)]
struct FacilitatorVerifyResponse {
    valid: bool,
}

#[async_trait]
impl FacilitatorClient for ReqwestFacilitatorClient {
    async fn verify(
        &self,
        facilitator_url: &str,
        proof: &PaymentProof,
        amount: u64,
        owner_wallet: &str,
        platform_wallet: &str,
    ) -> Result<bool, PaymentError> {
        let response = self
            .client
            .post(facilitator_url)
            .json(&FacilitatorVerifyRequest {
                signature: &proof.signature,
                memo: &proof.memo,
                amount,
                owner_wallet,
                platform_wallet,
            })
            .send()
            .await
            .map_err(|e| PaymentError::InvalidProof(e.to_string()))?;

        let body: FacilitatorVerifyResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidProof(e.to_string()))?;
        Ok(body.valid)
    }
}

/// Checks whether `caller` may read a monetized configuration: owners
/// bypass unconditionally; everyone else must present a settled,
/// previously-verified payment's `tx_signature` as the proof's signature,
/// or a fresh proof this call then verifies and records.
pub async fn check_gate(
    state: &AppState,
    facilitator: &dyn FacilitatorClient,
    config_id: ConfigId,
    caller: Option<Uuid>,
    headers: &HeaderMap,
) -> PaymentGateOutcome {
    let config = match state.configs.get(&config_id) {
        Some(c) => c.clone(),
        None => return PaymentGateOutcome::Allowed,
    };

    let Some(price) = config.price_per_query else {
        return PaymentGateOutcome::Allowed;
    };

    if caller == Some(config.owner_id) {
        return PaymentGateOutcome::Allowed;
    }

    let proof = match parse_proof_header(headers) {
        Ok(proof) => proof,
        Err(PaymentError::MissingProof) => {
            return PaymentGateOutcome::PaymentRequired(payment_required_body(&config, price, state));
        }
        Err(PaymentError::InvalidProof(message)) => return PaymentGateOutcome::InvalidProof(message),
        Err(_) => unreachable!("parse_proof_header only returns MissingProof or InvalidProof"),
    };

    // Each request is its own paid query: a signature is single-use, so a
    // replayed proof is rejected here rather than treated as still-valid
    // access, matching the "payment already used" contract.
    let payer = caller.map(|u| u.to_string()).unwrap_or_else(|| "anonymous".to_string());
    match verify_and_record(state, facilitator, config_id, payer, proof, price).await {
        Ok(_) => PaymentGateOutcome::Allowed,
        Err(PaymentError::AlreadyUsed) => PaymentGateOutcome::AlreadyUsed,
        Err(err) => PaymentGateOutcome::InvalidProof(err.to_string()),
    }
}

fn payment_required_body(config: &Configuration, price: u64, state: &AppState) -> Value {
    let nonce = Uuid::new_v4().to_string();
    let memo = generate_memo(config.id, &nonce);
    json!({
        "amount": price,
        "currency": "usdc",
        "network": "base",
        "recipient": config.owner_wallet,
        "platformWallet": state.settings.platform_wallet,
        "platformFeePercentBp": state.settings.platform_fee_percent_bp,
        "facilitatorUrl": state.settings.facilitator_url,
        "memo": memo,
        "expiresAt": (Utc::now() + state.settings.payment_expiry()).to_rfc3339(),
    })
}

/// Completes verification given a submitted proof: checks uniqueness,
/// then defers to the facilitator for signature validity.
pub async fn verify_and_record(
    state: &AppState,
    facilitator: &dyn FacilitatorClient,
    config_id: ConfigId,
    payer: String,
    proof: PaymentProof,
    amount: u64,
) -> Result<Payment, PaymentError> {
    if state.payments.contains_key(&proof.signature) {
        return Err(PaymentError::AlreadyUsed);
    }

    if memo_is_expired(&proof.memo, state.settings.payment_expiry()) {
        return Err(PaymentError::Expired);
    }

    let config = state
        .configs
        .get(&config_id)
        .map(|c| c.clone())
        .ok_or_else(|| PaymentError::InvalidProof("unknown configuration".to_string()))?;
    let owner_wallet = config.owner_wallet.clone().unwrap_or_default();

    let valid = facilitator
        .verify(
            &state.settings.facilitator_url,
            &proof,
            amount,
            &owner_wallet,
            &state.settings.platform_wallet,
        )
        .await?;
    if !valid {
        return Err(PaymentError::InvalidProof("facilitator rejected proof".to_string()));
    }

    let (platform_fee, owner_amount) = split_amount(amount, state.settings.platform_fee_percent_bp);
    let payment = Payment {
        config_id,
        payer,
        amount,
        platform_fee,
        owner_amount,
        tx_signature: proof.signature.clone(),
        memo: proof.memo,
        created_at: Utc::now(),
    };

    state.payments.insert(proof.signature, payment.clone());
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_split_floors_and_leaves_dust_with_owner() {
        let (fee, owner) = split_amount(101, 250);
        assert_eq!(fee, 2);
        assert_eq!(owner, 99);
        assert_eq!(fee + owner, 101);
    }

    #[test]
    fn memo_carries_config_id_and_is_unique_per_call() {
        let config_id = ConfigId(Uuid::new_v4());
        let a = generate_memo(config_id, "nonce-a");
        let b = generate_memo(config_id, "nonce-b");
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("ctx:{config_id}:")));
    }

    #[test]
    fn fresh_memo_is_not_expired() {
        let config_id = ConfigId(Uuid::new_v4());
        let memo = generate_memo(config_id, "nonce");
        assert!(!memo_is_expired(&memo, std::time::Duration::from_secs(300)));
    }

    #[test]
    fn malformed_memo_is_treated_as_expired() {
        assert!(memo_is_expired("not-a-memo", std::time::Duration::from_secs(300)));
    }
}
