//! Client-assisted refunds.
//!
//! Some gateways refuse server-to-server refund calls. The server then hands
//! a trusted operator's browser the exact call to make, plus a short-lived
//! token. When the operator reports the outcome, the token proves the report
//! is about the call this server issued and that it is still fresh. It does
//! not prove the gateway actually refunded anything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use cardvault_core::Amount;

use crate::signing::{Merchant, Params};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("handoff token has expired")]
    Expired,
    #[error("handoff token does not match this refund")]
    BadToken,
}

/// Call parameters for the operator's browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundHandoff {
    pub endpoint: String,
    pub params: Params,
    pub expires_at: DateTime<Utc>,
    pub token: String,
}

fn token_params(order_no: &str, trade_no: &str, money: &str, expires_at: DateTime<Utc>) -> Params {
    let mut p = Params::new();
    p.insert("order_no".to_string(), order_no.to_string());
    p.insert("trade_no".to_string(), trade_no.to_string());
    p.insert("money".to_string(), money.to_string());
    p.insert("expires_at".to_string(), expires_at.timestamp().to_string());
    p
}

impl RefundHandoff {
    pub fn issue(
        endpoint: impl Into<String>,
        merchant: &Merchant,
        order_no: &str,
        trade_no: &str,
        amount: Amount,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let money = amount.to_two_decimals();

        // The gateway's refund API authenticates with the raw key.
        let mut params = Params::new();
        params.insert("act".to_string(), "refund".to_string());
        params.insert("pid".to_string(), merchant.pid.clone());
        params.insert("key".to_string(), merchant.key.expose_secret().to_string());
        params.insert("trade_no".to_string(), trade_no.to_string());
        params.insert("money".to_string(), money.clone());

        let token = merchant.sign(&token_params(order_no, trade_no, &money, expires_at));

        Self {
            endpoint: endpoint.into(),
            params,
            expires_at,
            token,
        }
    }

    /// Check an operator's attestation token against the refund it claims.
    pub fn verify_token(
        merchant: &Merchant,
        order_no: &str,
        trade_no: &str,
        amount: Amount,
        expires_at: DateTime<Utc>,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HandoffError> {
        let params = token_params(order_no, trade_no, &amount.to_two_decimals(), expires_at);
        if !merchant.verify(&params, token) {
            return Err(HandoffError::BadToken);
        }
        if now > expires_at {
            return Err(HandoffError::Expired);
        }
        Ok(())
    }
}
