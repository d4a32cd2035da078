//! Inbound payment notifications (the gateway's webhook).
//!
//! This module covers the checks that need nothing but the raw parameters
//! and the merchant credentials: required fields, sign type, signature and
//! merchant id. Reconciliation against the stored order happens in the
//! service layer.

use thiserror::Error;

use crate::signing::{Merchant, Params};

/// `trade_status` value meaning the buyer paid.
pub const TRADE_SUCCESS: &str = "TRADE_SUCCESS";

const REQUIRED: [&str; 7] = ["pid", "trade_no", "out_trade_no", "type", "money", "trade_status", "sign"];

/// Why a notification was refused. Logged server-side only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("unsupported sign_type '{0}'")]
    UnsupportedSignType(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("merchant id mismatch: got '{0}'")]
    UntrustedSender(String),
}

/// A notification that passed signature and merchant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub pid: String,
    pub trade_no: String,
    pub out_trade_no: String,
    pub channel: String,
    pub name: Option<String>,
    pub money: String,
    pub trade_status: String,
}

impl Notification {
    /// Required fields, sign type, signature, merchant id; in that order.
    pub fn verify(params: &Params, merchant: &Merchant) -> Result<Self, NotifyError> {
        let field = |name: &'static str| -> Result<String, NotifyError> {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(NotifyError::MissingField(name))
        };
        for name in REQUIRED {
            field(name)?;
        }

        if let Some(sign_type) = params.get("sign_type").filter(|v| !v.is_empty()) {
            if !sign_type.eq_ignore_ascii_case("MD5") {
                return Err(NotifyError::UnsupportedSignType(sign_type.clone()));
            }
        }

        if !merchant.verify(params, &field("sign")?) {
            return Err(NotifyError::SignatureMismatch);
        }

        let pid = field("pid")?;
        if pid != merchant.pid {
            return Err(NotifyError::UntrustedSender(pid));
        }

        Ok(Self {
            pid,
            trade_no: field("trade_no")?,
            out_trade_no: field("out_trade_no")?,
            channel: field("type")?,
            name: params.get("name").filter(|v| !v.is_empty()).cloned(),
            money: field("money")?,
            trade_status: field("trade_status")?,
        })
    }

    pub fn is_trade_success(&self) -> bool {
        self.trade_status == TRADE_SUCCESS
    }
}
