//! Browser payment form.

use serde::Serialize;

use cardvault_core::Amount;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::signing::Params;

/// Longest product name sent to the gateway, in characters.
pub const MAX_NAME_CHARS: usize = 64;

/// What the merchant wants the buyer to pay for.
#[derive(Debug, Clone)]
pub struct PaymentRequest<'a> {
    pub order_no: &'a str,
    /// Gateway channel (`type` on the wire), e.g. `alipay`.
    pub channel: &'a str,
    pub product_name: &'a str,
    pub amount: Amount,
}

/// Signed form the buyer's browser POSTs to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentForm {
    pub redirect_url: String,
    pub form_fields: Params,
}

pub(crate) fn build(config: &GatewayConfig, req: &PaymentRequest<'_>) -> GatewayResult<PaymentForm> {
    if config.merchant.pid.is_empty() || config.merchant.key.is_empty() {
        return Err(GatewayError::Misconfigured("merchant credentials are not set".to_string()));
    }
    if req.channel.trim().is_empty() {
        return Err(GatewayError::Misconfigured("payment channel is empty".to_string()));
    }

    let mut fields = Params::new();
    fields.insert("pid".to_string(), config.merchant.pid.clone());
    fields.insert("type".to_string(), req.channel.to_string());
    fields.insert("out_trade_no".to_string(), req.order_no.to_string());
    fields.insert("name".to_string(), truncate_name(req.product_name));
    fields.insert("money".to_string(), req.amount.to_two_decimals());
    fields.insert("notify_url".to_string(), config.notify_url.clone());
    fields.insert("return_url".to_string(), config.return_url.clone());

    let sign = config.merchant.sign(&fields);
    fields.insert("sign".to_string(), sign);
    fields.insert("sign_type".to_string(), "MD5".to_string());

    Ok(PaymentForm {
        redirect_url: config.pay_url(),
        form_fields: fields,
    })
}

fn truncate_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_CHARS).collect()
}
