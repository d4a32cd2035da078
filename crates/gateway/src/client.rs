//! Server-to-server gateway calls.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use cardvault_core::Amount;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::handoff::RefundHandoff;
use crate::request::{self, PaymentForm, PaymentRequest};
use crate::retry::retry_with_predicate;
use crate::signing::Merchant;

/// How to find a trade at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLookup {
    /// Gateway-side trade number.
    TradeNo(String),
    /// Merchant order number (`out_trade_no`).
    OutTradeNo(String),
}

impl OrderLookup {
    fn as_pair(&self) -> (&'static str, &str) {
        match self {
            OrderLookup::TradeNo(v) => ("trade_no", v),
            OrderLookup::OutTradeNo(v) => ("out_trade_no", v),
        }
    }
}

/// The gateway's view of a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayOrder {
    pub trade_no: String,
    pub out_trade_no: String,
    pub channel: String,
    pub money: String,
    pub paid: bool,
}

/// Everything the core needs from the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn merchant(&self) -> &Merchant;

    /// Signed form for the buyer's browser.
    fn build_payment_request(&self, req: &PaymentRequest<'_>) -> GatewayResult<PaymentForm>;

    async fn query_order(&self, lookup: OrderLookup) -> GatewayResult<GatewayOrder>;

    /// Refund `amount` of `trade_no`. `Ok` only when the gateway answers code 1.
    async fn refund(&self, trade_no: &str, amount: Amount) -> GatewayResult<()>;

    /// Call parameters for an operator's browser to perform the refund itself.
    fn manual_refund_handoff(
        &self,
        order_no: &str,
        trade_no: &str,
        amount: Amount,
        expires_at: DateTime<Utc>,
    ) -> RefundHandoff;
}

/// `reqwest`-backed gateway client.
#[derive(Debug, Clone)]
pub struct HttpGatewayClient {
    config: GatewayConfig,
    http: reqwest::Client,
}

/// A failed call plus whether the request may have reached the gateway.
#[derive(Debug)]
struct CallError {
    error: GatewayError,
    delivered: bool,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl CallError {
    fn undelivered(error: GatewayError) -> Self {
        Self {
            error,
            delivered: false,
        }
    }

    fn delivered(error: GatewayError) -> Self {
        Self {
            error,
            delivered: true,
        }
    }
}

impl HttpGatewayClient {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Misconfigured(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn call(&self, act: &str, extra: &[(&str, &str)]) -> Result<Value, CallError> {
        let merchant = &self.config.merchant;
        let mut form: Vec<(&str, &str)> = vec![
            ("act", act),
            ("pid", merchant.pid.as_str()),
            ("key", merchant.key.expose_secret()),
        ];
        form.extend_from_slice(extra);

        let response = self
            .http
            .post(self.config.api_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CallError::undelivered(e.into())
                } else {
                    CallError::delivered(e.into())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::delivered(e.into()))?;
        if !status.is_success() {
            return Err(CallError::delivered(GatewayError::unavailable(format!(
                "gateway answered HTTP {status}"
            ))));
        }

        parse_api_response(&body).map_err(CallError::delivered)
    }
}

/// Interpret an API body: JSON with numeric `code`, where 1 is success.
///
/// Non-JSON bodies (challenge pages, proxies) count as unavailability, not as
/// a business answer.
pub fn parse_api_response(body: &str) -> GatewayResult<Value> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| GatewayError::unavailable("gateway returned a non-JSON body"))?;
    let code = match &value["code"] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| GatewayError::unavailable("gateway response has no numeric code"))?;

    if code != 1 {
        let message = value["msg"].as_str().unwrap_or("").to_string();
        return Err(GatewayError::Rejected { code, message });
    }
    Ok(value)
}

fn text_field(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn gateway_order(value: &Value) -> GatewayOrder {
    let paid = match &value["status"] {
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.trim() == "1",
        _ => false,
    };
    GatewayOrder {
        trade_no: text_field(value, "trade_no"),
        out_trade_no: text_field(value, "out_trade_no"),
        channel: text_field(value, "type"),
        money: text_field(value, "money"),
        paid,
    }
}

#[async_trait]
impl PaymentGateway for HttpGatewayClient {
    fn merchant(&self) -> &Merchant {
        &self.config.merchant
    }

    fn build_payment_request(&self, req: &PaymentRequest<'_>) -> GatewayResult<PaymentForm> {
        request::build(&self.config, req)
    }

    #[tracing::instrument(skip(self))]
    async fn query_order(&self, lookup: OrderLookup) -> GatewayResult<GatewayOrder> {
        let extra = [lookup.as_pair()];
        let body = retry_with_predicate(
            &self.config.retry,
            || self.call("order", &extra),
            |e| e.error.is_unavailable(),
        )
        .await
        .map_err(|e| e.error)?;
        Ok(gateway_order(&body))
    }

    #[tracing::instrument(skip(self, amount), fields(amount = %amount))]
    async fn refund(&self, trade_no: &str, amount: Amount) -> GatewayResult<()> {
        let money = amount.to_two_decimals();
        let extra = [("trade_no", trade_no), ("money", money.as_str())];
        // A refund that may have reached the gateway is never re-sent.
        retry_with_predicate(
            &self.config.retry,
            || self.call("refund", &extra),
            |e| !e.delivered,
        )
        .await
        .map_err(|e| e.error)?;
        Ok(())
    }

    fn manual_refund_handoff(
        &self,
        order_no: &str,
        trade_no: &str,
        amount: Amount,
        expires_at: DateTime<Utc>,
    ) -> RefundHandoff {
        RefundHandoff::issue(
            self.config.api_url(),
            &self.config.merchant,
            order_no,
            trade_no,
            amount,
            expires_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use axum::extract::Form;
    use axum::routing::post;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn api_codes_are_classified() {
        assert!(parse_api_response(r#"{"code":1,"msg":"ok"}"#).is_ok());
        assert_eq!(
            parse_api_response(r#"{"code":0,"msg":"insufficient balance"}"#),
            Err(GatewayError::Rejected {
                code: 0,
                message: "insufficient balance".to_string()
            })
        );
        assert!(matches!(
            parse_api_response("<html>challenge</html>"),
            Err(GatewayError::Unavailable(_))
        ));
        assert!(matches!(
            parse_api_response(r#"{"msg":"no code"}"#),
            Err(GatewayError::Unavailable(_))
        ));
        assert!(parse_api_response(r#"{"code":"1"}"#).is_ok());
    }

    #[test]
    fn query_body_maps_to_gateway_order() {
        let v: Value = serde_json::from_str(
            r#"{"code":1,"trade_no":"T9","out_trade_no":"O9","type":"wxpay","money":"10.00","status":1}"#,
        )
        .unwrap();
        let order = gateway_order(&v);
        assert!(order.paid);
        assert_eq!(order.money, "10.00");
        assert_eq!(order.channel, "wxpay");
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String, max_retries: usize) -> HttpGatewayClient {
        HttpGatewayClient::new(GatewayConfig {
            base_url,
            merchant: Merchant::new("1001", "merchant-key"),
            notify_url: String::new(),
            return_url: String::new(),
            timeout: Duration::from_millis(500),
            retry: RetryPolicy {
                max_retries,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn refund_sends_merchant_credentials() {
        let seen = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let captured = seen.clone();
        let app = Router::new().route(
            "/api.php",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = form;
                    r#"{"code":1,"msg":"ok"}"#
                }
            }),
        );
        let gw = client(spawn(app).await, 0);

        gw.refund("T1", Amount::parse("10").unwrap()).await.unwrap();

        let form = seen.lock().unwrap().clone();
        assert_eq!(form["act"], "refund");
        assert_eq!(form["pid"], "1001");
        assert_eq!(form["key"], "merchant-key");
        assert_eq!(form["money"], "10.00");
    }

    #[tokio::test]
    async fn delivered_refunds_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api.php",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "<html>checking your browser</html>"
                }
            }),
        );
        let gw = client(spawn(app).await, 3);

        let err = gw.refund("T1", Amount::parse("1").unwrap()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queries_retry_while_unavailable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api.php",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        "not json".to_string()
                    } else {
                        r#"{"code":1,"trade_no":"T1","out_trade_no":"O1","type":"alipay","money":"5.00","status":1}"#
                            .to_string()
                    }
                }
            }),
        );
        let gw = client(spawn(app).await, 2);

        let order = gw
            .query_order(OrderLookup::OutTradeNo("O1".to_string()))
            .await
            .unwrap();
        assert!(order.paid);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let gw = client("http://127.0.0.1:9".to_string(), 1);
        let err = gw
            .query_order(OrderLookup::TradeNo("T1".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
