use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::signing::Merchant;

/// Where the gateway lives and how this merchant talks to it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL without trailing slash, e.g. `https://pay.example.com`.
    pub base_url: String,
    pub merchant: Merchant,
    pub notify_url: String,
    pub return_url: String,
    /// Per-request timeout for server-to-server calls.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    /// Browser form target.
    pub fn pay_url(&self) -> String {
        format!("{}/submit.php", self.base_url.trim_end_matches('/'))
    }

    /// Server-to-server API endpoint (query/refund).
    pub fn api_url(&self) -> String {
        format!("{}/api.php", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let cfg = GatewayConfig {
            base_url: "https://pay.example.com/".to_string(),
            merchant: Merchant::new("1001", "k"),
            notify_url: String::new(),
            return_url: String::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
        };
        assert_eq!(cfg.pay_url(), "https://pay.example.com/submit.php");
        assert_eq!(cfg.api_url(), "https://pay.example.com/api.php");
    }
}
