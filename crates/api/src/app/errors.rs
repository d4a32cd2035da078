use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cardvault_infra::services::ServiceError;

/// Who is reading the error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Terse messages, no upstream detail.
    Buyer,
    /// Names the failed precondition.
    Operator,
}

pub fn service_error_to_response(err: ServiceError, audience: Audience) -> axum::response::Response {
    let operator = audience == Audience::Operator;
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        ServiceError::Forbidden(msg) => {
            let msg = if operator { msg } else { "forbidden".to_string() };
            json_error(StatusCode::FORBIDDEN, "forbidden", msg)
        }
        ServiceError::InsufficientStock { requested, available } => json_error(
            StatusCode::CONFLICT,
            "insufficient_stock",
            format!("only {available} of {requested} requested cards are available"),
        ),
        ServiceError::InvalidStateTransition { from, to } => {
            let msg = if operator {
                format!("order cannot move from {from} to {to}")
            } else {
                format!("order is {from}")
            };
            json_error(StatusCode::CONFLICT, "invalid_state", msg)
        }
        ServiceError::GatewayUnavailable(detail) => {
            let msg = if operator {
                format!("payment gateway unavailable: {detail}")
            } else {
                "payment service is temporarily unavailable".to_string()
            };
            json_error(StatusCode::BAD_GATEWAY, "gateway_unavailable", msg)
        }
        ServiceError::GatewayRejected { code, message } => {
            let msg = if operator {
                format!("payment gateway refused (code {code}): {message}")
            } else {
                "payment service refused the request".to_string()
            };
            json_error(StatusCode::BAD_GATEWAY, "gateway_rejected", msg)
        }
        ServiceError::PartialSuccess { order_no, reason } => (
            StatusCode::ACCEPTED,
            axum::Json(json!({
                "error": "partial_success",
                "message": reason,
                "order_no": order_no,
                "resume_url": format!("/orders/{order_no}/pay"),
            })),
        )
            .into_response(),
        ServiceError::Conflict(msg) => {
            let msg = if operator { msg } else { "order was changed concurrently".to_string() };
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        ServiceError::Internal(detail) => {
            tracing::error!(%detail, "internal error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (ServiceError::validation("x"), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound, StatusCode::NOT_FOUND),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                ServiceError::InsufficientStock {
                    requested: 2,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (ServiceError::GatewayUnavailable("t".into()), StatusCode::BAD_GATEWAY),
            (
                ServiceError::PartialSuccess {
                    order_no: "1".into(),
                    reason: "r".into(),
                },
                StatusCode::ACCEPTED,
            ),
            (ServiceError::conflict("x"), StatusCode::CONFLICT),
            (ServiceError::internal("db down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(service_error_to_response(err, Audience::Buyer).status(), status);
        }
    }
}
