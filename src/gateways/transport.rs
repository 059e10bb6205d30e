use crate::gateways::GatewayError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub fn build_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default http client: {}", e);
            reqwest::Client::new()
        })
}

/// Sends the request and decodes a 2xx JSON body into `T`.
pub async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, GatewayError> {
    let resp = request.send().await;

    match resp {
        Ok(r) if r.status().is_success() => r.json::<T>().await.map_err(|e| GatewayError::Decode(e.to_string())),
        Ok(r) => {
            let status = r.status();
            let body: String = r.text().await.unwrap_or_default().chars().take(500).collect();
            Err(classify_status(status, body))
        }
        Err(e) if e.is_timeout() => Err(GatewayError::Timeout),
        Err(e) => Err(GatewayError::Network(e.to_string())),
    }
}

fn classify_status(status: StatusCode, body: String) -> GatewayError {
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GatewayError::Timeout
    } else if status.is_server_error() {
        GatewayError::Unavailable {
            status: status.as_u16(),
            body,
        }
    } else if status == StatusCode::NOT_FOUND {
        GatewayError::NotFound(body)
    } else {
        GatewayError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}
