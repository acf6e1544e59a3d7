use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::TrackingBackend;
use crate::error::AppError;
use crate::models::chat::{
    resolve_quick_messages, ChatMessage, QuickMessage, RawQuickMessage, SendMessageRequest,
};
use crate::models::order::{CancelOutcome, CancelRequest, Order, OrderId, OrderListPayload};
use crate::models::tracking::TrackingSnapshot;

#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload<T> {
    Bare(Vec<T>),
    Paginated { results: Vec<T> },
    Messages { messages: Vec<T> },
}

impl<T> ListPayload<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListPayload::Bare(items)
            | ListPayload::Paginated { results: items }
            | ListPayload::Messages { messages: items } => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemPayload<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ItemPayload<T> {
    fn into_inner(self) -> T {
        match self {
            ItemPayload::Wrapped { data } | ItemPayload::Bare(data) => data,
        }
    }
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| AppError::Internal(format!("invalid API token: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("http client: {err}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, AppError> {
        let url = self.url(path);
        trace!(%method, %url, "backend request");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::Transient(format!("{url}: {err}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Transient(format!("{url}: reading body: {err}")))?;

        if !status.is_success() {
            return Err(classify_failure(status, &bytes));
        }

        serde_json::from_slice::<T>(&bytes)
            .map_err(|err| AppError::DataShape(format!("{url}: {err}")))
    }
}

fn classify_failure(status: StatusCode, body: &[u8]) -> AppError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::BAD_REQUEST
        | StatusCode::FORBIDDEN
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => AppError::Rejected(message),
        StatusCode::UNAUTHORIZED => AppError::Unavailable(format!("not authenticated: {message}")),
        _ => AppError::Transient(format!("{status}: {message}")),
    }
}

#[async_trait]
impl TrackingBackend for HttpBackend {
    async fn list_orders(&self) -> Result<Vec<Order>, AppError> {
        let payload: OrderListPayload = self.request(Method::GET, "/orders/", None::<&()>).await?;
        let orders = payload.into_orders();
        debug!(count = orders.len(), "fetched orders");
        Ok(orders)
    }

    async fn fetch_tracking(&self, order_id: OrderId) -> Result<TrackingSnapshot, AppError> {
        let path = format!("/orders/{order_id}/tracking/");
        let value: Value = self.request(Method::GET, &path, None::<&()>).await?;
        TrackingSnapshot::from_value(order_id, value)
    }

    async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<CancelOutcome, AppError> {
        let path = format!("/orders/{order_id}/cancel/");
        let body = CancelRequest {
            reason: reason.to_string(),
        };
        let outcome: CancelOutcome = self.request(Method::POST, &path, Some(&body)).await?;
        if !outcome.success {
            return Err(AppError::Rejected(
                outcome
                    .message
                    .unwrap_or_else(|| "cancellation refused".to_string()),
            ));
        }
        Ok(outcome)
    }

    async fn list_messages(&self, order_id: OrderId) -> Result<Vec<ChatMessage>, AppError> {
        let path = format!("/orders/{order_id}/chat/messages/");
        let payload: ListPayload<ChatMessage> = self.request(Method::GET, &path, None::<&()>).await?;
        Ok(payload
            .into_vec()
            .into_iter()
            .map(|mut message| {
                message.order_id = order_id;
                message
            })
            .collect())
    }

    async fn send_message(
        &self,
        order_id: OrderId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage, AppError> {
        let path = format!("/orders/{order_id}/chat/messages/");
        let payload: ItemPayload<ChatMessage> =
            self.request(Method::POST, &path, Some(request)).await?;
        let mut message = payload.into_inner();
        message.order_id = order_id;
        Ok(message)
    }

    async fn quick_messages(&self, order_id: OrderId) -> Result<Vec<QuickMessage>, AppError> {
        let path = format!("/orders/{order_id}/chat/quick-messages/");
        let payload: ListPayload<RawQuickMessage> =
            self.request(Method::GET, &path, None::<&()>).await?;
        Ok(resolve_quick_messages(payload.into_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_classified_by_status() {
        let body = br#"{"error": "Cancellation window has expired"}"#;
        match classify_failure(StatusCode::BAD_REQUEST, body) {
            AppError::Rejected(message) => assert_eq!(message, "Cancellation window has expired"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, b""),
            AppError::NotFound(_)
        ));
        assert!(classify_failure(StatusCode::BAD_GATEWAY, b"<html>").is_transient());
    }

    #[test]
    fn list_payload_accepts_all_envelopes() {
        let bare: ListPayload<u32> = serde_json::from_str("[1, 2]").unwrap();
        let paginated: ListPayload<u32> = serde_json::from_str(r#"{"results": [3]}"#).unwrap();
        let messages: ListPayload<u32> = serde_json::from_str(r#"{"messages": [4]}"#).unwrap();
        assert_eq!(bare.into_vec(), vec![1, 2]);
        assert_eq!(paginated.into_vec(), vec![3]);
        assert_eq!(messages.into_vec(), vec![4]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("http://api.test/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url("/orders/"), "http://api.test/orders/");
    }
}
