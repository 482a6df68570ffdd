//! `reqwest`-backed [`Transport`].

use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use ticket_sync_core::api::{ApiRequest, ApiResponse, Method, ResponseBody};
use ticket_sync_core::environment::Transport;
use ticket_sync_core::error::RequestError;

/// HTTP client for the ticket API.
///
/// Performs exactly one exchange per call. Deadlines and retries are applied by
/// the request executor, so the client itself is built without a timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a transport for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a transport around an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Send `token` as a bearer credential with every request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn exchange(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .header("accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let body = match serde_json::from_str::<ResponseBody>(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(RequestError::Decode(e.to_string())),
            Err(_) if text.trim().is_empty() => {
                ResponseBody::failure(status.canonical_reason().unwrap_or("request failed"))
            },
            Err(_) => ResponseBody::failure(text),
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, RequestError>> + Send + '_>> {
        Box::pin(self.exchange(request))
    }
}
