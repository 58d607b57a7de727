use async_trait::async_trait;
use reqwest::header;
use tokio::time::timeout;

use crate::{
    classify::{classify, outcome_from_reqwest, TimeoutPhase, TransportOutcome},
    types::RawResponse,
    ApiError, ClientOptions, RequestDescriptor,
};

/// Performs exactly one HTTP exchange.
///
/// Implementations classify every failure, including non-success statuses,
/// into an [`ApiError`]; retries and credential handling live above this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    options: ClientOptions,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, options: ClientOptions) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .build()
            .map_err(|err| classify(TransportOutcome::Unknown(err.to_string())))?;
        Ok(Self::with_http(http, base_url, options))
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            options,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn exchange(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let mut builder = self
            .http
            .request(request.method.to_reqwest(), self.url_for(&request.path))
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = timeout(self.options.send_timeout(), builder.send())
            .await
            .map_err(|_| classify(TransportOutcome::Timeout(TimeoutPhase::Send)))?
            .map_err(|err| classify(outcome_from_reqwest(&err, TimeoutPhase::Send)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = timeout(self.options.receive_timeout(), response.bytes())
            .await
            .map_err(|_| classify(TransportOutcome::Timeout(TimeoutPhase::Receive)))?
            .map_err(|err| classify(outcome_from_reqwest(&err, TimeoutPhase::Receive)))?;

        if !status.is_success() {
            return Err(classify(TransportOutcome::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }));
        }

        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        match &request.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(classify(TransportOutcome::Cancelled)),
                    result = self.exchange(request, bearer) => result,
                }
            }
            None => self.exchange(request, bearer).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HttpTransport;
    use crate::ClientOptions;

    #[test]
    fn joins_base_url_and_path() {
        let transport = HttpTransport::with_http(
            reqwest::Client::new(),
            "https://api.example.test/v1/",
            ClientOptions::default(),
        );
        assert_eq!(transport.base_url(), "https://api.example.test/v1");
        assert_eq!(
            transport.url_for("/shows"),
            "https://api.example.test/v1/shows"
        );
        assert_eq!(
            transport.url_for("shows/3"),
            "https://api.example.test/v1/shows/3"
        );
        assert_eq!(
            transport.url_for("https://cdn.example.test/img"),
            "https://cdn.example.test/img"
        );
    }
}
