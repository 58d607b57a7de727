use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    auth::{AuthCoordinator, AuthFailureCallback, TokenProvider},
    decode::decode_json,
    retry::{RetryExecutor, RetryPolicy},
    transport::{HttpTransport, Transport},
    ApiError, AuthOptions, ClientOptions, RequestDescriptor, Response, Result,
};

/// HTTP client for the media-tracking backend.
///
/// Every call goes through the [`AuthCoordinator`], which in turn drives the
/// retrying executor over the configured [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    options: ClientOptions,
    auth: Arc<AuthCoordinator>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .field("auth", &self.auth)
            .finish()
    }
}

impl ApiClient {
    /// Starts building a client for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            options: ClientOptions::default(),
            auth_options: AuthOptions::default(),
            tokens: None,
            on_failure: None,
            transport: None,
        }
    }

    /// Creates an unauthenticated client with default options.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).build()
    }

    /// Creates an unauthenticated client from environment variables.
    ///
    /// Reads `MEDIATRACK_API_URL`, the backend base URL. Returns an error if
    /// it is missing or empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mediatrack_net::ApiClient;
    ///
    /// let api = ApiClient::from_env().expect("missing MEDIATRACK_API_URL");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var("MEDIATRACK_API_URL")
            .map_err(|_| "missing MEDIATRACK_API_URL environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("MEDIATRACK_API_URL is set but empty".to_owned());
        }
        Self::new(url.trim()).map_err(|err| err.to_string())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Sends a request and decodes the JSON response into `T`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<Response<T>> {
        let raw = self.auth.send(request).await?;
        decode_json(raw)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Response<T>> {
        self.send(RequestDescriptor::get(path)).await
    }

    /// `GET` with query parameters.
    pub async fn get_with_query<T, I, K, V>(&self, path: &str, query: I) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.send(RequestDescriptor::get(path).query(query)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(RequestDescriptor::post(path).json(to_json(body)?))
            .await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(RequestDescriptor::put(path).json(to_json(body)?))
            .await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<Response<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(RequestDescriptor::patch(path).json(to_json(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Response<T>> {
        self.send(RequestDescriptor::delete(path)).await
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|err| ApiError::decode(format!("request body is not serializable: {err}")))
}

/// Configures an [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    options: ClientOptions,
    auth_options: AuthOptions,
    tokens: Option<Arc<dyn TokenProvider>>,
    on_failure: Option<AuthFailureCallback>,
    transport: Option<Arc<dyn Transport>>,
}

impl ApiClientBuilder {
    /// Applies timeout and retry options.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides which paths count as authentication endpoints.
    pub fn auth_options(mut self, options: AuthOptions) -> Self {
        self.auth_options = options;
        self
    }

    /// Enables bearer credentials and refresh-on-401.
    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Called once per failed refresh cycle.
    pub fn on_auth_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    /// Replaces the reqwest-backed transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let base_url = self.base_url.trim_end_matches('/').to_owned();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(base_url.clone(), self.options.clone())?),
        };
        let executor = RetryExecutor::new(RetryPolicy::from(&self.options));

        let mut auth = AuthCoordinator::new(transport, executor).with_options(self.auth_options);
        if let Some(tokens) = self.tokens {
            auth = auth.with_tokens(tokens);
        }
        if let Some(callback) = self.on_failure {
            auth = auth.on_auth_failure(callback);
        }

        Ok(ApiClient {
            base_url,
            options: self.options,
            auth: Arc::new(auth),
        })
    }
}
