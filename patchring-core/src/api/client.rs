//! Buffered, logged requests against the console API root.

use crate::error::ApiError;

use patchring_config::{BasicAuth, ServerConfig};
use reqwest::{
    Client, Method, RequestBuilder, StatusCode,
    header::{CONTENT_TYPE, HeaderMap},
};
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt, time::Duration};
use tracing::{debug, info};
use url::Url;

/// Path of the versioned console API below the server URL.
pub const API_ROOT: &str = "st/console/api/v1.0/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully buffered response of one request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Method the request was sent with.
    pub method: Method,
    /// Absolute request URL, query included.
    pub url: String,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body as text; empty when the server sent none.
    pub body: String,
}

impl ApiResponse {
    /// 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into [`ApiError::Status`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Status {
                method: self.method,
                url: self.url,
                status: self.status,
                body: self.body,
            })
        }
    }

    /// Deserialize the body, failing with [`ApiError::Malformed`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Malformed {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }

    /// Header value, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Build the reqwest client shared by the console and vCenter calls.
///
/// The CA bundle from `path_to_cert` is trusted on top of the system roots.
pub fn build_http_client(server: &ServerConfig) -> Result<Client, ApiError> {
    let mut builder = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(server.accept_invalid_certs);

    if let Some(path) = &server.ca_cert_path {
        let pem =
            std::fs::read(path).map_err(|source| ApiError::CertificateRead {
                path: path.clone(),
                source,
            })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| {
            ApiError::CertificateInvalid {
                path: path.clone(),
                source,
            }
        })?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().map_err(ApiError::ClientBuild)
}

/// Send a prepared request, buffer the body and log the exchange.
///
/// Only transport failures are errors here; status handling is left to
/// the caller.
pub(crate) async fn execute(
    request: RequestBuilder,
    method: Method,
    url: &Url,
    request_body: Option<&str>,
) -> Result<ApiResponse, ApiError> {
    let transport = |source: reqwest::Error| ApiError::Transport {
        method: method.clone(),
        url: url.to_string(),
        source,
    };

    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(transport)?;

    info!(
        url = %url,
        method = %method,
        request_body = request_body.unwrap_or("None"),
        status = status.as_u16(),
        "HTTP exchange"
    );
    debug!(url = %url, response = %body, "HTTP response body");

    Ok(ApiResponse {
        method,
        url: url.to_string(),
        status,
        headers,
        body,
    })
}

/// Client for the patch management console API.
#[derive(Clone)]
pub struct PatchApiClient {
    http: Client,
    api_root: Url,
    basic_auth: Option<BasicAuth>,
}

impl fmt::Debug for PatchApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchApiClient")
            .field("api_root", &self.api_root.as_str())
            .field("basic_auth", &self.basic_auth)
            .finish()
    }
}

impl PatchApiClient {
    /// Client for the console at `server.url`, with its TLS settings and
    /// optional basic credentials.
    pub fn new(server: &ServerConfig) -> Result<Self, ApiError> {
        let http = build_http_client(server)?;
        Self::with_http_client(http, &server.url, server.basic_auth.clone())
    }

    /// Use an existing reqwest client against `server_url`.
    pub fn with_http_client(
        http: Client,
        server_url: &Url,
        basic_auth: Option<BasicAuth>,
    ) -> Result<Self, ApiError> {
        let api_root = api_root_for(server_url)?;
        info!(api_root = %api_root, "console API client created");
        Ok(Self {
            http,
            api_root,
            basic_auth,
        })
    }

    /// `<server>/st/console/api/v1.0/`
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    /// Absolute URL for an API-relative `path` plus query parameters.
    pub fn endpoint(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Url, ApiError> {
        let mut url = self.api_root.join(path.trim_start_matches('/')).map_err(
            |source| ApiError::InvalidUrl {
                path: path.to_string(),
                source,
            },
        )?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// `GET` an API-relative path.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, ApiError> {
        let url = self.endpoint(path, query)?;
        self.send(Method::GET, url, None).await
    }

    /// `POST` `body` serialized as JSON.
    pub async fn post_json<B>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path, &[])?;
        let payload =
            serde_json::to_string(body).map_err(|e| ApiError::Malformed {
                url: url.to_string(),
                reason: format!("request body: {e}"),
            })?;
        self.send(Method::POST, url, Some(payload)).await
    }

    /// `DELETE` an API-relative path.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        let url = self.endpoint(path, &[])?;
        self.send(Method::DELETE, url, None).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(payload) = &body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(payload.clone());
        }
        execute(request, method, &url, body.as_deref()).await
    }

    /// Register session credentials used by the console for remote tasks.
    pub async fn create_session(&self, clear_text: &str) -> Result<(), ApiError> {
        info!("creating session credentials");
        let body = serde_json::json!({
            "clearText": clear_text,
            "protectionMode": "None",
        });
        self.post_json("sessioncredentials", &body)
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Remove the session credentials registered by [`Self::create_session`].
    pub async fn delete_session(&self) -> Result<(), ApiError> {
        info!("removing session credentials");
        self.delete("sessioncredentials").await?.error_for_status()?;
        Ok(())
    }
}

fn api_root_for(server_url: &Url) -> Result<Url, ApiError> {
    let mut base = server_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(API_ROOT).map_err(|source| ApiError::InvalidUrl {
        path: API_ROOT.to_string(),
        source,
    })
}
