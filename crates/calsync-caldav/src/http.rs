//! Direct HTTP transport with Basic and Digest authentication.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::auth::{Challenge, Credentials, DigestAuth};
use crate::config::CalDavConfig;
use crate::error::{CalDavError, CalDavResult};
use crate::transport::{BoxFuture, DavRequest, DavResponse, DavTransport};

/// What the server asked for last time.
#[derive(Debug)]
enum AuthState {
    /// No challenge seen yet; requests go out unauthenticated.
    Unknown,
    Basic,
    Digest(DigestAuth),
}

/// Talks to the CalDAV server directly with the user's password.
pub struct HttpTransport {
    client: Client,
    credentials: Credentials,
    state: Mutex<AuthState>,
}

impl HttpTransport {
    pub fn new(config: &CalDavConfig, password: &str) -> CalDavResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                CalDavError::internal(format!("failed to build HTTP client: {e}")).with_source(e)
            })?;

        Ok(Self {
            client,
            credentials: Credentials::new(config.username.clone(), password),
            state: Mutex::new(AuthState::Unknown),
        })
    }

    async fn authorization(&self, request: &DavRequest) -> Option<String> {
        let mut state = self.state.lock().await;
        match &mut *state {
            AuthState::Unknown => None,
            AuthState::Basic => Some(self.credentials.basic_header()),
            AuthState::Digest(digest) => {
                Some(digest.authorize(request.method, &request_uri(request), &self.credentials))
            }
        }
    }

    async fn attempt(&self, request: &DavRequest) -> CalDavResult<reqwest::Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| CalDavError::internal(format!("invalid method {}", request.method)))?;

        let mut builder = self.client.request(method, request.url.clone());
        if let Some(depth) = request.depth {
            builder = builder.header("Depth", depth.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(body.clone());
        }
        if let Some(auth) = self.authorization(request).await {
            builder = builder.header(AUTHORIZATION, auth);
        }

        trace!(method = request.method, url = %request.url, "sending CalDAV request");
        builder.send().await.map_err(map_reqwest_error)
    }

    /// Records the server's challenge. Returns false when there is nothing
    /// new to try.
    async fn accept_challenge(&self, response: &reqwest::Response) -> bool {
        let headers: Vec<&str> = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();

        let challenge = Challenge::select(headers);

        let mut state = self.state.lock().await;
        if let Some(Challenge::Digest(digest)) = challenge {
            debug!(realm = %digest.realm, "server requested digest authentication");
            *state = AuthState::Digest(digest);
            return true;
        }
        if matches!(*state, AuthState::Unknown) {
            debug!("server requested authentication, using basic");
            *state = AuthState::Basic;
            return true;
        }
        false
    }
}

impl DavTransport for HttpTransport {
    fn send(&self, request: DavRequest) -> BoxFuture<'_, CalDavResult<DavResponse>> {
        Box::pin(async move {
            let mut response = self.attempt(&request).await?;
            if response.status() == StatusCode::UNAUTHORIZED
                && self.accept_challenge(&response).await
            {
                response = self.attempt(&request).await?;
            }

            let status = response.status().as_u16();
            let body = response.text().await.map_err(map_reqwest_error)?;
            Ok(DavResponse::new(status, body))
        })
    }
}

/// Path and query, as used in the digest `uri` parameter.
fn request_uri(request: &DavRequest) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_string(),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> CalDavError {
    if err.is_timeout() {
        CalDavError::timeout(format!("request timed out: {err}")).with_source(err)
    } else {
        CalDavError::transport(format!("request failed: {err}")).with_source(err)
    }
}
