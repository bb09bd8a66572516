//! Transport that routes CalDAV requests through the credential proxy.

use calsync_protocol::ProxyChannel;
use tracing::trace;

use crate::error::CalDavResult;
use crate::transport::{BoxFuture, DavRequest, DavResponse, DavTransport};

/// Sends requests via the proxy's `forward` action.
///
/// The proxy holds the password for `setting_id` and performs the
/// authenticated request server-side.
pub struct ProxyTransport {
    channel: ProxyChannel,
    bearer: String,
    setting_id: String,
}

impl ProxyTransport {
    pub fn new(
        channel: ProxyChannel,
        bearer: impl Into<String>,
        setting_id: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            bearer: bearer.into(),
            setting_id: setting_id.into(),
        }
    }
}

impl DavTransport for ProxyTransport {
    fn send(&self, request: DavRequest) -> BoxFuture<'_, CalDavResult<DavResponse>> {
        Box::pin(async move {
            trace!(method = request.method, url = %request.url, "forwarding CalDAV request");
            let reply = self
                .channel
                .forward(
                    &self.bearer,
                    &self.setting_id,
                    request.method,
                    request.url.as_str(),
                    request.depth.map(|d| d.as_str()),
                    request.body,
                )
                .await?;
            Ok(DavResponse::new(reply.status, reply.body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalDavErrorCode;
    use crate::transport::Depth;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forwards_request_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer session-token"))
            .and(body_partial_json(json!({
                "action": "forward",
                "settingId": "set-1",
                "method": "PROPFIND",
                "url": "https://caldav.example.com/cal/",
                "depth": "1"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": 207, "body": "<multistatus/>"})),
            )
            .mount(&server)
            .await;

        let channel = ProxyChannel::new(&server.uri()).unwrap();
        let transport = ProxyTransport::new(channel, "session-token", "set-1");
        let url = Url::parse("https://caldav.example.com/cal/").unwrap();
        let response = transport
            .send(DavRequest::propfind(url, Depth::One, "<propfind/>".into()))
            .await
            .unwrap();

        assert_eq!(response, DavResponse::new(207, "<multistatus/>"));
    }

    #[tokio::test]
    async fn expired_session_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let channel = ProxyChannel::new(&server.uri()).unwrap();
        let transport = ProxyTransport::new(channel, "expired", "set-1");
        let url = Url::parse("https://caldav.example.com/cal/").unwrap();
        let err = transport
            .send(DavRequest::propfind(url, Depth::Zero, String::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), CalDavErrorCode::AuthenticationFailed);
    }
}
