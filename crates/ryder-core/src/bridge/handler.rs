// ── Auth bridge protocol handler ──
//
// Turns inbound socket messages into device calls, name lookups and auth
// token work, and reports the results as outbound events.

use std::sync::Arc;

use chrono::{Months, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;
use url::form_urlencoded;

use crate::auth::{AuthProtocol, AuthResponseParams};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::export::{AppKeyExport, PrivateKeyBundle};
use crate::ipc::DeviceClient;
use crate::names::NameCache;

use super::message::{AppKeyRequest, Identity, Inbound, InvalidReason, Outbound};

/// Where a connection's outbound events go.
pub type EventSink = mpsc::UnboundedSender<Outbound>;

/// Connection-independent settings the handler needs.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Base URL of this bridge, with trailing slash.
    pub bridge_url: String,
    pub hub_url: Url,
    pub api_url: Url,
    pub tolerate_redirect_mismatch: bool,
}

impl HandlerSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            bridge_url: config.bridge_url(),
            hub_url: config.hub_url.clone(),
            api_url: config.api_url.clone(),
            tolerate_redirect_mismatch: config.tolerate_redirect_mismatch,
        }
    }
}

/// Per-worker protocol handler. Cheap to clone; clones share the name
/// cache.
#[derive(Clone)]
pub struct BridgeHandler {
    device: DeviceClient,
    names: Arc<NameCache>,
    auth: Arc<dyn AuthProtocol>,
    settings: Arc<HandlerSettings>,
}

fn emit(sink: &EventSink, event: Outbound) {
    if sink.send(event).is_err() {
        debug!("connection closed before event was sent");
    }
}

impl BridgeHandler {
    pub fn new(
        device: DeviceClient,
        names: Arc<NameCache>,
        auth: Arc<dyn AuthProtocol>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            device,
            names,
            auth,
            settings: Arc::new(settings),
        }
    }

    /// Handle one inbound message.
    ///
    /// Only [`CoreError::DeviceUnavailable`] is returned; every other
    /// failure is reported to the browser or logged.
    pub async fn handle(&self, message: Inbound, sink: &EventSink) -> Result<(), CoreError> {
        match message {
            Inbound::AuthRequest { data } => {
                self.auth_request(data.as_deref(), sink);
                Ok(())
            }
            Inbound::ListIdentities => self.list_identities(sink).await,
            Inbound::RequestAppAuthPrivateKey(request) => {
                self.request_app_auth_private_key(request, sink).await
            }
        }
    }

    // ── auth_request ─────────────────────────────────────────────

    fn auth_request(&self, data: Option<&str>, sink: &EventSink) {
        let Some(data) = data else {
            emit(sink, Outbound::InvalidAuthRequest(InvalidReason::MissingData));
            return;
        };
        let query = data.strip_prefix('?').unwrap_or(data);

        let mut token = None;
        let mut echo = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "authRequest" if token.is_none() => token = Some(value.into_owned()),
                "echo" if echo.is_none() => echo = Some(value.into_owned()),
                _ => {}
            }
        }
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            debug!("auth request without authRequest parameter");
            return;
        };

        if !self.auth.verify_auth_request(&token) {
            emit(sink, Outbound::InvalidAuthRequest(InvalidReason::VerificationFailed));
            return;
        }
        let decoded = match self.auth.decode(&token) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "verified auth request failed to decode");
                emit(sink, Outbound::InvalidAuthRequest(InvalidReason::VerificationFailed));
                return;
            }
        };

        let redirect_uri = &decoded.payload.redirect_uri;
        if !redirect_uri.starts_with(&decoded.payload.domain_name) {
            error!(
                domain = %decoded.payload.domain_name,
                redirect = %redirect_uri,
                "domain name and redirect uri mismatch"
            );
            let event = if self.settings.tolerate_redirect_mismatch {
                Outbound::Redirect(redirect_uri.clone())
            } else {
                Outbound::InvalidAuthRequest(InvalidReason::RedirectMismatch)
            };
            emit(sink, event);
            return;
        }

        if let Some(echo) = echo.filter(|e| !e.is_empty()) {
            let target = echo_redirect(redirect_uri, &echo, &self.settings.bridge_url, &token);
            emit(sink, Outbound::Redirect(target));
            return;
        }

        emit(sink, Outbound::Auth(decoded));
    }

    // ── list_identities ──────────────────────────────────────────

    /// Emit identities from 0 upward until the first one without names.
    async fn list_identities(&self, sink: &EventSink) -> Result<(), CoreError> {
        for number in 0..=u8::MAX {
            let identity = match self.device.export_public_identity(number).await {
                Ok(identity) => identity,
                Err(e @ CoreError::DeviceUnavailable) => return Err(e),
                Err(e) => {
                    warn!(number, error = %e, "identity export failed, ending listing");
                    return Ok(());
                }
            };

            let Some(names) = self
                .names
                .get_names(&identity.address)
                .await
                .filter(|names| !names.is_empty())
            else {
                debug!(number, "identity has no names, listing complete");
                return Ok(());
            };

            emit(
                sink,
                Outbound::Identity(Identity {
                    number,
                    address: identity.address,
                    names: Some(names),
                }),
            );
        }
        Ok(())
    }

    // ── request_app_auth_private_key ─────────────────────────────

    async fn request_app_auth_private_key(
        &self,
        request: AppKeyRequest,
        sink: &EventSink,
    ) -> Result<(), CoreError> {
        let export = self
            .device
            .request_app_private_key(request.identity_number, request.domain_name.clone())
            .await;

        let bundle = match export {
            Ok(AppKeyExport::Exported(bundle)) => bundle,
            Ok(AppKeyExport::Rejected) => {
                emit(sink, Outbound::AppAuthPrivateKey(None));
                return Ok(());
            }
            Err(e) => {
                emit(sink, Outbound::AppAuthPrivateKey(None));
                if matches!(e, CoreError::DeviceUnavailable) {
                    return Err(e);
                }
                warn!(
                    number = request.identity_number,
                    domain = %request.domain_name,
                    error = %e,
                    "app key export failed"
                );
                return Ok(());
            }
        };

        match self.auth_response(&request, bundle).await {
            Ok(token) => {
                info!(
                    number = request.identity_number,
                    domain = %request.domain_name,
                    "issued auth response"
                );
                emit(sink, Outbound::AppAuthPrivateKey(Some(token)));
            }
            Err(e) => {
                warn!(error = %e, "could not build auth response");
                emit(sink, Outbound::AppAuthPrivateKey(None));
            }
        }
        Ok(())
    }

    async fn auth_response(
        &self,
        request: &AppKeyRequest,
        bundle: PrivateKeyBundle,
    ) -> Result<String, CoreError> {
        let username = self
            .names
            .get_names(&request.identity_public_key)
            .await
            .and_then(|names| names.into_iter().next());
        let now = Utc::now();
        let expires_at = now
            .checked_add_months(Months::new(1))
            .unwrap_or(now + TimeDelta::days(30));

        let params = AuthResponseParams {
            owner_private_key: bundle.owner_private_key,
            app_private_key: bundle.app_private_key,
            username,
            expires_at,
            transit_public_key: Some(request.token_public_key.clone()),
            hub_url: self.settings.hub_url.clone(),
            api_url: self.settings.api_url.clone(),
        };
        self.auth.make_auth_response(&params)
    }
}

/// Redirect back to the app carrying the echo reply and a link that
/// resumes this auth request on the bridge.
fn echo_redirect(redirect_uri: &str, echo: &str, bridge_url: &str, token: &str) -> String {
    let continuation = format!("{bridge_url}auth?authRequest={token}&echo=");
    match Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("echoReply", echo)
                .append_pair("authContinuation", &continuation);
            url.into()
        }
        Err(_) => {
            let encode = |s: &str| form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
            format!(
                "{redirect_uri}?echoReply={}&authContinuation={}",
                encode(echo),
                encode(&continuation)
            )
        }
    }
}
