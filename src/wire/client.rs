use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    data::domain::{CotId, RenglonId},
    error::{RemateResult, WireError},
};

// ================================================================================================
// Session Cookies
// ================================================================================================

/// Verbatim `Cookie` header snapshot captured from a live portal session.
///
/// The poll loop consumes this by value at hand-off, so the capturing session
/// can keep serving the human operator without racing the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookies(pub String);

impl From<&str> for SessionCookies {
    fn from(value: &str) -> Self {
        SessionCookies(value.to_string())
    }
}

// ================================================================================================
// Wire Response
// ================================================================================================

/// Normalized outcome of one portal call.
///
/// Transport failures never cross the queue boundary as errors; they become
/// one of these variants and the tick loop converts them into HTTP_ERROR
/// events.
#[derive(Debug, Clone, PartialEq)]
pub enum WireResponse {
    /// HTTP 200 with the raw body, still to be payload-parsed.
    Ok { body: String },
    /// Any non-200 status.
    HttpStatus { status: u16, message: String },
    /// The per-request deadline expired.
    Timeout { after: Duration },
    /// Connection-level failure before any status was seen.
    Network { message: String },
}

impl WireResponse {
    /// The observed HTTP status; 0 when no status was seen at all.
    pub fn status(&self) -> u16 {
        match self {
            WireResponse::Ok { .. } => 200,
            WireResponse::HttpStatus { status, .. } => *status,
            WireResponse::Timeout { .. } | WireResponse::Network { .. } => 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, WireResponse::Ok { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            WireResponse::HttpStatus {
                status: 401 | 403,
                ..
            }
        )
    }

    /// Human-readable failure description for HTTP_ERROR payloads.
    pub fn describe(&self) -> String {
        match self {
            WireResponse::Ok { .. } => "ok".to_string(),
            WireResponse::HttpStatus { status, message } => {
                format!("HTTP {status}: {message}")
            }
            WireResponse::Timeout { after } => {
                format!("timeout after {:.1}s", after.as_secs_f64())
            }
            WireResponse::Network { message } => format!("network error: {message}"),
        }
    }
}

// ================================================================================================
// Transport Seam
// ================================================================================================

/// One portal round-trip: the `BuscarOfertas` XHR for a single line item.
///
/// The live and poll collectors share this seam; tests substitute a scripted
/// transport to drive session-expiry and error-storm paths without a network.
#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn buscar_ofertas(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
        timeout: Duration,
    ) -> WireResponse;
}

// ================================================================================================
// HTTP Transport
// ================================================================================================

/// [`PortalTransport`] over reqwest, reusing captured session cookies
/// verbatim and marking requests as XHR the way the portal's own frontend
/// does.
#[derive(Debug, Clone)]
pub struct HttpPortalTransport {
    http: reqwest::Client,
    endpoint: String,
    cookies: SessionCookies,
}

impl HttpPortalTransport {
    pub fn new(endpoint: impl Into<String>, cookies: SessionCookies) -> RemateResult<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| WireError::Request(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            cookies,
        })
    }

    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }
}

#[async_trait]
impl PortalTransport for HttpPortalTransport {
    async fn buscar_ofertas(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
        timeout: Duration,
    ) -> WireResponse {
        let request = self
            .http
            .post(&self.endpoint)
            .header("Cookie", &self.cookies.0)
            .header("X-Requested-With", "XMLHttpRequest")
            .json(&json!({
                "id_cot": id_cot.0,
                "id_renglon": id_renglon.0,
            }))
            .send();

        let response = match tokio::time::timeout(timeout, request).await {
            Err(_) => return WireResponse::Timeout { after: timeout },
            Ok(Err(e)) => {
                return WireResponse::Network {
                    message: e.to_string(),
                }
            }
            Ok(Ok(r)) => r,
        };

        let status = response.status().as_u16();
        if status != 200 {
            return WireResponse::HttpStatus {
                status,
                message: response.status().to_string(),
            };
        }

        match tokio::time::timeout(timeout, response.text()).await {
            Err(_) => WireResponse::Timeout { after: timeout },
            Ok(Err(e)) => WireResponse::Network {
                message: e.to_string(),
            },
            Ok(Ok(body)) => WireResponse::Ok { body },
        }
    }
}
