//! Request builder for `touchdb:` URLs.
//!
//! A [`Transport`] is the request phase: open it on a URL, set the method,
//! headers and body, then `dispatch` it through a [`Router`]. Dispatch
//! consumes the transport and returns the response phase, an immutable
//! [`HttpResponse`], so a request cannot be edited once it has been sent and
//! a response cannot be read before it exists.
//!
//! URLs look like `touchdb:///<db>/<doc-id>?query`. The authority is
//! ignored; the resource comes from the path.

use serde::Serialize;
use touchdb_core::codec;
use touchdb_core::{CodecError, HttpMethod, HttpRequest, HttpResponse};
use url::Url;

use crate::error::TransportError;
use crate::router::Router;
use crate::scheme;

/// A request under construction, bound to one URL.
#[derive(Debug, Clone)]
pub struct Transport {
    url: Url,
    request: HttpRequest,
}

impl Transport {
    /// Binds a new `GET` request to `url`.
    ///
    /// Fails before any dispatch when the URL does not parse, has no path,
    /// or uses a scheme nobody registered.
    pub fn open(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::MalformedEndpoint {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(TransportError::MalformedEndpoint {
                url: url.to_string(),
                reason: "expected <scheme>:///<path>".to_string(),
            });
        }
        if !scheme::is_registered(parsed.scheme()) {
            return Err(TransportError::UnregisteredScheme(parsed.scheme().to_string()));
        }

        let target = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };
        Ok(Self {
            request: HttpRequest::new(HttpMethod::Get, target),
            url: parsed,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request as it will be dispatched.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.request.method = method;
        self
    }

    /// Sets a header, replacing any earlier value under the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request
            .headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.request.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.request.body = Some(bytes.into());
        self
    }

    /// Encodes `value` as the JSON body and sets `Content-Type`.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, CodecError> {
        let bytes = codec::encode(value)?;
        Ok(self.header("content-type", "application/json").body(bytes))
    }

    /// Sends the request and blocks until the router has answered.
    pub fn dispatch(self, router: &Router) -> HttpResponse {
        router.dispatch(self.request)
    }

    pub async fn dispatch_async(self, router: &Router) -> HttpResponse {
        router.dispatch_async(self.request).await
    }
}
