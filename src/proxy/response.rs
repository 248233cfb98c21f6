//! Locally synthesized responses

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use crate::filter::Rejection;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub const BLOCKED_BY: &str = "x-blocked-by";

pub fn full_body(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into()).map_err(|e| match e {}).boxed()
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|e| match e {}).boxed()
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<ProxyBody> {
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("text/plain"));
    resp.headers_mut().insert(CONTENT_TYPE, content_type);
    resp
}

/// Response for a request refused by a rule
pub fn rejection_response(rejection: &Rejection) -> Response<ProxyBody> {
    let mut resp = text_response(
        rejection.status,
        &rejection.content_type,
        rejection.body.clone(),
    );
    resp.headers_mut()
        .insert(BLOCKED_BY, HeaderValue::from_static("turnstile"));
    resp
}

/// 502 for an upstream that could not be reached
pub fn gateway_error(message: &str) -> Response<ProxyBody> {
    text_response(
        StatusCode::BAD_GATEWAY,
        "text/plain",
        format!("Proxy error: {}\n", message),
    )
}

/// 200 answer to an accepted CONNECT; the connection becomes the tunnel.
pub fn tunnel_established() -> Response<ProxyBody> {
    Response::new(empty_body())
}

/// Ask hyper to close the client connection once `resp` is written
pub fn closing(mut resp: Response<ProxyBody>) -> Response<ProxyBody> {
    resp.headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    resp
}
