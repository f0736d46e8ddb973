//! Built-in filters covering the literal set `spec.md`'s own scenarios reference (§8): header and
//! status manipulation, an inline-content shunt body, and path rewriting for loopback routes.

use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};

use crate::body;
use crate::context::Context;
use crate::filter::{Filter, FilterSpec};
use crate::value::Arg;

/// Expands `${name}` placeholders in filter args against `ctx.path_params`
/// (`spec.md` §8 Scenario B).
fn expand_template(template: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' && template[i..].starts_with("${") {
            if let Some(end) = template[i..].find('}') {
                let name = &template[i + 2..i + end];
                if let Some(value) = ctx.path_params.get(name) {
                    out.push_str(value);
                } else {
                    out.push_str(&template[i..i + end + 1]);
                }
                for _ in 0..end {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::try_from(name).map_err(|e| format!("invalid header name {name:?}: {e}"))
}

#[derive(Debug)]
struct SetRequestHeader {
    name: HeaderName,
    value: String,
}

impl Filter for SetRequestHeader {
    fn request(&self, ctx: &mut Context) {
        let expanded = expand_template(&self.value, ctx);
        if let Ok(hv) = HeaderValue::from_str(&expanded) {
            ctx.request.headers_mut().insert(self.name.clone(), hv);
        } else {
            tracing::warn!(header = %self.name, "setRequestHeader: value is not a valid header value");
        }
    }
}

pub struct SetRequestHeaderSpec;

impl FilterSpec for SetRequestHeaderSpec {
    fn name(&self) -> &str {
        "setRequestHeader"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Str(name), Arg::Str(value)] = args else {
            return Err("setRequestHeader(name, value) takes two string arguments".to_string());
        };
        Ok(Arc::new(SetRequestHeader {
            name: header_name(name)?,
            value: value.to_string(),
        }))
    }
}

#[derive(Debug)]
struct AppendRequestHeader {
    name: HeaderName,
    value: String,
}

impl Filter for AppendRequestHeader {
    fn request(&self, ctx: &mut Context) {
        let expanded = expand_template(&self.value, ctx);
        if let Ok(hv) = HeaderValue::from_str(&expanded) {
            ctx.request.headers_mut().append(self.name.clone(), hv);
        }
    }
}

pub struct AppendRequestHeaderSpec;

impl FilterSpec for AppendRequestHeaderSpec {
    fn name(&self) -> &str {
        "appendRequestHeader"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Str(name), Arg::Str(value)] = args else {
            return Err("appendRequestHeader(name, value) takes two string arguments".to_string());
        };
        Ok(Arc::new(AppendRequestHeader {
            name: header_name(name)?,
            value: value.to_string(),
        }))
    }
}

#[derive(Debug)]
struct SetResponseHeader {
    name: HeaderName,
    value: String,
}

impl Filter for SetResponseHeader {
    fn response(&self, ctx: &mut Context) {
        let expanded = expand_template(&self.value, ctx);
        if let (Some(resp), Ok(hv)) = (ctx.response.as_mut(), HeaderValue::from_str(&expanded)) {
            resp.headers_mut().insert(self.name.clone(), hv);
        }
    }
}

pub struct SetResponseHeaderSpec;

impl FilterSpec for SetResponseHeaderSpec {
    fn name(&self) -> &str {
        "setResponseHeader"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Str(name), Arg::Str(value)] = args else {
            return Err("setResponseHeader(name, value) takes two string arguments".to_string());
        };
        Ok(Arc::new(SetResponseHeader {
            name: header_name(name)?,
            value: value.to_string(),
        }))
    }
}

/// Rewrites the outgoing request path, used ahead of `<loopback>` (`spec.md` §8 Scenario D) or a
/// network backend.
#[derive(Debug)]
struct SetPath {
    path: String,
}

impl Filter for SetPath {
    fn request(&self, ctx: &mut Context) {
        let expanded = expand_template(&self.path, ctx);
        let mut parts = ctx.request.uri().clone().into_parts();
        let query = parts
            .path_and_query
            .as_ref()
            .and_then(|pq| pq.query())
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        if let Ok(pq) = http::uri::PathAndQuery::try_from(format!("{expanded}{query}")) {
            parts.path_and_query = Some(pq);
            if let Ok(uri) = http::Uri::from_parts(parts) {
                *ctx.request.uri_mut() = uri;
            }
        }
    }
}

pub struct SetPathSpec;

impl FilterSpec for SetPathSpec {
    fn name(&self) -> &str {
        "setPath"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Str(path)] = args else {
            return Err("setPath(path) takes one string argument".to_string());
        };
        Ok(Arc::new(SetPath { path: path.to_string() }))
    }
}

/// Sets the response status code, creating a `200` response with an empty body first if no
/// filter has produced one yet (so `status(...)` can run before or after `inlineContent(...)`).
#[derive(Debug)]
struct Status {
    code: StatusCode,
}

impl Filter for Status {
    fn request(&self, ctx: &mut Context) {
        let resp = ctx
            .response
            .get_or_insert_with(|| http::Response::builder().status(200).body(body::empty()).unwrap());
        *resp.status_mut() = self.code;
    }
}

pub struct StatusSpec;

impl FilterSpec for StatusSpec {
    fn name(&self) -> &str {
        "status"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Number(code)] = args else {
            return Err("status(code) takes one numeric argument".to_string());
        };
        let code = StatusCode::from_u16(*code as u16).map_err(|e| format!("invalid status code: {e}"))?;
        Ok(Arc::new(Status { code }))
    }
}

/// Synthesizes a response body from a literal string, for `<shunt>` routes (`spec.md` §8
/// Scenario A).
#[derive(Debug)]
struct InlineContent {
    content: String,
    mime: Option<String>,
}

impl Filter for InlineContent {
    fn request(&self, ctx: &mut Context) {
        let mut builder = http::Response::builder().status(200);
        if let Some(mime) = &self.mime {
            builder = builder.header(http::header::CONTENT_TYPE, mime.as_str());
        }
        ctx.response = Some(builder.body(body::full(self.content.clone())).unwrap());
    }
}

pub struct InlineContentSpec;

impl FilterSpec for InlineContentSpec {
    fn name(&self) -> &str {
        "inlineContent"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        match args {
            [Arg::Str(content)] => Ok(Arc::new(InlineContent {
                content: content.to_string(),
                mime: None,
            })),
            [Arg::Str(content), Arg::Str(mime)] => Ok(Arc::new(InlineContent {
                content: content.to_string(),
                mime: Some(mime.to_string()),
            })),
            _ => Err("inlineContent(content) or inlineContent(content, mimeType)".to_string()),
        }
    }
}

/// Marks a request so the dispatcher retries a transport failure even for a non-idempotent
/// method (`spec.md` §4.9).
#[derive(Debug)]
struct Retryable;

impl Filter for Retryable {
    fn request(&self, ctx: &mut Context) {
        ctx.state_bag.set(crate::context::RETRY_KEY, true);
    }
}

pub struct RetryableSpec;

impl FilterSpec for RetryableSpec {
    fn name(&self) -> &str {
        "retryable"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        if !args.is_empty() {
            return Err("retryable() takes no arguments".to_string());
        }
        Ok(Arc::new(Retryable))
    }
}

/// Overrides an endpoint's fade-in detection timestamp to a caller-supplied wall-clock millis
/// value, so fade-in stays monotonic across a restart (`spec.md` §4.12).
#[derive(Debug)]
struct EndpointCreated {
    url: String,
    detected_at_millis: i64,
}

impl Filter for EndpointCreated {
    fn request(&self, ctx: &mut Context) {
        if let Some(registry) = &ctx.endpoint_registry {
            let key: Arc<str> = Arc::from(self.url.as_str());
            let metrics = registry.touch(&key);
            metrics.set_detected_at(self.detected_at_millis);
        }
    }
}

pub struct EndpointCreatedSpec;

impl FilterSpec for EndpointCreatedSpec {
    fn name(&self) -> &str {
        "endpointCreated"
    }

    fn create_instance(&self, args: &[Arg]) -> Result<Arc<dyn Filter>, String> {
        let [Arg::Str(url), Arg::Number(ts)] = args else {
            return Err("endpointCreated(url, detectedAtMillis) takes a string and a numeric argument".to_string());
        };
        Ok(Arc::new(EndpointCreated {
            url: url.to_string(),
            detected_at_millis: *ts as i64,
        }))
    }
}

pub fn register(registry: crate::filter::FilterRegistryBuilder) -> crate::filter::FilterRegistryBuilder {
    registry
        .register(SetRequestHeaderSpec)
        .register(AppendRequestHeaderSpec)
        .register(SetResponseHeaderSpec)
        .register(SetPathSpec)
        .register(StatusSpec)
        .register(InlineContentSpec)
        .register(RetryableSpec)
        .register(EndpointCreatedSpec)
}
