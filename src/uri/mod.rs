//! Request URI checks run before dispatch.
//!
//! [`prepare`] is the single entry point both front ends use: it takes the
//! session path parameter off the raw URI, percent-decodes what is left,
//! normalizes, and finally lets a session cookie override the URL id.

pub mod decode;
pub mod normalize;
pub mod session;

pub use decode::{percent_decode, percent_decode_utf8};
pub use normalize::{normalize, normalize_in_place};
pub use session::{SessionSource, extract_url_session, find_session_cookie, strip_path_param};

use crate::error::UriError;
use crate::http::request::RequestContext;

/// URI and session handling knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    pub session_param: String,
    pub session_cookie: String,
    pub strict: bool,
    pub allow_encoded_slash: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            session_param: "jsessionid".to_string(),
            session_cookie: "JSESSIONID".to_string(),
            strict: false,
            allow_encoded_slash: false,
        }
    }
}

/// Fills the decoded URI and session fields of `ctx` from its raw URI and
/// headers. Nothing is changed when the URI is refused.
pub fn prepare(ctx: &mut RequestContext, policy: &RequestPolicy) -> Result<(), UriError> {
    let url = extract_url_session(&ctx.raw_uri, &policy.session_param, policy.allow_encoded_slash)?;
    let uri = normalize(&url.decoded, policy.strict)?;

    ctx.raw_uri = url.raw;
    ctx.uri = uri;
    ctx.session_id = url.id;
    ctx.session_source = if ctx.session_id.is_some() {
        SessionSource::Url
    } else {
        SessionSource::None
    };

    let cookie = find_session_cookie(ctx.headers_named("Cookie"), &policy.session_cookie);
    if let Some(id) = cookie {
        ctx.session_id = Some(id);
        ctx.session_source = SessionSource::Cookie;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    fn ctx(uri: &str) -> RequestContext {
        RequestBuilder::new().method("GET").uri(uri).build().unwrap()
    }

    #[test]
    fn url_session_then_normalize() {
        let mut c = ctx("/app/./page;jsessionid=ABC123;other=1");
        prepare(&mut c, &RequestPolicy::default()).unwrap();
        assert_eq!(c.session_id.as_deref(), Some("ABC123"));
        assert_eq!(c.session_source, SessionSource::Url);
        assert_eq!(c.raw_uri, "/app/./page;other=1");
        assert_eq!(c.uri, "/app/page;other=1");
    }

    #[test]
    fn cookie_beats_url() {
        let mut c = RequestBuilder::new()
            .method("GET")
            .uri("/x;jsessionid=FROMURL")
            .header("Cookie", "JSESSIONID=FROMCOOKIE")
            .build()
            .unwrap();
        prepare(&mut c, &RequestPolicy::default()).unwrap();
        assert_eq!(c.session_id.as_deref(), Some("FROMCOOKIE"));
        assert_eq!(c.session_source, SessionSource::Cookie);
        assert_eq!(c.uri, "/x");
    }

    #[test]
    fn no_session_is_not_empty_string() {
        let mut c = ctx("/plain");
        prepare(&mut c, &RequestPolicy::default()).unwrap();
        assert_eq!(c.session_id, None);
        assert_eq!(c.session_source, SessionSource::None);

        let mut e = ctx("/plain;jsessionid=");
        prepare(&mut e, &RequestPolicy::default()).unwrap();
        assert_eq!(e.session_id.as_deref(), Some(""));
    }

    #[test]
    fn refused_uri_leaves_context_alone() {
        let mut c = ctx("/a/%2e%2e/%2e%2e/etc");
        assert_eq!(prepare(&mut c, &RequestPolicy::default()), Err(UriError::RootEscape));
        assert_eq!(c.uri, "");
        assert_eq!(c.raw_uri, "/a/%2e%2e/%2e%2e/etc");
    }

    #[test]
    fn invalid_utf8_escapes_are_refused() {
        for raw in ["/a%FF", "/a%FE"] {
            let mut c = ctx(raw);
            assert_eq!(prepare(&mut c, &RequestPolicy::default()), Err(UriError::IllegalEscape));
            assert_eq!(c.uri, "");
        }
        let mut ok = ctx("/caf%C3%A9");
        prepare(&mut ok, &RequestPolicy::default()).unwrap();
        assert_eq!(ok.uri, "/caf\u{e9}");
    }

    #[test]
    fn escaped_session_param_stays_in_path() {
        let mut c = ctx("/a%3Bjsessionid=BAIT;jsessionid=REAL");
        prepare(&mut c, &RequestPolicy::default()).unwrap();
        assert_eq!(c.session_id.as_deref(), Some("REAL"));
        assert_eq!(c.raw_uri, "/a%3Bjsessionid=BAIT");
        assert_eq!(c.uri, "/a;jsessionid=BAIT");
    }
}
