//! Session id lookup in path parameters and cookies.

use tracing::{debug, warn};

use super::decode::percent_decode_utf8;
use crate::error::{ConnectorError, UriError};

/// Where the session id of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionSource {
    #[default]
    None,
    Url,
    Cookie,
}

/// A path parameter removed from a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    pub value: String,
    /// The URI with `;name=value` cut out.
    pub residual: String,
}

/// Finds `;<name>=<value>` in `uri`. The value ends at the next `;` or at
/// the end of the string; anything after it is kept in the residual.
pub fn strip_path_param(uri: &str, name: &str) -> Option<PathParam> {
    let token = format!(";{name}=");
    let start = uri.find(&token)?;
    let value_start = start + token.len();
    let end = uri[value_start..]
        .find(';')
        .map(|i| value_start + i)
        .unwrap_or(uri.len());
    Some(PathParam {
        value: uri[value_start..end].to_string(),
        residual: format!("{}{}", &uri[..start], &uri[end..]),
    })
}

/// Result of the session pass over a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSession {
    pub id: Option<String>,
    /// Raw URI with the session parameter cut out.
    pub raw: String,
    /// `raw` after percent-decoding.
    pub decoded: String,
}

/// Strips the session parameter from the raw URI and decodes what is left.
///
/// The raw URI is authoritative: an id that appears only after decoding
/// was sent as escaped text, not as a path parameter, and stays in the
/// path. The decoded form is derived from the raw residual so both always
/// describe the same path. A decoded-side scan still runs and a
/// disagreement with the raw id is logged.
pub fn extract_url_session(raw: &str, name: &str, allow_encoded_slash: bool) -> Result<UrlSession, UriError> {
    let Some(hit) = strip_path_param(raw, name) else {
        return Ok(UrlSession {
            id: None,
            raw: raw.to_string(),
            decoded: percent_decode_utf8(raw, allow_encoded_slash)?,
        });
    };
    let decoded = percent_decode_utf8(&hit.residual, allow_encoded_slash)?;
    if let Ok(full) = percent_decode_utf8(raw, allow_encoded_slash) {
        if let Some(other) = strip_path_param(&full, name) {
            if other.value != hit.value {
                debug!(raw = %hit.value, decoded = %other.value, "Session id differs after decoding");
            }
        }
    }
    Ok(UrlSession {
        id: Some(hit.value),
        raw: hit.residual,
        decoded,
    })
}

/// One `name=value` pair from a Cookie header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

fn valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

fn parse_pair(pair: &str) -> Result<Cookie, ConnectorError> {
    let malformed = |detail: &str| ConnectorError::Ancillary {
        what: "cookie",
        detail: detail.to_string(),
    };
    let (name, value) = pair.split_once('=').ok_or_else(|| malformed(pair))?;
    let name = name.trim();
    if !valid_cookie_name(name) {
        return Err(malformed(pair));
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok(Cookie {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parses a Cookie header value. Malformed pairs are logged and skipped.
pub fn parse_cookies(header: &str) -> Vec<Cookie> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match parse_pair(pair) {
            Ok(cookie) => Some(cookie),
            Err(e) => {
                warn!(error = %e, "Skipping cookie");
                None
            }
        })
        .collect()
}

/// Picks the session cookie out of every Cookie header value. The first
/// cookie named `name` wins; later duplicates are ignored.
pub fn find_session_cookie<'a, I>(headers: I, name: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    headers
        .into_iter()
        .flat_map(parse_cookies)
        .find(|c| c.name == name)
        .map(|c| c.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_param_and_keeps_trailing_params() {
        let hit = strip_path_param("/app/page;jsessionid=ABC123;other=1", "jsessionid").unwrap();
        assert_eq!(hit.value, "ABC123");
        assert_eq!(hit.residual, "/app/page;other=1");
    }

    #[test]
    fn param_at_end_and_empty_value() {
        let hit = strip_path_param("/a;jsessionid=XYZ", "jsessionid").unwrap();
        assert_eq!((hit.value.as_str(), hit.residual.as_str()), ("XYZ", "/a"));

        let empty = strip_path_param("/a;jsessionid=", "jsessionid").unwrap();
        assert_eq!(empty.value, "");
        assert!(strip_path_param("/a;other=1", "jsessionid").is_none());
    }

    #[test]
    fn raw_pass_is_authoritative() {
        let s = extract_url_session("/a%3Bjsessionid=X", "jsessionid", false).unwrap();
        assert_eq!(s.id, None);
        assert_eq!(s.decoded, "/a;jsessionid=X");

        let s = extract_url_session("/b%20c;jsessionid=Q;v=1", "jsessionid", false).unwrap();
        assert_eq!(s.id.as_deref(), Some("Q"));
        assert_eq!(s.raw, "/b%20c;v=1");
        assert_eq!(s.decoded, "/b c;v=1");
    }

    #[test]
    fn escaped_decoy_does_not_hide_the_real_id() {
        let s = extract_url_session("/a%3Bjsessionid=BAIT;jsessionid=REAL", "jsessionid", false).unwrap();
        assert_eq!(s.id.as_deref(), Some("REAL"));
        assert_eq!(s.raw, "/a%3Bjsessionid=BAIT");
        assert_eq!(s.decoded, "/a;jsessionid=BAIT");
        assert!(!s.decoded.contains("REAL"));
    }

    #[test]
    fn undecodable_residual_is_refused() {
        assert_eq!(
            extract_url_session("/a%FF;jsessionid=S", "jsessionid", false),
            Err(UriError::IllegalEscape)
        );
        assert_eq!(
            extract_url_session("/a%2F;jsessionid=S", "jsessionid", false),
            Err(UriError::EncodedSeparator)
        );
    }

    #[test]
    fn first_session_cookie_wins() {
        let headers = ["theme=dark; JSESSIONID=first", "JSESSIONID=second"];
        assert_eq!(
            find_session_cookie(headers.iter().copied(), "JSESSIONID").as_deref(),
            Some("first")
        );
    }

    #[test]
    fn malformed_cookies_are_skipped() {
        let cookies = parse_cookies("novalue; =anon; bad name=1; ok=\"quoted\"");
        assert_eq!(
            cookies,
            vec![Cookie {
                name: "ok".into(),
                value: "quoted".into()
            }]
        );
    }
}
