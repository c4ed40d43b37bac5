use crate::error::UriError;

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decodes a request path into raw bytes.
///
/// Malformed escapes and `%00` are refused. Encoded `/` and `\` are refused
/// unless `allow_encoded_slash` is set, since they would otherwise survive
/// as separators after normalization. `+` is left alone.
pub fn percent_decode(path: &str, allow_encoded_slash: bool) -> Result<Vec<u8>, UriError> {
    let src = path.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let b = src[i];
        if b != b'%' {
            out.push(b);
            i += 1;
            continue;
        }
        let (hi, lo) = match (src.get(i + 1).copied().and_then(hex), src.get(i + 2).copied().and_then(hex)) {
            (Some(hi), Some(lo)) => (hi, lo),
            _ => return Err(UriError::IllegalEscape),
        };
        let decoded = hi << 4 | lo;
        match decoded {
            0 => return Err(UriError::NulByte),
            b'/' | b'\\' if !allow_encoded_slash => return Err(UriError::EncodedSeparator),
            _ => out.push(decoded),
        }
        i += 3;
    }
    Ok(out)
}

/// Percent-decodes a request path to text. Escapes that decode to bytes
/// which are not UTF-8 are refused, so no two raw paths share a result.
pub fn percent_decode_utf8(path: &str, allow_encoded_slash: bool) -> Result<String, UriError> {
    let bytes = percent_decode(path, allow_encoded_slash)?;
    String::from_utf8(bytes).map_err(|_| UriError::IllegalEscape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escapes() {
        assert_eq!(percent_decode("/a%20b", false).unwrap(), b"/a b");
        assert_eq!(percent_decode("/caf%C3%A9", false).unwrap(), "/caf\u{e9}".as_bytes());
        assert_eq!(percent_decode("/a+b", false).unwrap(), b"/a+b");
    }

    #[test]
    fn refuses_bad_escapes() {
        assert_eq!(percent_decode("/a%2", false), Err(UriError::IllegalEscape));
        assert_eq!(percent_decode("/a%zz", false), Err(UriError::IllegalEscape));
        assert_eq!(percent_decode("/a%00b", false), Err(UriError::NulByte));
    }

    #[test]
    fn encoded_separators_follow_policy() {
        assert_eq!(percent_decode("/a%2fb", false), Err(UriError::EncodedSeparator));
        assert_eq!(percent_decode("/a%5Cb", false), Err(UriError::EncodedSeparator));
        assert_eq!(percent_decode("/a%2Fb", true).unwrap(), b"/a/b");
    }

    #[test]
    fn text_decoding_refuses_invalid_utf8() {
        assert_eq!(percent_decode_utf8("/caf%C3%A9", false).unwrap(), "/caf\u{e9}");
        assert_eq!(percent_decode_utf8("/a%FF", false), Err(UriError::IllegalEscape));
        assert_eq!(percent_decode_utf8("/a%C3", false), Err(UriError::IllegalEscape));
    }
}
