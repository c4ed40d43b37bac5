use crate::error::UriError;

fn find(buf: &[u8], pat: &[u8]) -> Option<usize> {
    buf.windows(pat.len()).position(|w| w == pat)
}

/// Canonicalizes a request path in place.
///
/// Backslashes become slashes, empty segments collapse, and `.`/`..`
/// segments are resolved. Paths holding NUL, not starting with `/`, or
/// climbing above the root are refused; in `strict` mode so are segments
/// with three or more consecutive dots. On error the buffer content is
/// unspecified and must not be used.
pub fn normalize_in_place(path: &mut Vec<u8>, strict: bool) -> Result<(), UriError> {
    for b in path.iter_mut() {
        match *b {
            b'\\' => *b = b'/',
            0 => return Err(UriError::NulByte),
            _ => {}
        }
    }

    if path.first() != Some(&b'/') {
        return Err(UriError::NotAbsolute);
    }

    while let Some(idx) = find(path, b"//") {
        path.remove(idx);
    }

    if path.ends_with(b"/.") || path.ends_with(b"/..") {
        path.push(b'/');
    }

    while let Some(idx) = find(path, b"/./") {
        path.drain(idx..idx + 2);
    }

    while let Some(idx) = find(path, b"/../") {
        if idx == 0 {
            return Err(UriError::RootEscape);
        }
        let start = path[..idx]
            .iter()
            .rposition(|b| *b == b'/')
            .unwrap_or(0);
        path.drain(start..idx + 3);
    }

    if strict && find(path, b"...").is_some() {
        return Err(UriError::DotRun);
    }

    Ok(())
}

/// Returns the canonical form of `path`. See [`normalize_in_place`].
pub fn normalize(path: &str, strict: bool) -> Result<String, UriError> {
    let mut buf = path.as_bytes().to_vec();
    normalize_in_place(&mut buf, strict)?;
    // only ASCII bytes were removed or rewritten
    String::from_utf8(buf).map_err(|_| UriError::IllegalEscape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_resolves() {
        assert_eq!(normalize("/a//b/./c/../d", false).unwrap(), "/a/b/d");
        assert_eq!(normalize("/", false).unwrap(), "/");
        assert_eq!(normalize("/a/b/..", false).unwrap(), "/a/");
        assert_eq!(normalize("/a/.", false).unwrap(), "/a/");
        assert_eq!(normalize("/a\\b\\..\\c", false).unwrap(), "/a/c");
        assert_eq!(normalize("/a/./././b", false).unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/c/../../d", false).unwrap(), "/a/d");
        assert_eq!(normalize("/..a/b.", false).unwrap(), "/..a/b.");
    }

    #[test]
    fn refuses_root_escape() {
        assert_eq!(normalize("/../x", false), Err(UriError::RootEscape));
        assert_eq!(normalize("/a/../../x", false), Err(UriError::RootEscape));
        assert_eq!(normalize("/..", false), Err(UriError::RootEscape));
    }

    #[test]
    fn refuses_nul_anywhere() {
        assert_eq!(normalize("/ok\0", false), Err(UriError::NulByte));
        assert_eq!(normalize("no-slash\0", false), Err(UriError::NulByte));
    }

    #[test]
    fn requires_leading_slash() {
        assert_eq!(normalize("a/b", false), Err(UriError::NotAbsolute));
        assert_eq!(normalize("", false), Err(UriError::NotAbsolute));
    }

    #[test]
    fn strict_mode_refuses_dot_runs() {
        assert_eq!(normalize("/a/.../b", true), Err(UriError::DotRun));
        assert_eq!(normalize("/a/.../b", false).unwrap(), "/a/.../b");
    }

    #[test]
    fn keeps_multibyte_text() {
        assert_eq!(normalize("/caf\u{e9}/./x", false).unwrap(), "/caf\u{e9}/x");
    }
}
