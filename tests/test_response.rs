use coupler::http::response::{ResponseHead, StatusCode};
use coupler::http::writer::serialize_head;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    assert_eq!(StatusCode::Other(302).as_u16(), 302);
}

#[test]
fn test_status_code_from_u16() {
    assert_eq!(StatusCode::from_u16(400), StatusCode::BadRequest);
    assert_eq!(StatusCode::from_u16(418), StatusCode::Other(418));
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NoContent.reason_phrase(), "No Content");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(StatusCode::Other(405).reason_phrase(), "Method Not Allowed");
    assert_eq!(StatusCode::Other(599).reason_phrase(), "Unknown");
}

#[test]
fn test_head_message_override() {
    let mut head = ResponseHead::new();
    head.status = StatusCode::BadRequest;
    assert_eq!(head.message(), "Bad Request");

    head.message = Some("Invalid URI".into());
    assert_eq!(head.message(), "Invalid URI");
}

#[test]
fn test_head_special_headers_kept_apart() {
    let mut head = ResponseHead::new();
    head.add_header("content-type", "text/html");
    head.add_header("Content-Length", "12");
    head.add_header("X-Custom", "yes");

    assert_eq!(head.content_type.as_deref(), Some("text/html"));
    assert_eq!(head.content_length, Some(12));
    assert_eq!(head.header("x-custom"), Some("yes"));
    assert_eq!(head.header("Content-Type"), None);
}

#[test]
fn test_head_declared_encoding() {
    let mut head = ResponseHead::new();
    assert_eq!(head.declared_encoding(), None);

    head.add_header("Content-Type", "text/plain; charset=UTF-16");
    assert_eq!(head.declared_encoding(), Some("UTF-16"));

    head.character_encoding = Some("UTF-8".into());
    assert_eq!(head.declared_encoding(), Some("UTF-8"));
}

#[test]
fn test_wire_headers_append_charset() {
    let mut head = ResponseHead::new();
    head.add_header("Content-Type", "text/plain");
    head.character_encoding = Some("UTF-8".into());
    head.content_length = Some(3);

    let headers = head.wire_headers();
    assert!(headers.contains(&("Content-Type".to_string(), "text/plain;charset=UTF-8".to_string())));
    assert!(headers.contains(&("Content-Length".to_string(), "3".to_string())));
}

#[test]
fn test_serialize_head_chunked_close() {
    let mut head = ResponseHead::new();
    head.add_header("X-A", "1");

    let out = String::from_utf8(serialize_head(&head, true, false)).unwrap();

    assert_eq!(
        out,
        "HTTP/1.1 200 OK\r\nX-A: 1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
    );
}

#[test]
fn test_head_reset() {
    let mut head = ResponseHead::new();
    head.status = StatusCode::NotFound;
    head.add_header("X-A", "1");
    head.committed = true;

    head.reset();

    assert_eq!(head, ResponseHead::default());
}
