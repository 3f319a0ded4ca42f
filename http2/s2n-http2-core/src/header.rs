// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pseudo-header handling and the field-section invariants the protocol
//! itself mandates
//!
//! Anything beyond these rules (semantic validation of the message) is the
//! business of the request/response layer.

use crate::{error::Error, http2_error};
use bytes::Bytes;
use http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    uri, Method, StatusCode,
};

//= https://www.rfc-editor.org/rfc/rfc9113#section-8.3
//# Pseudo-header fields are not HTTP header fields.  Endpoints MUST NOT
//# generate pseudo-header fields other than those defined in this
//# document.

//= https://www.rfc-editor.org/rfc/rfc9113#section-8.3
//# All pseudo-header fields MUST appear in a field block before all
//# regular field lines.  Any request or response that contains a
//# pseudo-header field that appears in a field block after a regular
//# field line MUST be treated as malformed (Section 8.1.1).

/// The request/response metadata carried as pseudo-header fields
///
/// Exactly the set the protocol defines: `:method`, `:scheme`,
/// `:authority`, `:path` for requests and `:status` for responses, each at
/// most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pseudo {
    pub method: Option<Method>,
    pub scheme: Option<uri::Scheme>,
    pub authority: Option<uri::Authority>,
    pub path: Option<uri::PathAndQuery>,
    pub status: Option<StatusCode>,
}

impl Pseudo {
    /// Builds the pseudo-header tuple for an outgoing request
    pub fn request(method: Method, uri: http::Uri) -> Self {
        let parts = uri.into_parts();

        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.5
        //# *  The ":scheme" and ":path" pseudo-header fields MUST be omitted.
        let is_connect = method == Method::CONNECT;

        let path = if is_connect {
            None
        } else {
            parts
                .path_and_query
                .or_else(|| Some(uri::PathAndQuery::from_static("/")))
        };

        Self {
            method: Some(method),
            scheme: if is_connect { None } else { parts.scheme },
            authority: parts.authority,
            path,
            status: None,
        }
    }

    /// Builds the pseudo-header tuple for an outgoing response
    pub fn response(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns true if no pseudo-header is present (a trailer section)
    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.scheme.is_none()
            && self.authority.is_none()
            && self.path.is_none()
            && self.status.is_none()
    }

    /// Checks the tuple against the request rules
    pub fn validate_request(&self) -> Result<(), Error> {
        if self.status.is_some() {
            return Err(malformed());
        }

        let method = self.method.as_ref().ok_or_else(malformed)?;

        if *method == Method::CONNECT {
            //= https://www.rfc-editor.org/rfc/rfc9113#section-8.5
            //# *  The ":authority" pseudo-header field contains the host and port
            //#    to connect to.
            if self.scheme.is_some() || self.path.is_some() || self.authority.is_none() {
                return Err(malformed());
            }
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9113#section-8.3.1
            //# All HTTP/2 requests MUST include exactly one valid value for the
            //# ":method", ":scheme", and ":path" pseudo-header fields, unless
            //# they are CONNECT requests (Section 8.5).
            if self.scheme.is_none() || self.path.is_none() {
                return Err(malformed());
            }
        }

        Ok(())
    }

    /// Checks the tuple against the response rules
    pub fn validate_response(&self) -> Result<(), Error> {
        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.3.2
        //# For HTTP/2 responses, a single ":status" pseudo-header field is
        //# defined that carries the HTTP status code field.
        let request_pseudo = self.method.is_some()
            || self.scheme.is_some()
            || self.authority.is_some()
            || self.path.is_some();

        if self.status.is_none() || request_pseudo {
            return Err(malformed());
        }

        Ok(())
    }
}

fn malformed() -> Error {
    http2_error!(PROTOCOL_ERROR, "malformed field section")
}

/// Splits a decoded field list into the pseudo tuple and the regular fields
///
/// This is the seam between the HPACK codec collaborator (which produces raw
/// name/value pairs in block order) and the engine. It enforces the rules the
/// protocol states for field blocks: pseudo-headers first and at most once
/// each, lowercase names, and no HTTP/1 connection-specific fields.
pub fn split_field_list<I>(fields: I) -> Result<(Pseudo, HeaderMap), Error>
where
    I: IntoIterator<Item = (Bytes, Bytes)>,
{
    let mut pseudo = Pseudo::default();
    let mut map = HeaderMap::new();
    let mut seen_regular = false;

    for (name, value) in fields {
        if name.starts_with(b":") {
            if seen_regular {
                return Err(malformed());
            }
            set_pseudo(&mut pseudo, &name, value)?;
            continue;
        }

        seen_regular = true;

        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.2
        //# A field name MUST NOT contain characters in the ranges 0x00-0x20,
        //# 0x41-0x5a, or 0x7f-0xff (all ranges inclusive).
        if name.iter().any(u8::is_ascii_uppercase) {
            return Err(http2_error!(
                PROTOCOL_ERROR,
                "field names must be lowercase"
            ));
        }

        let name = HeaderName::from_bytes(&name).map_err(|_| malformed())?;
        let value = HeaderValue::from_maybe_shared(value).map_err(|_| malformed())?;

        //= https://www.rfc-editor.org/rfc/rfc9113#section-8.2.2
        //# An endpoint MUST NOT generate an HTTP/2 message containing
        //# connection-specific header fields.  [...] The only exception to
        //# this is the TE header field, which MAY be present in an HTTP/2
        //# request; when it is, it MUST NOT contain any value other than
        //# "trailers".
        if is_connection_specific(&name) {
            return Err(http2_error!(
                PROTOCOL_ERROR,
                "connection-specific field in field section"
            ));
        }
        if name == header::TE && value.as_bytes() != b"trailers" {
            return Err(http2_error!(PROTOCOL_ERROR, "te must be \"trailers\""));
        }

        map.append(name, value);
    }

    Ok((pseudo, map))
}

fn set_pseudo(pseudo: &mut Pseudo, name: &[u8], value: Bytes) -> Result<(), Error> {
    macro_rules! set_once {
        ($field:ident, $value:expr) => {{
            if pseudo.$field.is_some() {
                return Err(malformed());
            }
            pseudo.$field = Some($value);
        }};
    }

    match name {
        b":method" => set_once!(
            method,
            Method::from_bytes(&value).map_err(|_| malformed())?
        ),
        b":scheme" => set_once!(
            scheme,
            uri::Scheme::try_from(&value[..]).map_err(|_| malformed())?
        ),
        b":authority" => set_once!(
            authority,
            uri::Authority::from_maybe_shared(value).map_err(|_| malformed())?
        ),
        b":path" => set_once!(
            path,
            uri::PathAndQuery::from_maybe_shared(value).map_err(|_| malformed())?
        ),
        b":status" => set_once!(
            status,
            StatusCode::from_bytes(&value).map_err(|_| malformed())?
        ),
        _ => return Err(malformed()),
    }

    Ok(())
}

fn is_connection_specific(name: &HeaderName) -> bool {
    // keep-alive and proxy-connection predate the named constants
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::HOST
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

/// Strips fields that carry HTTP/1 connection semantics before emission
///
/// Senders translating a message from HTTP/1 call this instead of tripping
/// the receive-side validation on the peer.
pub fn sanitize(fields: &mut HeaderMap) {
    for name in [
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
    ] {
        fields.remove(name);
    }
    fields.remove("keep-alive");
    fields.remove("proxy-connection");

    if let Some(te) = fields.get(header::TE) {
        if te.as_bytes() != b"trailers" {
            fields.remove(header::TE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, value: &'static str) -> (Bytes, Bytes) {
        (Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes()))
    }

    #[test]
    fn request_field_list() {
        let (pseudo, fields) = split_field_list(vec![
            field(":method", "GET"),
            field(":scheme", "https"),
            field(":authority", "example.com"),
            field(":path", "/index.html"),
            field("accept", "text/html"),
            field("te", "trailers"),
        ])
        .unwrap();

        pseudo.validate_request().unwrap();
        assert_eq!(pseudo.method, Some(Method::GET));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn pseudo_after_regular_is_malformed() {
        let err = split_field_list(vec![
            field(":method", "GET"),
            field("accept", "*/*"),
            field(":path", "/"),
        ])
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::PROTOCOL_ERROR);
    }

    #[test]
    fn duplicate_pseudo_is_malformed() {
        assert!(split_field_list(vec![
            field(":status", "200"),
            field(":status", "204"),
        ])
        .is_err());
    }

    #[test]
    fn unknown_pseudo_is_malformed() {
        assert!(split_field_list(vec![field(":version", "11")]).is_err());
    }

    #[test]
    fn uppercase_names_are_malformed() {
        assert!(split_field_list(vec![field(":method", "GET"), (
            Bytes::from_static(b"Accept"),
            Bytes::from_static(b"*/*"),
        )])
        .is_err());
    }

    #[test]
    fn connection_specific_fields_are_malformed() {
        for name in [
            "connection",
            "keep-alive",
            "proxy-connection",
            "transfer-encoding",
            "host",
            "upgrade",
        ] {
            let err = split_field_list(vec![(
                Bytes::copy_from_slice(name.as_bytes()),
                Bytes::from_static(b"x"),
            )])
            .unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::PROTOCOL_ERROR, "{name}");
        }

        assert!(split_field_list(vec![field("te", "gzip")]).is_err());
    }

    #[test]
    fn connect_requests() {
        let pseudo = Pseudo {
            method: Some(Method::CONNECT),
            authority: Some(uri::Authority::from_static("example.com:443")),
            ..Pseudo::default()
        };
        pseudo.validate_request().unwrap();

        let pseudo = Pseudo::request(Method::CONNECT, "https://example.com:443".parse().unwrap());
        assert!(pseudo.scheme.is_none());
        assert!(pseudo.path.is_none());
        pseudo.validate_request().unwrap();
    }

    #[test]
    fn response_validation() {
        Pseudo::response(StatusCode::OK).validate_response().unwrap();

        let mixed = Pseudo {
            status: Some(StatusCode::OK),
            method: Some(Method::GET),
            ..Pseudo::default()
        };
        assert!(mixed.validate_response().is_err());
        assert!(Pseudo::default().validate_response().is_err());
    }

    #[test]
    fn sanitize_strips_connection_fields() {
        let mut fields = HeaderMap::new();
        fields.insert(header::CONNECTION, HeaderValue::from_static("close"));
        fields.insert(header::HOST, HeaderValue::from_static("example.com"));
        fields.insert(header::TE, HeaderValue::from_static("gzip"));
        fields.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        sanitize(&mut fields);

        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key(header::ACCEPT));
    }
}
