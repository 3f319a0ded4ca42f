// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# Error codes are 32-bit fields that are used in RST_STREAM and GOAWAY
//# frames to convey the reasons for the stream or connection error.

/// An HTTP/2 error code
///
/// Error codes are shared between the stream and the connection scope; the
/// frame that carries the code (RST_STREAM vs GOAWAY) decides the scope.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Creates an `ErrorCode` from the wire representation
    #[inline]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns the wire representation of the code
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the registered name of the code, if any
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::NO_ERROR => "NO_ERROR",
            Self::PROTOCOL_ERROR => "PROTOCOL_ERROR",
            Self::INTERNAL_ERROR => "INTERNAL_ERROR",
            Self::FLOW_CONTROL_ERROR => "FLOW_CONTROL_ERROR",
            Self::SETTINGS_TIMEOUT => "SETTINGS_TIMEOUT",
            Self::STREAM_CLOSED => "STREAM_CLOSED",
            Self::FRAME_SIZE_ERROR => "FRAME_SIZE_ERROR",
            Self::REFUSED_STREAM => "REFUSED_STREAM",
            Self::CANCEL => "CANCEL",
            Self::COMPRESSION_ERROR => "COMPRESSION_ERROR",
            Self::CONNECT_ERROR => "CONNECT_ERROR",
            Self::ENHANCE_YOUR_CALM => "ENHANCE_YOUR_CALM",
            Self::INADEQUATE_SECURITY => "INADEQUATE_SECURITY",
            Self::HTTP_1_1_REQUIRED => "HTTP_1_1_REQUIRED",
            _ => return None,
        })
    }
}

impl From<u32> for ErrorCode {
    #[inline]
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<ErrorCode> for u32 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "ErrorCode({:#x})", self.0),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Internal convenience macro for defining standard error codes
macro_rules! def_error_code {
    ($doc:expr, $name:ident, $code:expr) => {
        impl ErrorCode {
            #[doc = $doc]
            pub const $name: ErrorCode = ErrorCode($code);
        }
    };
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# NO_ERROR (0x00):
//#    The associated condition is not a result of an error.  For example,
//#    a GOAWAY might include this code to indicate graceful shutdown of a
//#    connection.

def_error_code!(
    "The associated condition is not a result of an error.",
    NO_ERROR,
    0x0
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# PROTOCOL_ERROR (0x01):
//#    The endpoint detected an unspecific protocol error.  This error is
//#    for use when a more specific error code is not available.

def_error_code!(
    "The endpoint detected an unspecific protocol error.",
    PROTOCOL_ERROR,
    0x1
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# INTERNAL_ERROR (0x02):
//#    The endpoint encountered an unexpected internal error.

def_error_code!(
    "The endpoint encountered an unexpected internal error.",
    INTERNAL_ERROR,
    0x2
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# FLOW_CONTROL_ERROR (0x03):
//#    The endpoint detected that its peer violated the flow-control
//#    protocol.

def_error_code!(
    "The endpoint detected that its peer violated the flow-control protocol.",
    FLOW_CONTROL_ERROR,
    0x3
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# SETTINGS_TIMEOUT (0x04):
//#    The endpoint sent a SETTINGS frame but did not receive a response in
//#    a timely manner.

def_error_code!(
    "The endpoint sent a SETTINGS frame but did not receive a response in a timely manner.",
    SETTINGS_TIMEOUT,
    0x4
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# STREAM_CLOSED (0x05):
//#    The endpoint received a frame after a stream was half-closed.

def_error_code!(
    "The endpoint received a frame after a stream was half-closed.",
    STREAM_CLOSED,
    0x5
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# FRAME_SIZE_ERROR (0x06):
//#    The endpoint received a frame with an invalid size.

def_error_code!(
    "The endpoint received a frame with an invalid size.",
    FRAME_SIZE_ERROR,
    0x6
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# REFUSED_STREAM (0x07):
//#    The endpoint refused the stream prior to performing any application
//#    processing (see Section 8.7 for details).

def_error_code!(
    "The endpoint refused the stream prior to performing any application processing.",
    REFUSED_STREAM,
    0x7
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# CANCEL (0x08):
//#    The endpoint uses this error code to indicate that the stream is no
//#    longer needed.

def_error_code!(
    "The endpoint uses this error code to indicate that the stream is no longer needed.",
    CANCEL,
    0x8
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# COMPRESSION_ERROR (0x09):
//#    The endpoint is unable to maintain the field section compression
//#    context for the connection.

def_error_code!(
    "The endpoint is unable to maintain the field section compression context for the connection.",
    COMPRESSION_ERROR,
    0x9
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# CONNECT_ERROR (0x0a):
//#    The connection established in response to a CONNECT request
//#    (Section 8.5) was reset or abnormally closed.

def_error_code!(
    "The connection established in response to a CONNECT request was reset or abnormally closed.",
    CONNECT_ERROR,
    0xa
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# ENHANCE_YOUR_CALM (0x0b):
//#    The endpoint detected that its peer is exhibiting a behavior that
//#    might be generating excessive load.

def_error_code!(
    "The endpoint detected that its peer is exhibiting a behavior that might be generating excessive load.",
    ENHANCE_YOUR_CALM,
    0xb
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# INADEQUATE_SECURITY (0x0c):
//#    The underlying transport has properties that do not meet minimum
//#    security requirements (see Section 9.2).

def_error_code!(
    "The underlying transport has properties that do not meet minimum security requirements.",
    INADEQUATE_SECURITY,
    0xc
);

//= https://www.rfc-editor.org/rfc/rfc9113#section-7
//# HTTP_1_1_REQUIRED (0x0d):
//#    The endpoint requires that HTTP/1.1 be used instead of HTTP/2.

def_error_code!(
    "The endpoint requires that HTTP/1.1 be used instead of HTTP/2.",
    HTTP_1_1_REQUIRED,
    0xd
);

/// A protocol failure with the code that will be reported to the peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub reason: &'static str,
}

impl Error {
    /// Creates a new `Error` with the specified information
    pub const fn new(code: ErrorCode, reason: &'static str) -> Self {
        Self { code, reason }
    }

    /// Updates the `Error` with the specified `reason`
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl From<ErrorCode> for Error {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        Self { code, reason: "" }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

impl std::error::Error for Error {}

/// Creates an [`Error`] with variable arguments
#[macro_export]
macro_rules! http2_error {
    ($code:ident) => {
        $crate::error::Error::new($crate::error::ErrorCode::$code, "")
    };
    ($code:ident, $reason:expr) => {
        $crate::error::Error::new($crate::error::ErrorCode::$code, $reason)
    };
    ($code:expr, $reason:expr) => {
        $crate::error::Error::new($code, $reason)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_names() {
        assert_eq!(ErrorCode::NO_ERROR.name(), Some("NO_ERROR"));
        assert_eq!(ErrorCode::HTTP_1_1_REQUIRED.name(), Some("HTTP_1_1_REQUIRED"));
        assert_eq!(ErrorCode::new(0xe).name(), None);
        assert_eq!(ErrorCode::HTTP_1_1_REQUIRED.as_u32(), 0xd);
    }

    #[test]
    fn display() {
        let err = http2_error!(FLOW_CONTROL_ERROR, "window overflow");
        assert_eq!(err.to_string(), "FLOW_CONTROL_ERROR: window overflow");
        assert_eq!(
            http2_error!(PROTOCOL_ERROR).to_string(),
            "PROTOCOL_ERROR"
        );
    }
}
