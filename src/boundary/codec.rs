//! Wire string codec for the controller boundary.
//!
//! The controller hands strings across the boundary in its platform wire
//! encoding: UTF-16 code units on Windows, UTF-8 bytes elsewhere, both
//! NUL-terminated. Every decode failure is converted to an error here and
//! surfaces as a non-zero status code; nothing on this path may unwind back
//! into the controller.

use thiserror::Error;

use crate::ipc::{Message, Topic, TopicParseError};

/// Status codes returned across the boundary.
pub mod status {
    /// Message accepted for routing. Individual recipient failures are not
    /// reflected here.
    pub const OK: i32 = 0;
    /// Wire string or topic identifier could not be decoded.
    pub const DECODE_FAILED: i32 = 1;
    /// Routing itself failed (control command error, service failure).
    pub const ROUTE_FAILED: i32 = 2;
    /// A panic was contained at the boundary.
    pub const FAULT: i32 = 3;
}

/// Wire encoding of boundary strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    Utf8,
    Utf16,
}

impl WireEncoding {
    /// Encoding the controller uses on this platform.
    pub const fn native() -> Self {
        #[cfg(windows)]
        {
            WireEncoding::Utf16
        }
        #[cfg(not(windows))]
        {
            WireEncoding::Utf8
        }
    }
}

/// An owned boundary string in wire form, including the terminating NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireString {
    Utf8(Vec<u8>),
    Utf16(Vec<u16>),
}

impl WireString {
    pub fn encoding(&self) -> WireEncoding {
        match self {
            WireString::Utf8(_) => WireEncoding::Utf8,
            WireString::Utf16(_) => WireEncoding::Utf16,
        }
    }

    /// Pointer to the first code unit, suitable for handing to the
    /// controller. Valid for the lifetime of `self`.
    pub fn as_ptr(&self) -> *const std::ffi::c_void {
        match self {
            WireString::Utf8(b) => b.as_ptr().cast(),
            WireString::Utf16(u) => u.as_ptr().cast(),
        }
    }
}

/// Codec failures. All are mapped to `status::DECODE_FAILED` at the entry
/// point.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("NUL pointer passed across the boundary")]
    NullPointer,

    #[error("wire string is not valid UTF-8")]
    InvalidUtf8,

    #[error("wire string is not valid UTF-16")]
    InvalidUtf16,

    #[error("wire string encoding does not match the boundary encoding")]
    EncodingMismatch,

    #[error(transparent)]
    Topic(#[from] TopicParseError),
}

/// Converts between the host's internal strings and the controller's wire
/// representation. Owns no state beyond the chosen encoding.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryCodec {
    encoding: WireEncoding,
}

impl BoundaryCodec {
    pub const fn new(encoding: WireEncoding) -> Self {
        Self { encoding }
    }

    /// Codec for the current platform's wire encoding.
    pub const fn native() -> Self {
        Self::new(WireEncoding::native())
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    /// Encode an internal string into wire form (NUL-terminated).
    pub fn encode(&self, s: &str) -> WireString {
        match self.encoding {
            WireEncoding::Utf8 => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                WireString::Utf8(bytes)
            }
            WireEncoding::Utf16 => {
                let mut units: Vec<u16> = s.encode_utf16().collect();
                units.push(0);
                WireString::Utf16(units)
            }
        }
    }

    /// Decode a wire string back into an internal string. The terminating
    /// NUL, if still present, is stripped.
    pub fn decode(&self, wire: &WireString) -> Result<String, CodecError> {
        if wire.encoding() != self.encoding {
            return Err(CodecError::EncodingMismatch);
        }
        match wire {
            WireString::Utf8(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                std::str::from_utf8(&bytes[..end])
                    .map(str::to_owned)
                    .map_err(|_| CodecError::InvalidUtf8)
            }
            WireString::Utf16(units) => {
                let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
                String::from_utf16(&units[..end]).map_err(|_| CodecError::InvalidUtf16)
            }
        }
    }

    /// Decode the three wire components of an inbound call into a `Message`.
    pub fn decode_message(
        &self,
        payload: &WireString,
        topic: &WireString,
        session: i32,
    ) -> Result<Message, CodecError> {
        let payload = self.decode(payload)?;
        let topic = Topic::parse(&self.decode(topic)?)?;
        Ok(Message::new(payload, topic, session))
    }

    /// Encode a `Message` into the wire triple handed to the controller.
    pub fn encode_message(&self, msg: &Message) -> (WireString, WireString, i32) {
        (
            self.encode(&msg.payload),
            self.encode(&msg.topic.to_string()),
            msg.session,
        )
    }

    /// Capture a NUL-terminated wire string from a raw boundary pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must either be NUL or point to a NUL-terminated buffer of the
    /// codec's code unit type that stays valid for the duration of the call.
    pub unsafe fn capture(&self, ptr: *const std::ffi::c_void) -> Result<WireString, CodecError> {
        if ptr.is_null() {
            return Err(CodecError::NullPointer);
        }
        match self.encoding {
            WireEncoding::Utf8 => {
                let cstr = std::ffi::CStr::from_ptr(ptr.cast());
                let mut bytes = cstr.to_bytes().to_vec();
                bytes.push(0);
                Ok(WireString::Utf8(bytes))
            }
            WireEncoding::Utf16 => {
                let mut len = 0usize;
                let units: *const u16 = ptr.cast();
                while *units.add(len) != 0 {
                    len += 1;
                }
                let mut buf = std::slice::from_raw_parts(units, len).to_vec();
                buf.push(0);
                Ok(WireString::Utf16(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{HOST_CONTROL, NO_SESSION};

    #[test]
    fn utf8_round_trip() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let wire = codec.encode("hello module");
        assert_eq!(codec.decode(&wire).unwrap(), "hello module");
    }

    #[test]
    fn utf16_round_trip_with_non_ascii() {
        let codec = BoundaryCodec::new(WireEncoding::Utf16);
        let wire = codec.encode("gruß vom host \u{1F980}");
        assert_eq!(codec.decode(&wire).unwrap(), "gruß vom host \u{1F980}");
    }

    #[test]
    fn message_round_trip() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let msg = Message::new(r#"{"Cmd":0}"#, HOST_CONTROL, 7);
        let (payload, topic, session) = codec.encode_message(&msg);
        let back = codec.decode_message(&payload, &topic, session).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let wire = WireString::Utf8(vec![0xFF, 0xFE, 0x00]);
        assert!(matches!(codec.decode(&wire), Err(CodecError::InvalidUtf8)));
    }

    #[test]
    fn unpaired_surrogate_is_a_decode_error() {
        let codec = BoundaryCodec::new(WireEncoding::Utf16);
        let wire = WireString::Utf16(vec![0xD800, 0x0000]);
        assert!(matches!(codec.decode(&wire), Err(CodecError::InvalidUtf16)));
    }

    #[test]
    fn encoding_mismatch_is_rejected() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let wire = WireString::Utf16(vec![0x68, 0x00]);
        assert!(matches!(
            codec.decode(&wire),
            Err(CodecError::EncodingMismatch)
        ));
    }

    #[test]
    fn bad_topic_is_a_decode_error() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let payload = codec.encode("{}");
        let topic = codec.encode("not-a-guid");
        let result = codec.decode_message(&payload, &topic, NO_SESSION);
        assert!(matches!(result, Err(CodecError::Topic(_))));
    }

    #[test]
    fn capture_utf8_from_raw_pointer() {
        let codec = BoundaryCodec::new(WireEncoding::Utf8);
        let backing = b"raw wire\0";
        let wire = unsafe { codec.capture(backing.as_ptr().cast()) }.unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), "raw wire");
    }

    #[test]
    fn capture_rejects_null() {
        let codec = BoundaryCodec::native();
        let result = unsafe { codec.capture(std::ptr::null()) };
        assert!(matches!(result, Err(CodecError::NullPointer)));
    }
}
