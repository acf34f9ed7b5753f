//! Multipart frame encoding for the egress stream
//!
//! Each frame travels as one part of a `multipart/x-mixed-replace`
//! response; browsers replace the displayed image on every part.

use bytes::{BufMut, Bytes, BytesMut};

/// Boundary token used between parts.
pub const BOUNDARY: &str = "frame";

/// Content type of the egress response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Encode one image frame as a complete multipart part.
pub fn encode_part(frame: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(frame.len() + 96);
    part.put_slice(b"--frame\r\n");
    part.put_slice(b"Content-Type: image/jpeg\r\n");
    part.put_slice(format!("Content-Length: {}\r\n\r\n", frame.len()).as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let part = encode_part(b"ab");
        let expected =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 2\r\n\r\nab\r\n";
        assert_eq!(part.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_empty_frame() {
        let part = encode_part(b"");
        assert!(part.starts_with(b"--frame\r\n"));
        assert!(part.ends_with(b"\r\n\r\n\r\n"));
    }
}
