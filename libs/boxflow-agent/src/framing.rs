//! Frame codec for the agent socket.
//!
//! Every message is an 8-byte fixed header — big-endian `u32` payload
//! length followed by big-endian `u32` protocol version — then `length`
//! bytes of UTF-8 JSON. A frame carrying any other version is fatal for
//! the connection.

use boxflow_api::error::PluginError;

/// The only protocol version this build speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Header = u32 length + u32 version, both big-endian.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a single frame body.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Append one framed message to `out`.
pub fn encode_frame(body: &[u8], out: &mut Vec<u8>) -> Result<(), PluginError> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(PluginError::agent_protocol(format!(
            "frame body too large: {} bytes (max {MAX_FRAME_SIZE})",
            body.len()
        )));
    }
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.extend_from_slice(body);
    Ok(())
}

/// Decode the header into `(length, version)`.
pub fn decode_header(header: &[u8; FRAME_HEADER_SIZE]) -> (usize, u32) {
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    (length, version)
}

/// Incremental decode: returns `Ok(Some((body, consumed)))` for a complete
/// frame, `Ok(None)` while the buffer is still short.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, PluginError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
    let (length, version) = decode_header(&header);

    if version != PROTOCOL_VERSION {
        return Err(PluginError::agent_protocol(format!(
            "unsupported protocol version: {version} (expected {PROTOCOL_VERSION})"
        )));
    }
    if length > MAX_FRAME_SIZE {
        return Err(PluginError::agent_protocol(format!(
            "frame body too large: {length} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    let total = FRAME_HEADER_SIZE + length;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((buf[FRAME_HEADER_SIZE..total].to_vec(), total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let body = br#"{"type":"event"}"#;
        let mut wire = Vec::new();
        encode_frame(body, &mut wire).unwrap();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE + body.len());
        assert_eq!(&wire[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&wire[4..8], &PROTOCOL_VERSION.to_be_bytes());

        let (decoded, consumed) = decode_frame(&wire).unwrap().expect("complete frame");
        assert_eq!(decoded, body);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn short_buffer_yields_none() {
        let mut wire = Vec::new();
        encode_frame(b"abcdef", &mut wire).unwrap();
        assert!(decode_frame(&wire[..3]).unwrap().is_none());
        assert!(decode_frame(&wire[..wire.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn wrong_version_is_fatal() {
        let mut wire = Vec::new();
        encode_frame(b"{}", &mut wire).unwrap();
        wire[7] = 9;
        let err = decode_frame(&wire).unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::AgentProtocol);
    }

    #[test]
    fn oversized_length_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(u32::MAX).to_be_bytes());
        wire.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        assert!(decode_frame(&wire).is_err());
    }
}
