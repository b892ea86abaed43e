//! Framing: one JSON value followed by a newline.
//!
//! A transfer connection carries a single frame in each direction before the raw
//! file bytes start, so the decoder reports exactly how many bytes the frame used
//! and leaves everything after it untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Frame delimiter appended by `encode_frame`.
pub const DELIMITER: u8 = b'\n';

/// Upper bound for a single frame. Metadata is a handful of short strings.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Encode a message into a single frame: JSON payload + `\n`.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = serde_json::to_vec(msg)?;
    if out.len() >= MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    out.push(DELIMITER);
    Ok(out)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// The delimiter is consumed when it is already present; bytes after it are not looked at.
/// Call with partial buffer; returns `NeedMore` if the JSON value is not complete yet.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FrameDecodeError> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
    match stream.next() {
        Some(Ok(msg)) => {
            let mut consumed = stream.byte_offset();
            if consumed > MAX_FRAME_LEN {
                return Err(FrameDecodeError::TooLarge);
            }
            match &bytes[consumed..] {
                [b'\r', b'\n', ..] => consumed += 2,
                [b'\n', ..] => consumed += 1,
                _ => {}
            }
            Ok((msg, consumed))
        }
        Some(Err(e)) if e.is_eof() => need_more(bytes),
        Some(Err(e)) => Err(FrameDecodeError::Decode(e)),
        None => need_more(bytes),
    }
}

fn need_more<T>(bytes: &[u8]) -> Result<T, FrameDecodeError> {
    if bytes.len() >= MAX_FRAME_LEN {
        Err(FrameDecodeError::TooLarge)
    } else {
        Err(FrameDecodeError::NeedMore)
    }
}

/// Number of leading delimiter bytes (`\n`, `\r`, space) in `bytes`.
pub fn leading_delimiters(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|b| matches!(b, b'\n' | b'\r' | b' '))
        .count()
}

/// Error decoding a frame (need more bytes, too large, or malformed JSON).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TransferMetadata, TransferResponse};

    fn sample_metadata() -> TransferMetadata {
        TransferMetadata {
            id: "5a1f0c1e-0000-4000-8000-000000000001".into(),
            file_name: "test.png".into(),
            file_size: 56,
            sender_id: "sender-id".into(),
            sender_name: "sender-name".into(),
        }
    }

    #[test]
    fn roundtrip_metadata() {
        let msg = sample_metadata();
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(*frame.last().unwrap(), DELIMITER);
        let (decoded, n) = decode_frame::<TransferMetadata>(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&sample_metadata()).unwrap();
        assert!(matches!(
            decode_frame::<TransferMetadata>(&frame[..10]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame::<TransferMetadata>(&[]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame::<TransferResponse>(br#"{"accept":tr"#),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn payload_directly_after_frame_is_left_alone() {
        let payload = b"pagedata-simulating-image-bytes-which-should-not-be-lost";
        let json = serde_json::to_vec(&sample_metadata()).unwrap();
        let mut buf = json.clone();
        buf.extend_from_slice(payload);
        let (_, n) = decode_frame::<TransferMetadata>(&buf).unwrap();
        assert_eq!(n, json.len());
        assert_eq!(&buf[n..], payload);
    }

    #[test]
    fn delimiter_is_consumed_with_frame() {
        let mut buf = encode_frame(&sample_metadata()).unwrap();
        let frame_len = buf.len();
        buf.extend_from_slice(b"abc");
        let (_, n) = decode_frame::<TransferMetadata>(&buf).unwrap();
        assert_eq!(n, frame_len);
        assert_eq!(&buf[n..], b"abc");
    }

    #[test]
    fn malformed_frame_is_decode_error() {
        assert!(matches!(
            decode_frame::<TransferMetadata>(b"hello\n"),
            Err(FrameDecodeError::Decode(_))
        ));
        assert!(matches!(
            decode_frame::<TransferMetadata>(br#"{"id":1}"#),
            Err(FrameDecodeError::Decode(_))
        ));
        assert!(matches!(
            decode_frame::<TransferMetadata>(br#"{"id":"x","fileName":"a","fileSize":-4,"senderId":"s","senderName":"n"}"#),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn unterminated_oversized_frame_is_too_large() {
        let mut buf = br#"{"id":""#.to_vec();
        buf.resize(MAX_FRAME_LEN + 1, b'a');
        assert!(matches!(
            decode_frame::<TransferMetadata>(&buf),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[test]
    fn multiple_messages() {
        let a = encode_frame(&TransferResponse { accept: true }).unwrap();
        let b = encode_frame(&TransferResponse { accept: false }).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);
        let (m1, n1) = decode_frame::<TransferResponse>(&buf).unwrap();
        assert_eq!(n1, a.len());
        let (m2, n2) = decode_frame::<TransferResponse>(&buf[n1..]).unwrap();
        assert_eq!(n2, b.len());
        assert!(m1.accept);
        assert!(!m2.accept);
    }

    #[test]
    fn leading_delimiters_counts_whitespace_only() {
        assert_eq!(leading_delimiters(b"\r\n abc"), 3);
        assert_eq!(leading_delimiters(b"abc\n"), 0);
        assert_eq!(leading_delimiters(b"\n\n"), 2);
    }
}
