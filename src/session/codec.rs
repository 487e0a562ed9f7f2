use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

use crate::message::{Header, Message, MessageError, Negotiated, MARKER};

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

/// Frames BGP messages on a TCP stream. Starts with the pre-OPEN
/// defaults; the session swaps in the negotiated parameters at
/// OPENCONFIRM (they drive max message size, ASN width and add-path).
#[derive(Debug, Default)]
pub struct MessageCodec {
    negotiated: Negotiated,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn set_negotiated(&mut self, negotiated: Negotiated) {
        self.negotiated = negotiated;
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = MessageError;

    // Look for a BGP message (marker + length), then parse it
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = match find_bytes(buf, &MARKER) {
            Some(start) => start,
            None => return Ok(None),
        };
        if buf.len() < start + 19 {
            return Ok(None);
        }
        let length = usize::from(u16::from_be_bytes([buf[start + 16], buf[start + 17]]));
        if buf.len() < start + length.max(19) {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&buf[start..start + length.max(19)]);
        let header = Header::parse(&mut cursor, &self.negotiated)?;
        let message = Message::parse(&header, &mut cursor, &self.negotiated)?;
        buf.advance(start + length);
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = MessageError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        message
            .encode(&self.negotiated, &mut buf.writer())
            .map_err(MessageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keepalive() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        assert_eq!(buf.len(), 19);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(message, Message::KeepAlive));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_message() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        let mut partial = BytesMut::from(&buf[..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_skips_garbage_before_marker() {
        let mut codec = MessageCodec::new();
        let mut framed = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut framed).unwrap();
        let mut buf = BytesMut::from(&[0u8, 45, 0, 0][..]);
        buf.extend_from_slice(&framed);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(message, Message::KeepAlive));
    }

    #[test]
    fn test_decode_bad_length() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&18u16.to_be_bytes());
        buf.extend_from_slice(&[4]);
        match codec.decode(&mut buf) {
            Err(MessageError::Notify { code, subcode, .. }) => {
                assert_eq!((code, subcode), (1, 2))
            }
            other => panic!("expected header notify, got {:?}", other.map(|_| ())),
        }
    }
}
