//! Line framing.
//!
//! Every frame is one JSON object terminated by `\n`:
//!
//! ```text
//! {"frame":"request","id":1,"request":{"type":"ping"}}
//! {"frame":"reply","id":1,"reply":{"type":"pong"}}
//! {"frame":"event","event":{"type":"studio_started"}}
//! ```
//!
//! Replies carry the id of the request they answer. Events have no id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Event, Reply, Request};

/// Longest line either side will accept.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is {0} bytes, limit is {MAX_FRAME_LEN}")]
    TooLong(usize),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request { id: u64, request: Request },
    Reply { id: u64, reply: Reply },
    Event { event: Event },
}

impl Frame {
    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLong(bytes.len()));
        }
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode one line. Trailing `\r\n` or `\n` is ignored.
    pub fn decode(line: &str) -> Result<Self, FrameError> {
        if line.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLong(line.len()));
        }
        Ok(serde_json::from_str(line.trim_end_matches(&['\r', '\n'][..]))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_is_one_line() {
        let frame = Frame::Request {
            id: 9,
            request: Request::NewStudio {
                name: "multi\nline".to_string(),
            },
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(bytes.last(), Some(&b'\n'));

        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(Frame::decode(&text).unwrap(), frame);
    }

    #[test]
    fn test_decode_reply_wire_format() {
        let frame = Frame::decode(r#"{"frame":"reply","id":3,"reply":{"type":"pong"}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Reply {
                id: 3,
                reply: Reply::Pong
            }
        );
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(Frame::decode("not json"), Err(FrameError::Json(_))));
        assert!(Frame::decode(r#"{"frame":"bogus"}"#).is_err());
    }
}
