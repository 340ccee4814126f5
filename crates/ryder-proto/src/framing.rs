// Byte-level response decoding.
//
// Status responses are one byte. Output blocks start with OUTPUT, end with
// OUTPUT_END, and use ESC_SEQUENCE to carry either marker byte literally.

use crate::command::{Response, response};

/// Incremental decoder fed one byte at a time from the serial stream.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    output: Option<Vec<u8>>,
    escaped: bool,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns a response once one is complete.
    pub fn push(&mut self, byte: u8) -> Option<Response> {
        let Some(buf) = self.output.as_mut() else {
            if byte == response::OUTPUT {
                self.output = Some(Vec::new());
                return None;
            }
            return Some(Response::from_status(byte));
        };

        if self.escaped {
            self.escaped = false;
            buf.push(byte);
            return None;
        }

        match byte {
            response::ESC_SEQUENCE => {
                self.escaped = true;
                None
            }
            response::OUTPUT_END => self.output.take().map(Response::Output),
            _ => {
                buf.push(byte);
                None
            }
        }
    }

    /// Drop any partially received output block.
    pub fn reset(&mut self) {
        self.output = None;
        self.escaped = false;
    }

    /// `true` while an output block is open.
    pub fn in_output(&self) -> bool {
        self.output.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(bytes: &[u8]) -> Vec<Response> {
        let mut decoder = ResponseDecoder::new();
        bytes.iter().filter_map(|&b| decoder.push(b)).collect()
    }

    #[test]
    fn status_byte_is_complete_response() {
        assert_eq!(decode_all(&[response::SEND_INPUT]), vec![Response::SendInput]);
    }

    #[test]
    fn output_block_collects_payload() {
        let mut bytes = vec![response::OUTPUT];
        bytes.extend_from_slice(b"SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7");
        bytes.push(response::OUTPUT_END);

        let decoded = decode_all(&bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(
            decoded[0].output_text().as_deref(),
            Some("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7")
        );
    }

    #[test]
    fn escaped_markers_are_literal() {
        let bytes = [
            response::OUTPUT,
            b'a',
            response::ESC_SEQUENCE,
            response::OUTPUT_END,
            response::ESC_SEQUENCE,
            response::ESC_SEQUENCE,
            b'b',
            response::OUTPUT_END,
        ];
        assert_eq!(
            decode_all(&bytes),
            vec![Response::Output(vec![
                b'a',
                response::OUTPUT_END,
                response::ESC_SEQUENCE,
                b'b'
            ])]
        );
    }

    #[test]
    fn reset_discards_partial_output() {
        let mut decoder = ResponseDecoder::new();
        assert!(decoder.push(response::OUTPUT).is_none());
        assert!(decoder.push(b'x').is_none());
        assert!(decoder.in_output());

        decoder.reset();
        assert!(!decoder.in_output());
        assert_eq!(decoder.push(response::OK), Some(Response::Ok));
    }
}
