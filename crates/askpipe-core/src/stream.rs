use futures_util::StreamExt;

use crate::{ByteStream, Result};

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across chunk boundaries is held back until the
/// rest of it arrives. Invalid bytes decode to U+FFFD, as does a sequence still
/// incomplete when the stream ends.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Drain a response body, calling `on_text` with the accumulated text after every
/// chunk that decoded to something. Returns the full text.
///
/// The stream is owned here and dropped on every exit path, including errors.
pub async fn consume<F>(mut stream: ByteStream, mut on_text: F) -> Result<String>
where
    F: FnMut(&str),
{
    let mut decoder = Utf8StreamDecoder::new();
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let delta = decoder.decode(&chunk);
        if delta.is_empty() {
            continue;
        }
        content.push_str(&delta);
        on_text(&content);
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        content.push_str(&tail);
        on_text(&content);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn chunks(parts: Vec<Result<Vec<u8>>>) -> ByteStream {
        Box::pin(futures_util::stream::iter(parts))
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let bytes = "h\u{e9}llo \u{1F980}".as_bytes().to_vec();
        // Split inside the two-byte é and inside the four-byte crab.
        let (a, rest) = bytes.split_at(2);
        let (b, rest) = rest.split_at(6);
        let (c, d) = rest.split_at(2);

        let mut dec = Utf8StreamDecoder::new();
        let mut out = String::new();
        for part in [a, b, c, d] {
            out.push_str(&dec.decode(part));
        }
        out.push_str(&dec.finish());
        assert_eq!(out, "h\u{e9}llo \u{1F980}");
    }

    #[test]
    fn held_back_bytes_are_not_emitted_early() {
        let mut dec = Utf8StreamDecoder::new();
        assert_eq!(dec.decode(&[b'a', 0xC3]), "a");
        assert_eq!(dec.decode(&[0xA9, b'b']), "\u{e9}b");
    }

    #[test]
    fn invalid_and_dangling_bytes_become_replacement_chars() {
        let mut dec = Utf8StreamDecoder::new();
        assert_eq!(dec.decode(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
        assert_eq!(dec.decode(&[0xE2, 0x82]), "");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert_eq!(dec.finish(), "");
    }

    #[tokio::test]
    async fn consume_reports_prefix_extensions_in_order() {
        let s = chunks(vec![
            Ok(b"Hel".to_vec()),
            Ok(b"lo wor".to_vec()),
            Ok(b"ld".to_vec()),
        ]);
        let mut seen = Vec::new();
        let full = consume(s, |t| seen.push(t.to_string())).await.unwrap();
        assert_eq!(full, "Hello world");
        assert_eq!(seen, vec!["Hel", "Hello wor", "Hello world"]);
        for w in seen.windows(2) {
            assert!(w[1].starts_with(&w[0]));
        }
    }

    #[tokio::test]
    async fn consume_propagates_stream_errors() {
        let s = chunks(vec![
            Ok(b"partial".to_vec()),
            Err(Error::Stream("connection reset".to_string())),
            Ok(b"never".to_vec()),
        ]);
        let mut seen = Vec::new();
        let err = consume(s, |t| seen.push(t.to_string())).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(seen, vec!["partial"]);
    }
}
