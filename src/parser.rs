//! Incremental parser for feeds shaped as a single top-level JSON array.
//!
//! [`ArrayItems`] is fed the response body chunk by chunk and hands back the
//! raw bytes of each array element as soon as the element is complete, so the
//! first record is available long before the body has been fully received.
//! Elements are only delimited here; decoding is left to `serde_json`.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Ways in which a feed body can fail to be a JSON array.
#[derive(Debug, Error)]
pub enum FeedFormatError {
    #[error("expected a JSON array, found byte {found:?} at offset {offset}")]
    NotAnArray { found: char, offset: usize },

    #[error("unexpected byte {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("trailing comma before end of array at offset {offset}")]
    TrailingComma { offset: usize },

    #[error("unexpected data after end of array at offset {offset}")]
    TrailingData { offset: usize },

    #[error("feed ended before the array was closed")]
    Truncated,

    #[error("invalid array element: {0}")]
    InvalidElement(#[from] serde_json::Error),

    #[error("array element is not an object: {0}")]
    NotAnObject(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing but whitespace (or a BOM) seen so far.
    Start,
    /// Just after `[`: an element or `]` may follow.
    Open,
    /// Just after `,`: an element must follow.
    Separator,
    /// Inside an element.
    Element,
    /// After an object or array element: `,` or `]` must follow.
    AfterElement,
    /// After the closing `]`.
    Closed,
}

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Splits a streamed JSON array into its top-level elements.
#[derive(Debug)]
pub struct ArrayItems {
    state: State,
    depth: usize,
    in_string: bool,
    escaped: bool,
    offset: usize,
    current: BytesMut,
    ready: VecDeque<Bytes>,
}

impl Default for ArrayItems {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayItems {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            depth: 0,
            in_string: false,
            escaped: false,
            offset: 0,
            current: BytesMut::new(),
            ready: VecDeque::new(),
        }
    }

    /// Consumes the next chunk of the body.
    ///
    /// Complete elements become available through [`ArrayItems::next_item`].
    ///
    /// # Errors
    ///
    /// Returns an error as soon as the bytes seen so far cannot be the
    /// beginning of a JSON array. The parser must not be used afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), FeedFormatError> {
        for &b in chunk {
            self.step(b)?;
            self.offset += 1;
        }
        Ok(())
    }

    /// Pops the oldest complete element, if any.
    pub fn next_item(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    /// Checks that the body ended right after a complete array.
    ///
    /// # Errors
    ///
    /// Returns [`FeedFormatError::Truncated`] if the closing `]` never arrived.
    pub fn finish(&self) -> Result<(), FeedFormatError> {
        match self.state {
            State::Closed => Ok(()),
            _ => Err(FeedFormatError::Truncated),
        }
    }

    fn step(&mut self, b: u8) -> Result<(), FeedFormatError> {
        match self.state {
            State::Start => {
                if self.offset < BOM.len() && b == BOM[self.offset] {
                    return Ok(());
                }
                match b {
                    b'[' => self.state = State::Open,
                    b if is_whitespace(b) => {}
                    _ => {
                        return Err(FeedFormatError::NotAnArray {
                            found: b as char,
                            offset: self.offset,
                        });
                    }
                }
            }
            State::Open | State::Separator => match b {
                b if is_whitespace(b) => {}
                b']' if self.state == State::Open => self.state = State::Closed,
                b']' => return Err(FeedFormatError::TrailingComma { offset: self.offset }),
                b',' => {
                    return Err(FeedFormatError::Unexpected {
                        found: ',',
                        offset: self.offset,
                    });
                }
                _ => {
                    self.state = State::Element;
                    self.element_byte(b)?;
                }
            },
            State::Element => self.element_byte(b)?,
            State::AfterElement => match b {
                b if is_whitespace(b) => {}
                b',' => self.state = State::Separator,
                b']' => self.state = State::Closed,
                _ => {
                    return Err(FeedFormatError::Unexpected {
                        found: b as char,
                        offset: self.offset,
                    });
                }
            },
            State::Closed => {
                if !is_whitespace(b) {
                    return Err(FeedFormatError::TrailingData { offset: self.offset });
                }
            }
        }
        Ok(())
    }

    fn element_byte(&mut self, b: u8) -> Result<(), FeedFormatError> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            self.current.extend_from_slice(&[b]);
            return Ok(());
        }

        match b {
            b',' | b']' if self.depth == 0 => {
                self.complete_element();
                self.state = if b == b',' {
                    State::Separator
                } else {
                    State::Closed
                };
                return Ok(());
            }
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth = self.depth.checked_sub(1).ok_or(FeedFormatError::Unexpected {
                    found: b as char,
                    offset: self.offset,
                })?;
                if self.depth == 0 {
                    // containers are complete without waiting for the delimiter
                    self.current.extend_from_slice(&[b]);
                    self.complete_element();
                    self.state = State::AfterElement;
                    return Ok(());
                }
            }
            _ => {}
        }
        self.current.extend_from_slice(&[b]);
        Ok(())
    }

    fn complete_element(&mut self) {
        let trimmed = self
            .current
            .iter()
            .rposition(|&b| !is_whitespace(b))
            .map_or(0, |last| last + 1);
        self.current.truncate(trimmed);
        self.ready.push_back(self.current.split().freeze());
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(parser: &mut ArrayItems) -> Vec<String> {
        std::iter::from_fn(|| parser.next_item())
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_splits_whole_array() {
        let mut parser = ArrayItems::new();
        parser
            .feed(br#" [ {"a": 1}, {"b": [1, 2]} ,null ] "#)
            .unwrap();
        parser.finish().unwrap();

        assert_eq!(collect(&mut parser), vec![r#"{"a": 1}"#, r#"{"b": [1, 2]}"#, "null"]);
    }

    #[test]
    fn test_byte_at_a_time_matches_single_chunk() {
        let body = br#"[{"ordem":"A1","obs":"x, ] } \" ["},{"ordem":"A2"}]"#;
        let mut parser = ArrayItems::new();
        let mut items = Vec::new();
        for b in body.iter() {
            parser.feed(std::slice::from_ref(b)).unwrap();
            items.extend(collect(&mut parser));
        }
        parser.finish().unwrap();

        assert_eq!(
            items,
            vec![r#"{"ordem":"A1","obs":"x, ] } \" ["}"#, r#"{"ordem":"A2"}"#]
        );
    }

    #[test]
    fn test_element_available_before_array_closes() {
        let mut parser = ArrayItems::new();
        parser.feed(br#"[{"ordem":"A1"},{"ord"#).unwrap();

        assert_eq!(collect(&mut parser), vec![r#"{"ordem":"A1"}"#]);
        assert!(matches!(parser.finish(), Err(FeedFormatError::Truncated)));
    }

    #[test]
    fn test_object_emitted_at_closing_brace() {
        let mut parser = ArrayItems::new();
        parser.feed(br#"[{"ordem":"A1"}"#).unwrap();
        assert_eq!(collect(&mut parser), vec![r#"{"ordem":"A1"}"#]);
    }

    #[test]
    fn test_rejects_missing_separator() {
        let mut parser = ArrayItems::new();
        let err = parser.feed(br#"[{"a":1} {"b":2}]"#).unwrap_err();
        assert!(matches!(err, FeedFormatError::Unexpected { found: '{', offset: 9 }));
    }

    #[test]
    fn test_empty_array() {
        let mut parser = ArrayItems::new();
        parser.feed(b"[]").unwrap();
        parser.finish().unwrap();
        assert!(parser.next_item().is_none());
    }

    #[test]
    fn test_accepts_bom() {
        let mut parser = ArrayItems::new();
        parser.feed(&[0xEF, 0xBB, 0xBF]).unwrap();
        parser.feed(b"[{}]").unwrap();
        parser.finish().unwrap();
        assert_eq!(collect(&mut parser), vec!["{}"]);
    }

    #[test]
    fn test_rejects_object_body() {
        let mut parser = ArrayItems::new();
        let err = parser.feed(br#"{"erro": "x"}"#).unwrap_err();
        assert!(matches!(err, FeedFormatError::NotAnArray { found: '{', offset: 0 }));
    }

    #[test]
    fn test_rejects_trailing_comma() {
        let mut parser = ArrayItems::new();
        let err = parser.feed(br#"[{"a":1},]"#).unwrap_err();
        assert!(matches!(err, FeedFormatError::TrailingComma { offset: 9 }));
    }

    #[test]
    fn test_rejects_data_after_array() {
        let mut parser = ArrayItems::new();
        let err = parser.feed(b"[1] [2]").unwrap_err();
        assert!(matches!(err, FeedFormatError::TrailingData { offset: 4 }));
    }

    #[test]
    fn test_rejects_unbalanced_close() {
        let mut parser = ArrayItems::new();
        let err = parser.feed(br#"[{"a":1}}]"#).unwrap_err();
        assert!(matches!(err, FeedFormatError::Unexpected { found: '}', .. }));
    }

    #[test]
    fn test_empty_body_is_truncated() {
        let parser = ArrayItems::new();
        assert!(matches!(parser.finish(), Err(FeedFormatError::Truncated)));
    }
}
