use crate::prelude::*;
use crate::raven::frame::Block;

use bytes::{Buf, BytesMut};
use std::time::{Duration, Instant};
use tokio_util::codec::Decoder;

// tag names on the RAVEn are short; anything longer is noise
const MAX_TAG_NAME: usize = 64;

enum Start {
    // no start token anywhere, nothing worth keeping
    None,
    // a candidate start token begins at `at` but isn't complete yet
    Incomplete { at: usize },
    Found { at: usize, name_len: usize, body: usize },
}

/// Reassembles RAVEn blocks out of the serial byte stream.
///
/// A block starts at an opening tag which is alone on its line and ends at
/// the matching closing tag. Bytes before a start token are line noise. A
/// block that grows past `max_frame_bytes`, or stays open longer than
/// `frame_timeout`, is abandoned and decoding resumes at the next start
/// token after it. So is a block with another start token ahead of its
/// closing tag.
pub struct FrameDecoder {
    max_frame_bytes: usize,
    frame_timeout: Duration,
    opened_at: Option<Instant>,
    discarded: u64,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize, frame_timeout: Duration) -> Self {
        Self {
            max_frame_bytes,
            frame_timeout,
            opened_at: None,
            discarded: 0,
        }
    }

    pub fn from_config(config: &config::Raven) -> Self {
        Self::new(config.max_frame_bytes(), config.frame_timeout())
    }

    /// Number of unterminated or malformed frames thrown away so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn decode_at(&mut self, buf: &mut BytesMut, now: Instant) -> Result<Option<Block>> {
        loop {
            let (name_len, body) = match Self::find_start(buf) {
                Start::None => {
                    if !buf.is_empty() {
                        trace!("dropping {} bytes of line noise", buf.len());
                        buf.clear();
                    }
                    self.opened_at = None;
                    return Ok(None);
                }
                Start::Incomplete { at } => {
                    if at > 0 {
                        trace!("dropping {} bytes of line noise", at);
                        buf.advance(at);
                    }

                    // padding after an opening tag counts against the frame budget
                    if buf.len() > self.max_frame_bytes {
                        warn!(
                            "discarding start token padded past {} bytes, resynchronising",
                            self.max_frame_bytes
                        );
                        self.discarded += 1;
                        self.opened_at = None;
                        buf.advance(1);
                        continue;
                    }
                    return Ok(None);
                }
                Start::Found { at, name_len, body } => {
                    if at > 0 {
                        trace!("dropping {} bytes of line noise", at);
                        buf.advance(at);
                    }
                    (name_len, body - at)
                }
            };

            let mut end_tag = Vec::with_capacity(name_len + 3);
            end_tag.extend_from_slice(b"</");
            end_tag.extend_from_slice(&buf[1..1 + name_len]);
            end_tag.push(b'>');

            let end = find(&buf[body..], &end_tag);

            // a device reset cuts a frame short and the next one starts
            // before our end tag ever arrives
            if let Start::Found { at: next, .. } = Self::find_start(&buf[body..]) {
                if end.map_or(true, |pos| next < pos) {
                    warn!(
                        "discarding truncated <{}> frame, next frame starts {} bytes in",
                        String::from_utf8_lossy(&buf[1..1 + name_len]),
                        body + next
                    );
                    self.discarded += 1;
                    self.opened_at = None;
                    buf.advance(body + next);
                    continue;
                }
            }

            match end {
                Some(pos) => {
                    let frame = buf.split_to(body + pos + end_tag.len());
                    self.opened_at = None;

                    match Block::parse(&frame) {
                        Ok(block) => return Ok(Some(block)),
                        Err(err) => {
                            warn!("discarding malformed frame: {}", err);
                            self.discarded += 1;
                            continue;
                        }
                    }
                }
                None => {
                    let opened_at = *self.opened_at.get_or_insert(now);

                    if buf.len() > self.max_frame_bytes
                        || now.saturating_duration_since(opened_at) > self.frame_timeout
                    {
                        warn!(
                            "discarding unterminated <{}> frame after {} bytes, resynchronising",
                            String::from_utf8_lossy(&buf[1..1 + name_len]),
                            buf.len()
                        );
                        self.discarded += 1;
                        self.opened_at = None;
                        // step past this start token so the scan picks up the next one
                        buf.advance(1);
                        continue;
                    }

                    return Ok(None);
                }
            }
        }
    }

    fn find_start(buf: &[u8]) -> Start {
        let mut from = 0;

        while let Some(offset) = buf[from..].iter().position(|&b| b == b'<') {
            let at = from + offset;
            from = at + 1;

            let name_len = buf[at + 1..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                .count();
            let after_name = at + 1 + name_len;

            if after_name == buf.len() {
                if name_len <= MAX_TAG_NAME {
                    return Start::Incomplete { at };
                }
                continue;
            }
            if name_len == 0 || name_len > MAX_TAG_NAME || buf[after_name] != b'>' {
                continue;
            }

            // a start token is the only thing on its line
            let body = after_name + 1;
            let padding = buf[body..]
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
            match buf.get(body + padding) {
                None => return Start::Incomplete { at },
                Some(b'\r') | Some(b'\n') => {
                    return Start::Found {
                        at,
                        name_len,
                        body,
                    }
                }
                Some(_) => continue,
            }
        }

        Start::None
    }
}

impl Decoder for FrameDecoder {
    type Item = Block;
    type Error = anyhow::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Block>> {
        self.decode_at(buf, Instant::now())
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Block>> {
        let r = self.decode(buf)?;
        if r.is_none() && !buf.is_empty() {
            debug!("dropping {} bytes of partial frame at end of stream", buf.len());
            buf.clear();
        }
        Ok(r)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
