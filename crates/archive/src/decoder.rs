//! Stateful byte→UTF-16 decoding with byte-exact progress.
//!
//! Input is fed to `encoding_rs` one byte at a time so that each step reports
//! exactly how many bytes produced the returned character. That count is what
//! the stream persists, which keeps resumption byte-exact for any charset.

use encoding_rs::{Decoder, DecoderResult, Encoding};
use tracing::warn;
use zipspool_core::DecodeErrorPolicy;

const REPLACEMENT: u16 = 0xFFFD;

/// Output of one decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
  /// A single UTF-16 unit
  Unit(u16),
  /// Two units produced by the same input bytes, normally a surrogate pair
  Pair(u16, u16),
  /// Input exhausted and the decoder flushed
  End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStep {
  /// Bytes of the input consumed by this step
  pub consumed: usize,
  pub decoded: Decoded,
}

/// Malformed input under [`DecodeErrorPolicy::Fail`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
  /// Offset of the malformed sequence relative to the step's input
  pub offset: usize,
  pub len: usize,
}

pub struct CharDecoder {
  encoding: &'static Encoding,
  decoder: Decoder,
  policy: DecodeErrorPolicy,
  finished: bool,
}

impl CharDecoder {
  pub fn new(encoding: &'static Encoding, policy: DecodeErrorPolicy) -> Self {
    Self {
      encoding,
      decoder: encoding.new_decoder_without_bom_handling(),
      policy,
      finished: false,
    }
  }

  pub fn encoding(&self) -> &'static Encoding {
    self.encoding
  }

  pub fn policy(&self) -> DecodeErrorPolicy {
    self.policy
  }

  /// Drop any partially decoded sequence
  pub fn reset(&mut self) {
    self.decoder = self.encoding.new_decoder_without_bom_handling();
    self.finished = false;
  }

  /// Decode the next character from `input`, which must be everything that
  /// remains of the stream. An empty `input` flushes the decoder.
  pub fn decode_next(&mut self, input: &[u8]) -> Result<DecodeStep, DecodeError> {
    if self.finished {
      return Ok(DecodeStep {
        consumed: 0,
        decoded: Decoded::End,
      });
    }

    let mut consumed = 0;
    let mut out = [0u16; 4];

    loop {
      let last = consumed == input.len();
      let src = if last { &[][..] } else { &input[consumed..consumed + 1] };
      let (result, read, written) = self.decoder.decode_to_utf16_without_replacement(src, &mut out, last);
      consumed += read;

      if let DecoderResult::Malformed(bad, extra) = result {
        match self.policy {
          DecodeErrorPolicy::Fail => {
            return Err(DecodeError {
              offset: consumed.saturating_sub(bad as usize + extra as usize),
              len: bad as usize,
            });
          }
          DecodeErrorPolicy::Replace => {
            return Ok(DecodeStep {
              consumed,
              decoded: Decoded::Unit(REPLACEMENT),
            });
          }
          DecodeErrorPolicy::Ignore => continue,
        }
      }

      match written {
        0 => {}
        1 => {
          return Ok(DecodeStep {
            consumed,
            decoded: Decoded::Unit(out[0]),
          });
        }
        2 => {
          return Ok(DecodeStep {
            consumed,
            decoded: Decoded::Pair(out[0], out[1]),
          });
        }
        n => {
          warn!(units = n, "Decoder produced more than two units from one byte, keeping the first two");
          return Ok(DecodeStep {
            consumed,
            decoded: Decoded::Pair(out[0], out[1]),
          });
        }
      }

      if last {
        self.finished = true;
        return Ok(DecodeStep {
          consumed,
          decoded: Decoded::End,
        });
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn decode_all(decoder: &mut CharDecoder, input: &[u8]) -> Result<Vec<(Decoded, usize)>, DecodeError> {
    let mut pos = 0;
    let mut steps = Vec::new();
    loop {
      let step = decoder.decode_next(&input[pos..])?;
      pos += step.consumed;
      if step.decoded == Decoded::End {
        return Ok(steps);
      }
      steps.push((step.decoded, pos));
    }
  }

  #[test]
  fn test_ascii_advances_one_byte_per_char() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    let steps = decode_all(&mut decoder, b"ab").unwrap();
    assert_eq!(
      steps,
      vec![(Decoded::Unit(b'a' as u16), 1), (Decoded::Unit(b'b' as u16), 2)]
    );
  }

  #[test]
  fn test_multibyte_positions() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    // é is 2 bytes, € is 3 bytes
    let steps = decode_all(&mut decoder, "é€".as_bytes()).unwrap();
    assert_eq!(steps, vec![(Decoded::Unit(0xE9), 2), (Decoded::Unit(0x20AC), 5)]);
  }

  #[test]
  fn test_astral_char_is_one_pair() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    let steps = decode_all(&mut decoder, "😀".as_bytes()).unwrap();
    assert_eq!(steps, vec![(Decoded::Pair(0xD83D, 0xDE00), 4)]);
  }

  #[test]
  fn test_utf16le_input() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_16LE, DecodeErrorPolicy::Fail);
    let steps = decode_all(&mut decoder, &[0x41, 0x00, 0x3D, 0xD8, 0x00, 0xDE]).unwrap();
    assert_eq!(steps, vec![(Decoded::Unit(0x41), 2), (Decoded::Pair(0xD83D, 0xDE00), 6)]);
  }

  #[test]
  fn test_fail_policy_reports_offset() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    let input = b"a\xFFb";
    let first = decoder.decode_next(input).unwrap();
    assert_eq!(first.decoded, Decoded::Unit(b'a' as u16));
    let err = decoder.decode_next(&input[first.consumed..]).unwrap_err();
    assert_eq!(err.offset, 0);
    assert_eq!(err.len, 1);
  }

  #[test]
  fn test_replace_policy() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Replace);
    let steps = decode_all(&mut decoder, b"a\xFFb").unwrap();
    let units: Vec<_> = steps.iter().map(|(d, _)| *d).collect();
    assert_eq!(
      units,
      vec![Decoded::Unit(b'a' as u16), Decoded::Unit(REPLACEMENT), Decoded::Unit(b'b' as u16)]
    );
    assert_eq!(steps.last().unwrap().1, 3);
  }

  #[test]
  fn test_ignore_policy() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Ignore);
    let steps = decode_all(&mut decoder, b"a\xFFb").unwrap();
    assert_eq!(
      steps,
      vec![(Decoded::Unit(b'a' as u16), 1), (Decoded::Unit(b'b' as u16), 3)]
    );
  }

  #[test]
  fn test_truncated_sequence_at_end_fails() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    assert!(decode_all(&mut decoder, b"a\xE2\x82").is_err());
  }

  #[test]
  fn test_finished_decoder_keeps_returning_end() {
    let mut decoder = CharDecoder::new(encoding_rs::UTF_8, DecodeErrorPolicy::Fail);
    assert_eq!(decoder.decode_next(b"").unwrap().decoded, Decoded::End);
    assert_eq!(decoder.decode_next(b"").unwrap().decoded, Decoded::End);
    decoder.reset();
    assert_eq!(decoder.decode_next(b"x").unwrap().decoded, Decoded::Unit(b'x' as u16));
  }
}
