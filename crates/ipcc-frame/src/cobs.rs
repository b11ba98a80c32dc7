//! Consistent-overhead byte stuffing.
//!
//! Encoded data is a sequence of runs, each a length byte `code` followed by
//! `code - 1` non-zero literal bytes. Every run except a full one (`0xFF`)
//! and the last stands for its literals followed by a zero. The encoder never
//! emits [`TERMINATOR`]; callers append it after the encoded bytes.

use crate::error::{FrameError, Result};

/// Frame delimiter. Never appears inside encoded data.
pub const TERMINATOR: u8 = 0x00;

/// Run code for 254 literal bytes with no implied zero.
const FULL_RUN: u8 = 0xFF;

/// Worst-case encoded size of `len` input bytes, excluding the terminator.
pub const fn max_encoded_len(len: usize) -> usize {
    len + len / 254 + 1
}

/// Encode `input` into `output`, returning the number of bytes written.
///
/// On [`FrameError::BufferExhausted`] the contents of `output` are
/// unspecified and must not be sent.
pub fn encode(input: &[u8], output: &mut [u8]) -> Result<usize> {
    let capacity = output.len();
    let exhausted = FrameError::BufferExhausted { capacity };
    if capacity == 0 {
        return Err(exhausted);
    }

    let mut code_idx = 0;
    let mut out = 1;
    let mut code: u8 = 1;

    for &byte in input {
        if out >= capacity {
            return Err(exhausted);
        }

        if byte == TERMINATOR {
            output[code_idx] = code;
            code = 1;
            code_idx = out;
            out += 1;
            continue;
        }

        output[out] = byte;
        out += 1;
        code += 1;

        if code == FULL_RUN {
            if out >= capacity {
                return Err(exhausted);
            }
            output[code_idx] = code;
            code = 1;
            code_idx = out;
            out += 1;
        }
    }

    output[code_idx] = code;
    Ok(out)
}

/// Decode `input` (without its terminator) into `output`, returning the
/// number of bytes written.
///
/// Empty input decodes to nothing; that is what a keep-alive frame carries.
pub fn decode(input: &[u8], output: &mut [u8]) -> Result<usize> {
    let capacity = output.len();
    let mut pos = 0;
    let mut out = 0;

    while pos < input.len() {
        let code = input[pos];
        if code == TERMINATOR {
            return Err(FrameError::UnexpectedTerminator { offset: pos });
        }
        pos += 1;

        let run = usize::from(code) - 1;
        let remaining = input.len() - pos;
        if run > remaining {
            return Err(FrameError::Truncated {
                declared: run,
                remaining,
            });
        }

        let literal = &input[pos..pos + run];
        if let Some(offset) = literal.iter().position(|&b| b == TERMINATOR) {
            return Err(FrameError::UnexpectedTerminator {
                offset: pos + offset,
            });
        }
        if out + run > capacity {
            return Err(FrameError::BufferExhausted { capacity });
        }
        output[out..out + run].copy_from_slice(literal);
        out += run;
        pos += run;

        if code != FULL_RUN && pos < input.len() {
            if out >= capacity {
                return Err(FrameError::BufferExhausted { capacity });
            }
            output[out] = 0;
            out += 1;
        }
    }

    Ok(out)
}
