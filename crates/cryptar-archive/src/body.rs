//! Chunked encrypted item bodies
//!
//! A body is a run of frames, one per plaintext chunk:
//! ```text
//! [seq: 4 LE][size: 4 LE][sealed chunk: `size` bytes]
//! ```
//! `size` is the sealed length (compressed-or-raw plaintext plus the 40-byte
//! seal overhead) and the whole 8-byte frame header is the chunk's AAD, so a
//! frame cannot be re-ordered or re-sized without failing authentication.
//! Frames carry their own nonces; bodies can therefore be relocated wholesale
//! (move, compact) without re-encryption.

use std::io::{self, Read, Seek, SeekFrom, Write};

use cryptar_core::{CryptarError, CryptarResult};
use cryptar_crypto::{CipherBox, OVERHEAD};

use crate::compress;

const FRAME_HEADER_LEN: usize = 8;

/// Consume `src` in chunks of `chunk_size` plaintext bytes, sealing each into
/// one frame. Returns the number of frames emitted.
///
/// The final chunk is the first fill that comes up short (a zero-byte fill
/// emits nothing), so `src` is never read past its end.
pub fn write(
    dest: &mut impl Write,
    src: &mut impl Read,
    cipher: &CipherBox,
    compression: bool,
    chunk_size: u64,
) -> CryptarResult<i64> {
    let chunk_size = chunk_size as usize;
    let mut buf = vec![0u8; chunk_size];
    let mut seq: u32 = 0;

    loop {
        let n = fill_chunk(src, &mut buf)?;
        if n == 0 {
            break;
        }

        let compressed;
        let payload: &[u8] = if compression {
            compressed = compress::compress(&buf[..n])?;
            &compressed
        } else {
            &buf[..n]
        };

        let mut frame = [0u8; FRAME_HEADER_LEN];
        frame[..4].copy_from_slice(&seq.to_le_bytes());
        frame[4..].copy_from_slice(&((payload.len() + OVERHEAD) as u32).to_le_bytes());

        let sealed = cipher.seal(payload, &frame)?;
        dest.write_all(&frame)?;
        dest.write_all(&sealed)?;

        seq += 1;
        if n < chunk_size {
            break;
        }
    }

    Ok(i64::from(seq))
}

/// Open `chunks` frames in order and write the plaintext to `dest`.
pub fn extract(
    src: &mut impl Read,
    dest: &mut impl Write,
    chunks: i64,
    cipher: &CipherBox,
    compression: bool,
) -> CryptarResult<()> {
    for i in 0..chunks {
        let (frame, seq, size) = read_frame_header(src)?;
        check_order(i, seq)?;

        let mut sealed = vec![0u8; size as usize];
        src.read_exact(&mut sealed)?;

        let plain = cipher.open(&sealed, &frame)?;
        if compression {
            dest.write_all(&compress::decompress(&plain)?)?;
        } else {
            dest.write_all(&plain)?;
        }
    }

    Ok(())
}

/// Extract the plaintext byte range `[start, end)` from a body of `chunks`
/// frames, seeking over frames that do not intersect the range.
pub fn extract_range(
    src: &mut (impl Read + Seek),
    dest: &mut impl Write,
    start: u64,
    end: u64,
    chunks: i64,
    cipher: &CipherBox,
    compression: bool,
    chunk_size: u64,
) -> CryptarResult<()> {
    // Plaintext offset of the current frame's first byte.
    let mut counter: u64 = 0;

    for i in 0..chunks {
        let (frame, seq, size) = read_frame_header(src)?;
        check_order(i, seq)?;

        if counter + chunk_size > start && counter < end {
            let mut sealed = vec![0u8; size as usize];
            src.read_exact(&mut sealed)?;

            let plain = cipher.open(&sealed, &frame)?;
            let data = if compression {
                compress::decompress(&plain)?
            } else {
                plain
            };

            let lo = (start.saturating_sub(counter) as usize).min(data.len());
            let hi = (end - counter).min(data.len() as u64) as usize;
            if lo < hi {
                dest.write_all(&data[lo..hi])?;
            }
        } else {
            src.seek(SeekFrom::Current(i64::from(size)))?;
        }

        counter += chunk_size;
        if counter >= end {
            break;
        }
    }

    Ok(())
}

fn read_frame_header(src: &mut impl Read) -> CryptarResult<([u8; FRAME_HEADER_LEN], u32, u32)> {
    let mut frame = [0u8; FRAME_HEADER_LEN];
    src.read_exact(&mut frame)?;

    let seq = u32::from_le_bytes(frame[..4].try_into().expect("fixed slice"));
    let size = u32::from_le_bytes(frame[4..].try_into().expect("fixed slice"));
    Ok((frame, seq, size))
}

fn check_order(expected: i64, got: u32) -> CryptarResult<()> {
    if i64::from(got) != expected {
        return Err(CryptarError::FrameOrder {
            expected: expected as u64,
            got: u64::from(got),
        });
    }
    Ok(())
}

/// Read until `buf` is full or the source is exhausted, looping over short
/// reads so a slow pipe cannot masquerade as a final chunk.
fn fill_chunk(src: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptar_crypto::{CipherBox, DataKey};
    use proptest::prelude::*;
    use std::io::Cursor;

    const CHUNK: u64 = 16;

    fn test_cipher() -> CipherBox {
        CipherBox::new(&DataKey::from_bytes([11u8; 32]))
    }

    fn write_body(data: &[u8], compression: bool) -> (Vec<u8>, i64) {
        let cipher = test_cipher();
        let mut out = Vec::new();
        let chunks = write(&mut out, &mut Cursor::new(data), &cipher, compression, CHUNK).unwrap();
        (out, chunks)
    }

    fn roundtrip(data: &[u8], compression: bool) {
        let cipher = test_cipher();
        let (body, chunks) = write_body(data, compression);

        let expected_chunks = (data.len() as u64).div_ceil(CHUNK) as i64;
        assert_eq!(chunks, expected_chunks);

        let mut out = Vec::new();
        extract(&mut Cursor::new(body), &mut out, chunks, &cipher, compression).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn roundtrip_sizes() {
        let data: Vec<u8> = (0u8..=255).cycle().take(100).collect();
        for compression in [false, true] {
            roundtrip(b"", compression);
            roundtrip(b"x", compression);
            roundtrip(&data[..CHUNK as usize], compression);
            roundtrip(&data[..CHUNK as usize + 1], compression);
            roundtrip(&data, compression);
        }
    }

    #[test]
    fn empty_source_emits_no_frames() {
        let (body, chunks) = write_body(b"", false);
        assert_eq!(chunks, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn exact_multiple_has_no_empty_tail_frame() {
        let data = vec![7u8; 2 * CHUNK as usize];
        let (_, chunks) = write_body(&data, false);
        assert_eq!(chunks, 2);
    }

    #[test]
    fn frame_size_field_matches_layout() {
        let (body, _) = write_body(b"abc", false);
        // One frame: 8-byte header + sealed 3 bytes.
        assert_eq!(body.len(), FRAME_HEADER_LEN + 3 + OVERHEAD);
        let size = u32::from_le_bytes(body[4..8].try_into().unwrap());
        assert_eq!(size as usize, 3 + OVERHEAD);
    }

    #[test]
    fn missing_first_frame_is_order_error() {
        let cipher = test_cipher();
        let data = vec![3u8; 2 * CHUNK as usize];
        let (body, chunks) = write_body(&data, false);
        assert_eq!(chunks, 2);

        // Splice out frame 0 entirely; frame 1 now sits first and its seq
        // field no longer matches its position.
        let frame0_size = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
        let spliced = body[FRAME_HEADER_LEN + frame0_size..].to_vec();

        let mut out = Vec::new();
        let err = extract(&mut Cursor::new(spliced), &mut out, chunks, &cipher, false);
        assert!(matches!(
            err,
            Err(CryptarError::FrameOrder { expected: 0, got: 1 })
        ));
    }

    #[test]
    fn tampered_chunk_fails_auth() {
        let cipher = test_cipher();
        let (mut body, chunks) = write_body(b"sensitive bytes", false);
        body[FRAME_HEADER_LEN + 1] ^= 0x80;

        let mut out = Vec::new();
        assert!(matches!(
            extract(&mut Cursor::new(body), &mut out, chunks, &cipher, false),
            Err(CryptarError::Auth)
        ));
    }

    #[test]
    fn range_within_single_chunk() {
        let cipher = test_cipher();
        let data = b"0123456789";
        let (body, chunks) = write_body(data, false);

        let mut out = Vec::new();
        extract_range(&mut Cursor::new(body), &mut out, 2, 7, chunks, &cipher, false, CHUNK)
            .unwrap();
        assert_eq!(out, b"23456");
    }

    #[test]
    fn range_across_chunk_boundary() {
        let data: Vec<u8> = (0u8..60).collect();
        for compression in [false, true] {
            let cipher = test_cipher();
            let (body, chunks) = write_body(&data, compression);

            let mut out = Vec::new();
            extract_range(
                &mut Cursor::new(body),
                &mut out,
                10,
                40,
                chunks,
                &cipher,
                compression,
                CHUNK,
            )
            .unwrap();
            assert_eq!(out, &data[10..40]);
        }
    }

    #[test]
    fn range_exact_frame_boundaries() {
        let data: Vec<u8> = (0u8..48).collect();
        let cipher = test_cipher();
        let (body, chunks) = write_body(&data, false);

        let mut out = Vec::new();
        extract_range(
            &mut Cursor::new(body),
            &mut out,
            CHUNK,
            2 * CHUNK,
            chunks,
            &cipher,
            false,
            CHUNK,
        )
        .unwrap();
        assert_eq!(out, &data[CHUNK as usize..2 * CHUNK as usize]);
    }

    #[test]
    fn range_to_end_of_short_tail() {
        let data: Vec<u8> = (0u8..40).collect();
        let cipher = test_cipher();
        let (body, chunks) = write_body(&data, false);

        let mut out = Vec::new();
        extract_range(
            &mut Cursor::new(body),
            &mut out,
            39,
            40,
            chunks,
            &cipher,
            false,
            CHUNK,
        )
        .unwrap();
        assert_eq!(out, &data[39..40]);
    }

    #[test]
    fn range_end_clamped_by_chunk_length() {
        // Requesting past the end of the plaintext yields what exists.
        let data: Vec<u8> = (0u8..20).collect();
        let cipher = test_cipher();
        let (body, chunks) = write_body(&data, false);

        let mut out = Vec::new();
        extract_range(
            &mut Cursor::new(body),
            &mut out,
            5,
            1000,
            chunks,
            &cipher,
            false,
            CHUNK,
        )
        .unwrap();
        assert_eq!(out, &data[5..]);
    }

    proptest! {
        #[test]
        fn range_matches_slice(
            data in proptest::collection::vec(any::<u8>(), 1..=512),
            compression in any::<bool>(),
            bounds in any::<(u16, u16)>(),
        ) {
            let cipher = test_cipher();
            let (body, chunks) = {
                let mut out = Vec::new();
                let chunks = write(
                    &mut out,
                    &mut Cursor::new(&data),
                    &cipher,
                    compression,
                    CHUNK,
                )
                .unwrap();
                (out, chunks)
            };

            let len = data.len() as u64;
            let (a, b) = (u64::from(bounds.0) % len, u64::from(bounds.1) % (len + 1));
            let (start, end) = if a <= b { (a, b) } else { (b, a) };

            let mut out = Vec::new();
            extract_range(
                &mut Cursor::new(body),
                &mut out,
                start,
                end,
                chunks,
                &cipher,
                compression,
                CHUNK,
            )
            .unwrap();
            prop_assert_eq!(&out, &data[start as usize..end as usize]);
        }
    }
}
