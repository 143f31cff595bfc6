use std::io::{self, Write};
use std::slice::Chunks;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

/// Size of the input slices fed to the encoder at once.
const CHUNK_SIZE: usize = 64 * 1024;

/// Lazily gzip-compresses a buffer, yielding the compressed stream in chunks.
///
/// Every item is a valid continuation of the previous ones, and all items concatenated form a
/// single gzip member. After an error the iterator is exhausted.
pub struct GzipChunks<'a> {
    input: Chunks<'a, u8>,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<'a> GzipChunks<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input: input.chunks(CHUNK_SIZE),
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }
}

impl Iterator for GzipChunks<'_> {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let encoder = self.encoder.as_mut()?;
            let Some(chunk) = self.input.next() else {
                let encoder = self.encoder.take()?;
                return Some(encoder.finish().map(Bytes::from));
            };

            if let Err(err) = encoder.write_all(chunk) {
                self.encoder = None;
                return Some(Err(err));
            }

            // the encoder buffers internally, so small inputs may not produce output yet
            let out = std::mem::take(encoder.get_mut());
            if !out.is_empty() {
                return Some(Ok(out.into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::MultiGzDecoder;

    use super::*;

    fn gunzip(chunks: &[Bytes]) -> Vec<u8> {
        let compressed = chunks.concat();
        let mut out = Vec::new();
        MultiGzDecoder::new(compressed.as_slice())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_small_input() {
        let chunks: Vec<_> = GzipChunks::new(b"hello world")
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(&chunks[0][..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&chunks), b"hello world");
    }

    #[test]
    fn test_empty_input() {
        let chunks: Vec<_> = GzipChunks::new(b"").collect::<io::Result<_>>().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(gunzip(&chunks).is_empty());
    }

    #[test]
    fn test_large_input_is_chunked() {
        // pseudo random so the output does not collapse into a few bytes
        let mut state = 0x2545_f491_u32;
        let input: Vec<u8> = (0..4 * CHUNK_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        let chunks: Vec<_> = GzipChunks::new(&input)
            .collect::<io::Result<_>>()
            .unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(gunzip(&chunks), input);
    }
}
