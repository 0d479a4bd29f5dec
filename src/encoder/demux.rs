//! Ogg/Opus → raw Opus packet demuxer.
//!
//! ffmpeg writes an Ogg Opus container; symphonia's Ogg reader splits it
//! into packets that go to the voice sink as they are.

use std::io::{self, Read};

use symphonia::core::{
    codecs::CODEC_TYPE_OPUS,
    errors::Error,
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, ReadOnlySource},
    meta::MetadataOptions,
    probe::Hint,
};

/// Leading packets of an Ogg Opus stream that carry no audio.
const HEADER_SIGNATURES: [&[u8]; 2] = [b"OpusHead", b"OpusTags"];

/// Symphonia's Ogg reader narrowed to the packets of one Opus track.
pub struct OggOpusDemuxer {
    format: Box<dyn FormatReader>,
    track_id: u32,
}

impl OggOpusDemuxer {
    /// Probes `source` as Ogg. Returns `None` if no Opus track is found.
    ///
    /// Reads block, so this belongs on a blocking thread.
    pub fn open<R>(source: R) -> Result<Option<Self>, Error>
    where
        R: Read + Send + Sync + 'static,
    {
        let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(source)), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let format = probed.format;
        let track_id = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec == CODEC_TYPE_OPUS)
            .map(|t| t.id);

        Ok(track_id.map(|track_id| Self { format, track_id }))
    }

    /// Next raw Opus packet, or `Ok(None)` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            if HEADER_SIGNATURES.iter().any(|sig| packet.data.starts_with(sig)) {
                continue;
            }
            return Ok(Some(packet.data.to_vec()));
        }
    }
}

/// Blocking reader over byte chunks handed over from async code. It hits
/// end of stream once every sender is gone.
pub struct ChunkReader {
    chunks: flume::Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    pub fn new(chunks: flume::Receiver<Vec<u8>>) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            match self.chunks.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    const PRE_SKIP: u64 = 312;
    /// Samples in a 20 ms fullband frame, the TOC used by every test packet.
    const FRAME_SAMPLES: u64 = 960;

    fn ogg_crc(data: &[u8]) -> u32 {
        let mut crc = 0u32;
        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04c1_1db7
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    fn page(header_type: u8, granule: u64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut remaining = packet.len();
            while remaining >= 255 {
                lacing.push(255u8);
                remaining -= 255;
            }
            lacing.push(remaining as u8);
            body.extend_from_slice(packet);
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"OggS");
        out.push(0);
        out.push(header_type);
        out.extend_from_slice(&granule.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(lacing.len() as u8);
        out.extend_from_slice(&lacing);
        out.extend_from_slice(&body);

        let crc = ogg_crc(&out);
        out[22..26].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// OpusHead and OpusTags pages followed by one page of audio packets.
    /// Every packet must start with a 20 ms single-frame TOC byte (0xfc).
    pub(crate) fn opus_stream(frames: &[&[u8]]) -> Vec<u8> {
        let head: &[u8] = b"OpusHead\x01\x02\x38\x01\x80\xbb\x00\x00\x00\x00\x00";
        let tags: &[u8] = b"OpusTags\x06\x00\x00\x00ffmpeg\x00\x00\x00\x00";
        let end = PRE_SKIP + FRAME_SAMPLES * frames.len() as u64;

        let mut data = page(0x02, 0, 0, &[head]);
        data.extend(page(0x00, 0, 1, &[tags]));
        data.extend(page(0x04, end, 2, frames));
        data
    }

    fn collect(data: Vec<u8>) -> Result<Vec<Vec<u8>>, Error> {
        let mut demuxer = OggOpusDemuxer::open(Cursor::new(data))?.expect("no opus track");
        let mut out = Vec::new();
        while let Some(packet) = demuxer.next_packet()? {
            out.push(packet);
        }
        Ok(out)
    }

    #[test]
    fn test_audio_packets_in_order_without_headers() {
        let packets = collect(opus_stream(&[b"\xfcone", b"\xfctwo", b"\xfcthree"])).unwrap();
        assert_eq!(
            packets,
            vec![b"\xfcone".to_vec(), b"\xfctwo".to_vec(), b"\xfcthree".to_vec()]
        );
    }

    #[test]
    fn test_packet_longer_than_one_lacing_segment() {
        let mut big = vec![0xfcu8];
        big.extend(std::iter::repeat_n(7u8, 299));
        let packets = collect(opus_stream(&[&big, b"\xfcx"])).unwrap();
        assert_eq!(packets, vec![big, b"\xfcx".to_vec()]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let garbage = b"RIFF\x00\x00\x00\x00WAVEfmt garbage garbage".to_vec();
        assert!(OggOpusDemuxer::open(Cursor::new(garbage)).is_err());
    }

    #[test]
    fn test_chunk_reader_spans_chunks_until_senders_drop() {
        let (tx, rx) = flume::unbounded();
        tx.send(b"ab".to_vec()).unwrap();
        tx.send(Vec::new()).unwrap();
        tx.send(b"cde".to_vec()).unwrap();
        drop(tx);

        let mut out = Vec::new();
        ChunkReader::new(rx).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }
}
