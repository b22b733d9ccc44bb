/*!
 * Length-prefixed binary framing over raw byte channels
 *
 * The wire unit is a frame: a 4-byte big-endian length prefix followed by
 * that many payload bytes. Remote-to-local traffic carries an additional
 * 4-byte flag word ahead of the length so the local side can tell a normal
 * reply from a propagated error. Both prefix fields are read in full before
 * any payload byte is interpreted; a channel that closes mid-frame is a
 * protocol error with no partial-frame recovery.
 */

use std::io::{self, Read, Write};

use crate::error::{Result, TetherError};

/// Upper bound on a single read syscall while accumulating a payload.
pub(crate) const READ_UNIT: usize = 8 * 1024;

/// Sanity cap on a single frame; anything larger is a corrupt prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Flag word on remote-to-local frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFlag {
    /// Normal reply carrying a serialized value
    Value,
    /// Propagated error carrying a serialized description
    Error,
}

impl FrameFlag {
    fn as_word(self) -> u32 {
        match self {
            FrameFlag::Value => 0,
            FrameFlag::Error => 1,
        }
    }

    fn from_word(word: u32) -> Result<Self> {
        match word {
            0 => Ok(FrameFlag::Value),
            1 => Ok(FrameFlag::Error),
            other => Err(TetherError::Protocol(format!(
                "unknown frame flag word {}",
                other
            ))),
        }
    }
}

/// Write one frame: length prefix, then payload, nothing interleaved.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TetherError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    write_word(writer, payload.len() as u32)?;
    writer
        .write_all(payload)
        .map_err(|e| TetherError::Protocol(format!("frame write failed: {}", e)))?;
    writer
        .flush()
        .map_err(|e| TetherError::Protocol(format!("frame flush failed: {}", e)))?;
    Ok(())
}

/// Read one frame, blocking until the full payload has accumulated.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_word(reader)? as usize;
    if len > MAX_FRAME_LEN {
        return Err(TetherError::Protocol(format!(
            "frame length prefix {} exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    read_payload(reader, len)
}

/// Write one flagged frame (remote-to-local direction only).
pub fn write_tagged_frame<W: Write + ?Sized>(
    writer: &mut W,
    flag: FrameFlag,
    payload: &[u8],
) -> Result<()> {
    write_word(writer, flag.as_word())?;
    write_frame(writer, payload)
}

/// Read one flagged frame; the flag word comes before the length prefix.
pub fn read_tagged_frame<R: Read + ?Sized>(reader: &mut R) -> Result<(FrameFlag, Vec<u8>)> {
    let flag = FrameFlag::from_word(read_word(reader)?)?;
    let payload = read_frame(reader)?;
    Ok((flag, payload))
}

fn write_word<W: Write + ?Sized>(writer: &mut W, word: u32) -> Result<()> {
    writer
        .write_all(&word.to_be_bytes())
        .map_err(|e| TetherError::Protocol(format!("frame write failed: {}", e)))
}

fn read_word<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            TetherError::Protocol("channel closed mid-frame".to_string())
        }
        _ => TetherError::Protocol(format!("frame read failed: {}", e)),
    })?;
    Ok(u32::from_be_bytes(word))
}

/// Accumulate exactly `len` payload bytes in bounded chunks. A short read is
/// fatal to the frame; there is no recovery.
fn read_payload<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(len.min(READ_UNIT));
    let mut chunk = [0u8; READ_UNIT];

    while payload.len() < len {
        let want = (len - payload.len()).min(READ_UNIT);
        let got = reader
            .read(&mut chunk[..want])
            .map_err(|e| TetherError::Protocol(format!("frame read failed: {}", e)))?;
        if got == 0 {
            return Err(TetherError::Protocol(format!(
                "channel closed mid-frame ({} of {} payload bytes)",
                payload.len(),
                len
            )));
        }
        payload.extend_from_slice(&chunk[..got]);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most one byte per call, to exercise the
    /// accumulation loop across chunk boundaries.
    struct TrickleReader {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = buf.len().min(1);
            self.inner.read(&mut buf[..end])
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"hello worker".to_vec();
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(read_frame(&mut reader).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        assert_eq!(buf.len(), 4);

        let mut reader = Cursor::new(buf);
        assert_eq!(read_frame(&mut reader).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_payload_crossing_read_unit() {
        // Larger than one read unit, not a multiple of it.
        let payload: Vec<u8> = (0..READ_UNIT * 2 + 17).map(|i| (i % 251) as u8).collect();
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(read_frame(&mut reader).unwrap(), payload);
    }

    #[test]
    fn test_short_reads_accumulate() {
        let payload: Vec<u8> = (0..300).map(|i| (i % 7) as u8).collect();
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();

        let mut reader = TrickleReader {
            inner: Cursor::new(buf),
        };
        assert_eq!(read_frame(&mut reader).unwrap(), payload);
    }

    #[test]
    fn test_multiple_frames_sequential() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second").unwrap();
        write_frame(&mut buf, b"").unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(read_frame(&mut reader).unwrap(), b"first");
        assert_eq!(read_frame(&mut reader).unwrap(), b"second");
        assert_eq!(read_frame(&mut reader).unwrap(), b"");
    }

    #[test]
    fn test_truncated_length_prefix() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").unwrap();
        buf.truncate(2);

        let mut reader = Cursor::new(buf);
        let err = read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, TetherError::Protocol(_)));
        assert!(err.to_string().contains("closed mid-frame"));
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").unwrap();
        buf.truncate(4 + 3);

        let mut reader = Cursor::new(buf);
        let err = read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, TetherError::Protocol(_)));
        assert!(err.to_string().contains("3 of 7"));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut reader = Cursor::new(buf);
        let err = read_frame(&mut reader).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_tagged_value_roundtrip() {
        let mut buf = Vec::new();
        write_tagged_frame(&mut buf, FrameFlag::Value, b"result").unwrap();

        let mut reader = Cursor::new(buf);
        let (flag, payload) = read_tagged_frame(&mut reader).unwrap();
        assert_eq!(flag, FrameFlag::Value);
        assert_eq!(payload, b"result");
    }

    #[test]
    fn test_tagged_error_roundtrip() {
        let mut buf = Vec::new();
        write_tagged_frame(&mut buf, FrameFlag::Error, b"task failed upstream").unwrap();

        let mut reader = Cursor::new(buf);
        let (flag, payload) = read_tagged_frame(&mut reader).unwrap();
        assert_eq!(flag, FrameFlag::Error);
        assert_eq!(payload, b"task failed upstream");
    }

    #[test]
    fn test_unknown_flag_word() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());

        let mut reader = Cursor::new(buf);
        let err = read_tagged_frame(&mut reader).unwrap_err();
        assert!(err.to_string().contains("unknown frame flag word 7"));
    }

    #[test]
    fn test_tagged_frame_truncated_after_flag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        // Length prefix missing entirely.

        let mut reader = Cursor::new(buf);
        let err = read_tagged_frame(&mut reader).unwrap_err();
        assert!(err.to_string().contains("closed mid-frame"));
    }

    #[test]
    fn test_mixed_tagged_stream() {
        let mut buf = Vec::new();
        write_tagged_frame(&mut buf, FrameFlag::Value, b"one").unwrap();
        write_tagged_frame(&mut buf, FrameFlag::Error, b"two").unwrap();
        write_tagged_frame(&mut buf, FrameFlag::Value, b"").unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(
            read_tagged_frame(&mut reader).unwrap(),
            (FrameFlag::Value, b"one".to_vec())
        );
        assert_eq!(
            read_tagged_frame(&mut reader).unwrap(),
            (FrameFlag::Error, b"two".to_vec())
        );
        assert_eq!(
            read_tagged_frame(&mut reader).unwrap(),
            (FrameFlag::Value, Vec::new())
        );
    }
}
