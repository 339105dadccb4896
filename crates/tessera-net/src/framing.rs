//! Checksummed, length-prefixed framing for TCP streams.
//!
//! Every packet on the wire travels in one frame:
//!
//! ```text
//! +-------------------+---------------------+--------------------+
//! | length (4 bytes)  | adler32 (4 bytes)   |   payload          |
//! | u32 little-endian | u32 little-endian   |   (length bytes)   |
//! +-------------------+---------------------+--------------------+
//! ```
//!
//! The length covers the payload only. The checksum is Adler-32 over the
//! payload. A length above the configured maximum or a checksum mismatch is
//! fatal for the connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 65 535.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 65_535,
        }
    }
}

/// Errors that can occur during framing operations. All of them end the
/// connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The checksum in the header does not match the payload.
    #[error("checksum mismatch: header {expected:#010x}, payload {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const ADLER_MOD: u32 = 65_521;

/// Largest block that can be summed before the accumulators must be reduced.
const ADLER_BLOCK: usize = 5552;

/// Adler-32 checksum of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    for block in data.chunks(ADLER_BLOCK) {
        for &byte in block {
            a += u32::from(byte);
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}

fn map_eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read a single frame from the stream and verify its checksum.
///
/// Returns [`FrameError::ConnectionClosed`] if the peer closes the connection
/// before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let payload_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(map_eof)?;
    }

    let actual = adler32(&payload);
    if actual != expected {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    Ok(payload)
}

/// Write a single frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&len.to_le_bytes());
    header[4..].copy_from_slice(&adler32(payload).to_le_bytes());

    writer.write_all(&header).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn default_config() -> FrameConfig {
        FrameConfig::default()
    }

    #[test]
    fn test_adler32_known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"a"), 0x0062_0062);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_adler32_long_input_reduces() {
        let data = vec![0xFFu8; 100_000];
        let (mut a, mut b) = (1u64, 0u64);
        for &byte in &data {
            a = (a + u64::from(byte)) % 65_521;
            b = (b + a) % 65_521;
        }
        assert_eq!(adler32(&data), ((b << 16) | a) as u32);
    }

    #[tokio::test]
    async fn test_single_message_roundtrip() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();
        let payload = b"\x64\x01\x02";

        write_frame(&mut client, payload, &config).await.unwrap();
        let received = read_frame(&mut server, &config).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_dont_merge() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();

        write_frame(&mut client, b"aaa", &config).await.unwrap();
        write_frame(&mut client, b"bbb", &config).await.unwrap();

        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"aaa");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        let (mut client, mut server) = duplex(8);
        let config = default_config();
        let payload = b"this frame is larger than the pipe";

        let write_config = config.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, payload, &write_config)
                .await
                .unwrap();
        });

        let received = read_frame(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.write_all(&0u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };

        let result = write_frame(&mut client, &[0u8; 1024], &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_rejected() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();

        client.write_all(&3u32.to_le_bytes()).await.unwrap();
        client.write_all(&adler32(b"abc").to_le_bytes()).await.unwrap();
        client.write_all(b"abd").await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn test_zero_length_frame_handled() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();

        write_frame(&mut client, &[], &config).await.unwrap();
        let received = read_frame(&mut server, &config).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_during_header_read() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame(&mut server, &default_config()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_header_layout() {
        let (mut client, mut server) = duplex(8192);
        write_frame(&mut client, b"hello", &default_config())
            .await
            .unwrap();

        let mut raw = [0u8; 13];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..4], &5u32.to_le_bytes());
        assert_eq!(&raw[4..8], &adler32(b"hello").to_le_bytes());
        assert_eq!(&raw[8..], b"hello");
    }
}
