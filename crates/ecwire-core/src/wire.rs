//! Length-delimited records on a byte stream.
//!
//! Every record is `len: u32 big-endian || body`. Readers loop until
//! exactly `len` bytes have arrived, however the stream fragments them,
//! and refuse any declared length above the caller's limit before
//! allocating.

use ecwire_crypto::CryptoError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Write one record and flush.
pub async fn write_record<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| {
        CryptoError::MalformedFrame(format!("record of {} bytes exceeds u32", body.len()))
    })?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one record of at most `max_len` bytes.
///
/// Returns `Ok(None)` when the stream ends cleanly on a record boundary.
/// EOF anywhere inside a record is an `UnexpectedEof` I/O error.
pub async fn read_record<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a length prefix",
            )
            .into());
        }
        filled += n;
    }

    let len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
    if len > max_len {
        return Err(CryptoError::MalformedFrame(format!(
            "declared length {len} exceeds limit {max_len}"
        ))
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn record_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_record(&mut a, b"hello").await.unwrap();
        assert_eq!(read_record(&mut b, 64).await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn prefix_is_big_endian_length() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_record(&mut a, &[9u8; 258]).await.unwrap();
        let mut prefix = [0u8; 4];
        b.read_exact(&mut prefix).await.unwrap();
        assert_eq!(prefix, [0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn fragmented_stream_is_reassembled() {
        // A 3-byte pipe forces both prefix and body across many reads.
        let (mut a, mut b) = tokio::io::duplex(3);
        let payload = (0..=255u8).collect::<Vec<_>>();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            write_record(&mut a, &payload).await.unwrap();
            write_record(&mut a, b"second").await.unwrap();
        });

        assert_eq!(read_record(&mut b, 1024).await.unwrap().unwrap(), expected);
        assert_eq!(read_record(&mut b, 1024).await.unwrap().unwrap(), b"second");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_record(&mut b, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_prefix_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);
        let err = read_record(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn eof_inside_body_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        drop(a);
        let err = read_record(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn oversized_declared_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_record(&mut b, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Crypto(CryptoError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn empty_record_is_allowed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_record(&mut a, b"").await.unwrap();
        assert!(read_record(&mut b, 64).await.unwrap().unwrap().is_empty());
    }
}
