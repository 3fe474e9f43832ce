//! Length-prefixed JSON framing over an async byte stream: a 4-byte
//! big-endian length followed by that many bytes of `serde_json` output.
//! Self-delimiting, so it composes over a plain TCP stream without
//! needing a separate record-boundary protocol.

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W: AsyncWriteExt + Unpin, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let len = u32::try_from(bytes.len()).map_err(|_| anyhow!("frame too large: {} bytes", bytes.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncReadExt + Unpin, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(anyhow!("frame of {} bytes exceeds max of {}", len, MAX_FRAME_LEN));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}
