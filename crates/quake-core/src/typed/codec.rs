//! Frame codec - worker との wire
//!
//! frame は big-endian の `u32` 長と、その長さの JSON バイト列。メッセージ内の
//! envelope は raw JSON のまま埋め込まれるので、frame 化で payload が再
//! シリアライズされることはない。親側は子プロセスの pipe を非同期に扱い、
//! worker 側は blocking な stdin/stdout を使う。

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ParallelError;

/// Upper bound on a single frame; anything larger is treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Serialize `message` into a complete frame (prefix included).
pub fn encode_frame<M: Serialize>(message: &M) -> Result<Vec<u8>, ParallelError> {
    let body = serde_json::to_vec(message).map_err(|source| ParallelError::Serialization {
        type_name: std::any::type_name::<M>().to_string(),
        source,
    })?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ParallelError::Protocol(format!(
            "frame of {} bytes exceeds the limit",
            body.len()
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_body<M: DeserializeOwned>(body: &[u8]) -> Result<M, ParallelError> {
    serde_json::from_slice(body).map_err(|source| ParallelError::Serialization {
        type_name: std::any::type_name::<M>().to_string(),
        source,
    })
}

fn checked_len(prefix: [u8; 4]) -> Result<usize, ParallelError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ParallelError::Protocol(format!(
            "announced frame of {len} bytes exceeds the limit"
        )));
    }
    Ok(len)
}

pub fn write_frame<W: Write, M: Serialize>(writer: &mut W, message: &M) -> Result<(), ParallelError> {
    writer.write_all(&encode_frame(message)?)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` when the stream ends cleanly between frames.
pub fn read_frame<R: Read, M: DeserializeOwned>(reader: &mut R) -> Result<Option<M>, ParallelError> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(ParallelError::Protocol(
                    "stream ended inside a frame header".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let mut body = vec![0u8; checked_len(prefix)?];
    reader.read_exact(&mut body)?;
    decode_body(&body).map(Some)
}

pub async fn write_frame_async<W, M>(writer: &mut W, message: &M) -> Result<(), ParallelError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    writer.write_all(&encode_frame(message)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Async counterpart of [`read_frame`].
pub async fn read_frame_async<R, M>(reader: &mut R) -> Result<Option<M>, ParallelError>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ParallelError::Protocol(
                "stream ended inside a frame header".to_string(),
            ));
        }
        filled += n;
    }
    let mut body = vec![0u8; checked_len(prefix)?];
    reader.read_exact(&mut body).await?;
    decode_body(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Envelope, Monitor, TaskCall};
    use std::io::Cursor;

    fn sample_call() -> TaskCall {
        TaskCall::new(
            "test.sum.v1",
            Envelope::wrap(&vec![1u64, 2, 3]).unwrap(),
            Envelope::wrap(&7u64).unwrap(),
            Envelope::wrap(&Monitor::new("sum")).unwrap(),
        )
    }

    #[test]
    fn frames_roundtrip_back_to_back() {
        let first = sample_call();
        let second = sample_call();
        let mut buf = Vec::new();
        write_frame(&mut buf, &first).unwrap();
        write_frame(&mut buf, &second).unwrap();

        let mut reader = Cursor::new(buf);
        let a: TaskCall = read_frame(&mut reader).unwrap().unwrap();
        let b: TaskCall = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(a.call_id, first.call_id);
        assert_eq!(b.call_id, second.call_id);
        assert_eq!(a.items.unwrap::<Vec<u64>>().unwrap(), vec![1, 2, 3]);
        assert!(read_frame::<_, TaskCall>(&mut reader).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut frame = encode_frame(&sample_call()).unwrap();
        frame.truncate(frame.len() - 3);
        let err = read_frame::<_, TaskCall>(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ParallelError::Io(e) if e.kind() == ErrorKind::UnexpectedEof));

        let err = read_frame::<_, TaskCall>(&mut Cursor::new(vec![0u8, 0])).unwrap_err();
        assert!(matches!(err, ParallelError::Protocol(_)));
    }

    #[test]
    fn oversized_announcement_is_rejected() {
        let frame = u32::MAX.to_be_bytes().to_vec();
        let err = read_frame::<_, TaskCall>(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, ParallelError::Protocol(_)));
    }

    #[tokio::test]
    async fn async_frames_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let call = sample_call();
        let expected = call.call_id;

        let writer = tokio::spawn(async move {
            write_frame_async(&mut client, &call).await.unwrap();
        });
        let received: TaskCall = read_frame_async(&mut server).await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(received.call_id, expected);
        assert!(read_frame_async::<_, TaskCall>(&mut server).await.unwrap().is_none());
    }
}
