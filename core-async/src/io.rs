//! Async I/O traits and utilities.
//!
//! Song downloads surface as `Box<dyn AsyncRead + Send + Unpin>` and are
//! streamed into the staging cache with the `AsyncReadExt` and
//! `AsyncWriteExt` helpers re-exported here.

pub use tokio::io::{
    copy, empty, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt,
    AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadBuf,
};
