//! Framed Unix domain socket clients.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::net::{UnixDatagram, UnixStream};
use tracing::debug;

use super::framing::{encode_frame, read_frame, write_frame};
use super::message::{ControlMessage, Origin, RequestEnvelope, ResponseEnvelope};
use crate::constants::codes;
use crate::error::{DapiError, Result};

/// Stream connection to a local daemon socket
#[derive(Debug)]
pub struct DaemonSocket {
    path: PathBuf,
    stream: UnixStream,
}

impl DaemonSocket {
    /// Connect to `path`; failure is fatal for the request
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path).await.map_err(|e| {
            DapiError::internal(codes::SOCKET_UNAVAILABLE)
                .with_extra(format!("{}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Connected to daemon socket");
        Ok(Self { path, stream })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one framed payload
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(DapiError::internal(codes::SOCKET_COMMUNICATION)
                .with_extra("refusing to send an empty message"));
        }
        write_frame(&mut self.stream, payload).await
    }

    /// Receive one framed payload
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.stream).await
    }
}

/// Style B client over a [`DaemonSocket`]
#[derive(Debug)]
pub struct JsonSocket {
    inner: DaemonSocket,
}

impl JsonSocket {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: DaemonSocket::connect(path).await?,
        })
    }

    /// Send a request envelope
    pub async fn send(
        &mut self,
        origin: Option<Origin>,
        command: Option<&str>,
        parameters: Option<Map<String, Value>>,
    ) -> Result<()> {
        let envelope = RequestEnvelope::new(origin, command, parameters);
        self.inner.send(&envelope.to_bytes()?).await
    }

    /// Receive a response envelope, raising its error if non-zero
    pub async fn receive(&mut self) -> Result<Value> {
        let payload = self.inner.receive().await?;
        ResponseEnvelope::from_slice(&payload)?.into_result()
    }
}

/// Datagram socket accepting Style A control messages
#[derive(Debug)]
pub struct ControlQueue {
    path: PathBuf,
    socket: UnixDatagram,
}

impl ControlQueue {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |e: std::io::Error| {
            DapiError::internal(codes::SOCKET_UNAVAILABLE)
                .with_extra(format!("{}: {e}", path.display()))
        };
        let socket = UnixDatagram::unbound().map_err(unavailable)?;
        socket.connect(&path).map_err(unavailable)?;
        Ok(Self { path, socket })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one control message as a single framed datagram
    pub async fn send(&self, message: &ControlMessage) -> Result<()> {
        let frame = encode_frame(message.encode().as_bytes())?;
        let sent = self.socket.send(&frame).await.map_err(|e| {
            DapiError::internal(codes::SOCKET_COMMUNICATION).with_extra(e.to_string())
        })?;
        if sent == 0 {
            return Err(DapiError::internal(codes::SOCKET_COMMUNICATION)
                .with_extra("zero bytes sent"));
        }
        debug!(queue = %self.path.display(), flag = message.flag(), "Control message sent");
        Ok(())
    }
}

/// Send a one-shot message to a daemon socket and return its raw response
///
/// String messages are sent verbatim, anything else as JSON.
pub async fn sendsync(path: impl AsRef<Path>, message: &Value) -> Result<String> {
    let payload = match message {
        Value::String(text) => text.clone().into_bytes(),
        other => serde_json::to_vec(other)?,
    };
    let mut socket = DaemonSocket::connect(path).await?;
    socket.send(&payload).await?;
    let response = socket.receive().await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}
