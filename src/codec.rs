use std::io::{Error, ErrorKind, Result};

use async_std::io::prelude::*;

use crate::animation::{AnimationRequest, Mode};

/// Upper bound on one wire frame; anything larger terminates the session.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Failures while turning a frame payload into an animation request. Only
/// malformed payloads poison the session; a structurally valid frame carrying
/// a request the server does not understand is dropped with a warning and the
/// session keeps going.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
  #[error("malformed frame - {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("unsupported animation request - {0}")]
  UnsupportedAnimation(String),

  #[error("cancel request missing identifier")]
  MissingIdentifier,
}

impl DecodeError {
  pub fn poisons_session(&self) -> bool {
    matches!(self, DecodeError::Malformed(_))
  }
}

/// Serializes a request into a length-prefixed frame ready to write.
pub fn encode(request: &AnimationRequest) -> Result<Vec<u8>> {
  let payload = serde_json::to_vec(request).map_err(|error| Error::new(ErrorKind::InvalidData, error))?;

  if payload.len() > MAX_FRAME_BYTES {
    return Err(Error::new(
      ErrorKind::InvalidData,
      format!("request encodes to {} bytes, over the frame limit", payload.len()),
    ));
  }

  let mut frame = Vec::with_capacity(payload.len() + 4);
  frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  frame.extend_from_slice(&payload);
  Ok(frame)
}

pub fn decode(payload: &[u8]) -> std::result::Result<AnimationRequest, DecodeError> {
  // syntax errors are session-fatal; schema errors are not
  let value = serde_json::from_slice::<serde_json::Value>(payload)?;

  let request = serde_json::from_value::<AnimationRequest>(value)
    .map_err(|error| DecodeError::UnsupportedAnimation(error.to_string()))?;

  match (request.mode, &request.id, &request.effect) {
    (Mode::Cancel, None, _) => Err(DecodeError::MissingIdentifier),
    (Mode::Cancel, Some(_), _) => Ok(request),
    (_, _, None) => Err(DecodeError::UnsupportedAnimation(
      "request names no recognized effect".to_string(),
    )),
    _ => Ok(request),
  }
}

/// Reads one length-prefixed frame, returning `None` on a clean disconnect
/// before any prefix bytes arrive.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
  R: async_std::io::Read + Unpin,
{
  let mut prefix = [0u8; 4];
  let mut filled = 0usize;

  while filled < prefix.len() {
    let amount = reader.read(&mut prefix[filled..]).await?;

    if amount == 0 {
      if filled == 0 {
        return Ok(None);
      }

      return Err(Error::new(ErrorKind::UnexpectedEof, "connection closed mid-prefix"));
    }

    filled += amount;
  }

  let length = u32::from_be_bytes(prefix) as usize;

  if length > MAX_FRAME_BYTES {
    return Err(Error::new(
      ErrorKind::InvalidData,
      format!("frame of {} bytes exceeds the {} byte limit", length, MAX_FRAME_BYTES),
    ));
  }

  let mut payload = vec![0u8; length];
  reader.read_exact(&mut payload).await?;
  Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
  W: async_std::io::Write + Unpin,
{
  writer.write_all(frame).await?;
  writer.flush().await
}
