//! Two-layer envelope codec.
//!
//! Outbound: payload JSON → group key → `Envelope::data`; envelope JSON →
//! session key → frame body. Inbound runs the same steps in reverse. A hop
//! that holds only the session key can read the envelope but not the data.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shroud_types::{messages, Envelope, HttpRequest, HttpResponse, SessionId, StatusCode, WireError};
use thiserror::Error;

use crate::key::{CryptoError, Key};

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Envelope or payload JSON is invalid.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Encryption layer failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Body is not UTF-8 text.
    #[error("body is not text")]
    NotText,
}

/// Encrypt an envelope into a frame body.
pub fn seal(envelope: &Envelope, session: &Key) -> Result<Vec<u8>, CodecError> {
    let json = envelope.to_wire()?;
    Ok(session.encrypt(&json)?.into_bytes())
}

/// Decrypt a frame body into an envelope.
pub fn open(body: &[u8], session: &Key) -> Result<Envelope, CodecError> {
    let text = std::str::from_utf8(body).map_err(|_| CodecError::NotText)?;
    let json = session.decrypt(text)?;
    Ok(Envelope::from_wire(&json)?)
}

/// Serialize and group-encrypt a payload for `Envelope::data`.
pub fn seal_payload<T: Serialize>(payload: &T, group: &Key) -> Result<String, CodecError> {
    let json = messages::encode(payload)?;
    Ok(group.encrypt(&json)?)
}

/// Group-decrypt and parse the envelope's payload.
pub fn open_payload<T: DeserializeOwned>(envelope: &Envelope, group: &Key) -> Result<T, CodecError> {
    let data = envelope.require_data()?;
    let json = group.decrypt(data)?;
    Ok(messages::decode(&json)?)
}

/// Build a request frame carrying `envelope`.
///
/// The session cookie is omitted when `session` is empty (handshake).
pub fn request(
    session: &SessionId,
    envelope: &Envelope,
    key: &Key,
) -> Result<HttpRequest, CodecError> {
    let request = if session.is_empty() {
        HttpRequest::new()
    } else {
        HttpRequest::with_session(session)
    };
    Ok(request.with_body(seal(envelope, key)?))
}

/// Build a successful response frame carrying `envelope`.
pub fn response(envelope: &Envelope, key: &Key) -> Result<HttpResponse, CodecError> {
    Ok(HttpResponse::ok().with_body(seal(envelope, key)?))
}

/// Bodyless response with the given status.
pub fn status(status: StatusCode) -> HttpResponse {
    HttpResponse::new(status)
}

/// Envelope of a response, or `None` when the body is empty.
pub fn open_response(response: &HttpResponse, key: &Key) -> Result<Option<Envelope>, CodecError> {
    if response.body.is_empty() {
        return Ok(None);
    }
    open(&response.body, key).map(Some)
}
