//! The first message of every connection.
//!
//! Before any frame is exchanged the client sends one text message holding
//! JSON like `{"AuthToken": "...", "Arguments": "?args=-l"}`. The token must
//! match the configured credential. The arguments are a URL query string
//! that becomes the backend's per-connection parameters.

use log::debug;
use serde::Deserialize;
use webtty_core::{Master, Params, TransportMessage};

use crate::error::ServerError;

#[derive(Debug, Default, Deserialize)]
pub struct InitMessage {
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
    #[serde(rename = "Arguments", default)]
    pub arguments: String,
}

/// Read the init message from `master` and return the parameters for the
/// backend. Arguments are ignored unless `permit_arguments` is set.
pub async fn authenticate(
    master: &dyn Master,
    credential: &str,
    permit_arguments: bool,
) -> Result<Params, ServerError> {
    let data = loop {
        match master
            .read_message()
            .await
            .map_err(ServerError::HandshakeRead)?
        {
            TransportMessage::Text(data) => break data,
            TransportMessage::Control => continue,
            TransportMessage::Binary(_) => return Err(ServerError::UnexpectedMessage),
        }
    };

    let init: InitMessage = serde_json::from_slice(&data).map_err(ServerError::MalformedInit)?;
    if init.auth_token != credential {
        return Err(ServerError::AuthFailed);
    }

    if !permit_arguments || init.arguments.is_empty() {
        return Ok(Params::new());
    }
    let params = parse_arguments(&init.arguments);
    debug!("Client arguments: {params:?}");
    Ok(params)
}

/// Decode the query part of `arguments`. Text before the first `?` is the
/// path and is ignored, so a string without `?` yields no parameters.
pub fn parse_arguments(arguments: &str) -> Params {
    let mut params = Params::new();
    let Some((_, query)) = arguments.split_once('?') else {
        return params;
    };
    let query = query.split_once('#').map_or(query, |(query, _)| query);

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}
