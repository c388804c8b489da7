// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::NetworkingError;
use crate::messaging::message::Message;
use crate::messaging::multipart::{
    generate_multipart_form_data, parse_multipart_form_data, Multipart,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Name of the distinguished part carrying the message metadata.
const META_PART_NAME: &str = "msg-meta";

#[derive(Serialize, Deserialize)]
struct MessageMeta {
    id: String,
    #[serde(rename = "type")]
    message_type: String,
}

/// Encodes a message into its multipart-form-data wire form: one `msg-meta`
/// JSON part holding id and type, and one binary-safe part per attribute.
pub fn to_multipart_form_data(message: &Message) -> Result<Bytes, NetworkingError> {
    let meta = MessageMeta {
        id: message.id().to_string(),
        message_type: message.message_type().to_string(),
    };
    let meta_json = serde_json::to_vec(&meta)
        .map_err(|err| NetworkingError::MessagePayloadInvalid(err.to_string()))?;

    let mut multipart = Multipart::default();
    for (name, value) in message.attributes() {
        multipart.insert(name.clone(), value.clone());
    }
    multipart.insert(META_PART_NAME, meta_json);

    Ok(generate_multipart_form_data(&multipart))
}

/// Decodes a multipart-form-data payload back into a message. Fails with
/// [`NetworkingError::MessagePayloadInvalid`] when the metadata part is
/// missing or malformed.
pub fn from_multipart_form_data(data: &[u8]) -> Result<Message, NetworkingError> {
    let mut multipart = parse_multipart_form_data(data)?;

    let meta_part = multipart.parts.remove(META_PART_NAME).ok_or_else(|| {
        NetworkingError::MessagePayloadInvalid(format!(
            "payload is missing its '{META_PART_NAME}' part"
        ))
    })?;

    let meta: MessageMeta = serde_json::from_slice(&meta_part.content)
        .map_err(|err| NetworkingError::MessagePayloadInvalid(err.to_string()))?;

    if meta.message_type.is_empty() {
        return Err(NetworkingError::MessagePayloadInvalid(
            "message type must not be empty".to_string(),
        ));
    }
    if meta.id.is_empty() {
        return Err(NetworkingError::MessagePayloadInvalid(
            "message id must not be empty".to_string(),
        ));
    }

    let mut message = Message::with_id(meta.message_type, meta.id);
    for (name, part) in multipart.parts {
        message.set_attribute(name, part.content);
    }

    Ok(message)
}
