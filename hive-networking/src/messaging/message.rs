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

use bytes::Bytes;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A typed message passed between endpoints. The type routes the message to
/// its consumers, the id correlates requests with responses, and the
/// attributes carry the payload (binary data permitted).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    message_type: String,
    id: String,
    attributes: BTreeMap<String, Bytes>,
}

impl Message {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self::with_id(message_type, Uuid::new_v4().to_string())
    }

    pub fn with_id(message_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Sets or overwrites an attribute of this message.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&Bytes> {
        self.attributes.get(key)
    }

    /// The attribute value as a string, if it exists and is valid UTF-8.
    pub fn attribute_str(&self, key: &str) -> Option<String> {
        self.attributes
            .get(key)
            .and_then(|value| std::str::from_utf8(value).ok())
            .map(|value| value.to_string())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|key| key.as_str())
    }

    pub fn attributes(&self) -> &BTreeMap<String, Bytes> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn new_messages_get_a_unique_id() {
        let first = Message::new("some-type");
        let second = Message::new("some-type");
        assert_ne!(first.id(), second.id());
        assert!(Uuid::parse_str(first.id()).is_ok());
    }

    #[test]
    fn attributes_can_hold_binary_data() {
        let mut message = Message::new("binary");
        message.set_attribute("blob", Bytes::from(vec![0u8, 159, 146, 150]));
        assert_eq!(
            message.attribute("blob"),
            Some(&Bytes::from(vec![0u8, 159, 146, 150]))
        );
        assert_eq!(message.attribute_str("blob"), None);
    }
}
