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
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Fixed multipart boundary. Collisions with payload bytes are as unlikely
/// as a uuid collision, which matches the source format's guarantee.
const BOUNDARY: &str = "boundary-4f20310a-8ea0-4fa7-aebb-1d8bf9e58f66";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub content: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Multipart {
    pub parts: BTreeMap<String, Part>,
}

impl Multipart {
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Bytes>) {
        let name = name.into();
        self.parts.insert(
            name.clone(),
            Part {
                name,
                content: content.into(),
            },
        );
    }
}

pub fn generate_multipart_form_data(multipart: &Multipart) -> Bytes {
    let mut buffer = BytesMut::new();

    for (name, part) in &multipart.parts {
        buffer.put_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        buffer.put_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        buffer.put_slice(&part.content);
        buffer.put_slice(b"\r\n");
    }

    buffer.put_slice(format!("--{BOUNDARY}--").as_bytes());
    buffer.freeze()
}

pub fn parse_multipart_form_data(data: &[u8]) -> Result<Multipart, NetworkingError> {
    let boundary_marker = format!("--{BOUNDARY}");
    let part_end_marker = format!("\r\n--{BOUNDARY}");

    let mut result = Multipart::default();

    let mut pos = find_subsequence(data, boundary_marker.as_bytes()).ok_or_else(|| {
        NetworkingError::MessagePayloadInvalid("payload contains no multipart boundary".to_string())
    })?;

    loop {
        pos += boundary_marker.len();
        let rest = &data[pos..];

        if rest.starts_with(b"--") {
            // final boundary
            break;
        }

        let Some(end) = find_subsequence(rest, part_end_marker.as_bytes()) else {
            break;
        };

        parse_form_part(&rest[..end], &mut result)?;
        pos += end + 2; // skip the closing CRLF, landing on the next boundary
    }

    Ok(result)
}

fn parse_form_part(part: &[u8], result: &mut Multipart) -> Result<(), NetworkingError> {
    let header_end = find_subsequence(part, b"\r\n\r\n").ok_or_else(|| {
        NetworkingError::MessagePayloadInvalid("multipart part without header".to_string())
    })?;

    let header = String::from_utf8_lossy(&part[..header_end]);
    let name_pos = header.find("name=\"").ok_or_else(|| {
        NetworkingError::MessagePayloadInvalid("multipart part without a name".to_string())
    })?;
    let name_start = name_pos + 6;
    let name_end = header[name_start..].find('"').ok_or_else(|| {
        NetworkingError::MessagePayloadInvalid("unterminated multipart part name".to_string())
    })? + name_start;

    let name = header[name_start..name_end].to_string();
    let content = Bytes::copy_from_slice(&part[header_end + 4..]);

    result.parts.insert(name.clone(), Part { name, content });
    Ok(())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
