use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single delivered unit of payload.
///
/// The body is a contiguous slice of a decoded archive entry; headers carry
/// optional annotations such as the originating file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Event {
  pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
    Self {
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn header(&self, key: &str) -> Option<&str> {
    self.headers.get(key).map(String::as_str)
  }

  pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.headers.insert(key.into(), value.into());
  }

  pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }

  pub fn len(&self) -> usize {
    self.body.len()
  }

  pub fn is_empty(&self) -> bool {
    self.body.is_empty()
  }
}
