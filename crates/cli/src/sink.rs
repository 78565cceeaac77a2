//! JSON-lines sink: one object per event, `{"headers":{...},"body":"..."}`

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use spool::{EventSink, SinkError};
use zipspool_core::Event;

#[derive(Serialize)]
struct EventLine<'a> {
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  headers: &'a BTreeMap<String, String>,
  body: Cow<'a, str>,
}

pub struct JsonLinesSink<W> {
  writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer: Mutex::new(writer),
    }
  }

  #[cfg(test)]
  pub fn into_inner(self) -> W {
    self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn write_batch(&self, events: &[Event]) -> std::io::Result<()> {
    let mut writer = self
      .writer
      .lock()
      .map_err(|_| std::io::Error::other("writer lock poisoned"))?;
    for event in events {
      let line = EventLine {
        headers: &event.headers,
        body: event.body_lossy(),
      };
      serde_json::to_writer(&mut *writer, &line)?;
      writer.write_all(b"\n")?;
    }
    writer.flush()
  }
}

#[async_trait]
impl<W: Write + Send> EventSink for JsonLinesSink<W> {
  async fn accept(&self, events: &[Event]) -> Result<(), SinkError> {
    self.write_batch(events).map_err(|e| SinkError::Fatal(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[tokio::test]
  async fn test_writes_one_line_per_event() {
    let sink = JsonLinesSink::new(Vec::new());
    let mut tagged = Event::with_body("second");
    tagged.set_header("basename", "a.zip");

    sink.accept(&[Event::with_body("first"), tagged]).await.unwrap();

    let output = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(
      output,
      "{\"body\":\"first\"}\n{\"headers\":{\"basename\":\"a.zip\"},\"body\":\"second\"}\n"
    );
  }

  #[tokio::test]
  async fn test_write_failure_is_fatal() {
    struct Broken;
    impl Write for Broken {
      fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("disk gone"))
      }
      fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
      }
    }

    let sink = JsonLinesSink::new(Broken);
    let err = sink.accept(&[Event::with_body("x")]).await.unwrap_err();
    assert!(matches!(err, SinkError::Fatal(_)));
  }
}
