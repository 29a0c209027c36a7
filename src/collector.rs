//! The feed pipeline: streaming fetch, element extraction, filtering,
//! normalization, capping and ordering.

use std::cmp::Reverse;

use reqwest::Response;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::CollectError;
use crate::fetch::{HttpClient, open_feed};
use crate::parser::{ArrayItems, FeedFormatError};
use crate::record::{NormalizedRecord, RawRecord, RenderedRecord};

/// Forward-only sequence of records decoded from a streaming response.
///
/// Dropping it closes the upstream connection, whatever is left unread.
pub struct RecordStream {
    response: Response,
    items: ArrayItems,
    exhausted: bool,
}

impl RecordStream {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            items: ArrayItems::new(),
            exhausted: false,
        }
    }

    /// Returns the next non-empty record, or `None` once the array is closed.
    ///
    /// # Errors
    ///
    /// Body read failures and any malformed element end the stream.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, CollectError> {
        loop {
            if let Some(bytes) = self.items.next_item() {
                match serde_json::from_slice::<Value>(&bytes)? {
                    v if is_blank(&v) => continue,
                    Value::Object(fields) => return Ok(Some(RawRecord::new(fields))),
                    other => {
                        let shown: String = other.to_string().chars().take(80).collect();
                        return Err(FeedFormatError::NotAnObject(shown).into());
                    }
                }
            }

            if self.exhausted {
                return Ok(None);
            }

            match self.response.chunk().await? {
                Some(chunk) => self.items.feed(&chunk)?,
                None => {
                    self.items.finish()?;
                    self.exhausted = true;
                }
            }
        }
    }
}

/// Elements carrying nothing: `null`, `false`, zero, `""`, `[]` and `{}`.
fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Collects bus positions from the configured upstream, one fetch per call.
pub struct FeedCollector<C> {
    client: C,
    config: FeedConfig,
}

impl<C: HttpClient> FeedCollector<C> {
    pub fn new(client: C, config: FeedConfig) -> Self {
        Self { client, config }
    }

    /// Up to `max_items` records exactly as received, newest `datahora` first.
    ///
    /// # Errors
    ///
    /// Any network, status or format failure aborts the whole collection.
    #[tracing::instrument(skip(self), fields(url = %self.config.url))]
    pub async fn collect_raw(&self) -> Result<Vec<RawRecord>, CollectError> {
        let mut records = self.collect(Some).await?;
        records.sort_by_key(|r| Reverse(r.sort_key()));
        info!(count = records.len(), "Raw records collected");
        Ok(records)
    }

    /// Up to `max_items` moving vehicles, normalized and newest first.
    ///
    /// Records with `velocidade <= 0` are skipped before they count toward the
    /// cap. A record that fails normalization is dropped and logged.
    ///
    /// # Errors
    ///
    /// Same as [`FeedCollector::collect_raw`].
    #[tracing::instrument(skip(self), fields(url = %self.config.url))]
    pub async fn collect_normalized(&self) -> Result<Vec<RenderedRecord>, CollectError> {
        let mut dropped = 0usize;
        let mut records = self
            .collect(|raw| {
                if raw.velocidade() <= 0.0 {
                    return None;
                }
                match raw.normalize() {
                    Ok(record) => Some(record),
                    Err(e) => {
                        dropped += 1;
                        warn!(error = %e, ordem = ?raw.ordem(), "Dropping record");
                        None
                    }
                }
            })
            .await?;

        records.sort_by(NormalizedRecord::newest_first);
        info!(count = records.len(), dropped, "Normalized records collected");

        let tz = self.config.timezone;
        Ok(records.into_iter().map(|r| r.render(&tz)).collect())
    }

    /// Streams the feed through `accept`, stopping once `max_items` values
    /// have been kept.
    async fn collect<T, F>(&self, mut accept: F) -> Result<Vec<T>, CollectError>
    where
        F: FnMut(RawRecord) -> Option<T>,
    {
        let response = open_feed(&self.client, &self.config.url).await?;
        let mut stream = RecordStream::new(response);
        let mut kept = Vec::with_capacity(self.config.max_items);
        let mut seen = 0usize;

        while let Some(raw) = stream.next_record().await? {
            seen += 1;
            if let Some(value) = accept(raw) {
                kept.push(value);
                if kept.len() >= self.config.max_items {
                    debug!(seen, "Cap reached, closing upstream");
                    break;
                }
            }
        }

        Ok(kept)
    }
}
