//! Bus position records as received from the feed and as served after
//! normalization.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Rendering used for `datahora` and `datahoraservidor` in normalized output.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single record failed normalization and must be left out of the result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("field `{field}` is not a millisecond timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// One GPS ping exactly as the feed sent it.
///
/// Every upstream field is kept, in upstream order, so the raw endpoint can
/// hand records back untouched. Typed access goes through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn ordem(&self) -> Option<String> {
        self.get("ordem").and_then(text)
    }

    pub fn linha(&self) -> Option<String> {
        self.get("linha").and_then(text)
    }

    /// Speed, or `0.0` when absent or unparseable.
    ///
    /// Unlike coordinates, a comma is not a decimal separator here.
    pub fn velocidade(&self) -> f64 {
        match self.get("velocidade") {
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            Some(v) => decimal(v),
            None => None,
        }
        .unwrap_or(0.0)
    }

    /// Key used to order raw records, newest first.
    ///
    /// `datahora` counts when it is a JSON number or an integer string.
    /// Anything else ranks as the oldest possible value.
    pub fn sort_key(&self) -> Option<i64> {
        self.get("datahora").and_then(|v| millis(v).ok())
    }

    fn coordinate(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            None => Some(0.0),
            Some(v) => decimal(v),
        }
    }

    fn timestamp(&self, field: &'static str) -> Result<Option<i64>, RecordError> {
        self.get(field).map(millis).transpose().map_err(|value| {
            RecordError::InvalidTimestamp { field, value }
        })
    }

    /// Coerces the record into its typed shape.
    ///
    /// # Errors
    ///
    /// Fails only when `datahora` or `datahoraservidor` is present but is not
    /// a millisecond timestamp. Bad coordinates or speed never fail.
    pub fn normalize(&self) -> Result<NormalizedRecord, RecordError> {
        let datahora = self.timestamp("datahora")?;
        let datahoraservidor = self.timestamp("datahoraservidor")?;

        Ok(NormalizedRecord {
            ordem: self.ordem(),
            linha: self.linha(),
            latitude: self.coordinate("latitude"),
            longitude: self.coordinate("longitude"),
            velocidade: self.velocidade(),
            datahora: datahora.and_then(DateTime::from_timestamp_millis),
            datahoraservidor: datahoraservidor.and_then(DateTime::from_timestamp_millis),
            atraso_ms: datahoraservidor
                .unwrap_or(0)
                .saturating_sub(datahora.unwrap_or(0)),
        })
    }
}

/// A record after type coercion and delay computation.
///
/// Timestamps stay as instants so the collection can be sorted
/// chronologically. [`NormalizedRecord::render`] produces the served form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub ordem: Option<String>,
    pub linha: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub velocidade: f64,
    pub datahora: Option<DateTime<Utc>>,
    pub datahoraservidor: Option<DateTime<Utc>>,
    pub atraso_ms: i64,
}

impl NormalizedRecord {
    /// Newest first; records without `datahora` go last.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.datahora.cmp(&a.datahora)
    }

    pub fn render(self, tz: &Tz) -> RenderedRecord {
        let fmt = |dt: Option<DateTime<Utc>>| {
            dt.map(|dt| dt.with_timezone(tz).format(DATETIME_FORMAT).to_string())
        };

        RenderedRecord {
            ordem: self.ordem,
            linha: self.linha,
            latitude: self.latitude,
            longitude: self.longitude,
            velocidade: self.velocidade,
            datahora: fmt(self.datahora),
            datahoraservidor: fmt(self.datahoraservidor),
            atraso_ms: self.atraso_ms,
        }
    }
}

/// Wire form of a normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRecord {
    pub ordem: Option<String>,
    pub linha: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub velocidade: f64,
    pub datahora: Option<String>,
    pub datahoraservidor: Option<String>,
    pub atraso_ms: i64,
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a locale-formatted decimal such as `"-22,9"`.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', ".").replace('\u{2212}', "-");
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn decimal(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Reads a millisecond timestamp, returning the offending value on failure.
fn millis(v: &Value) -> Result<i64, String> {
    let parsed = match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawRecord {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_parse_decimal_separators() {
        assert_eq!(parse_decimal("-22,9"), Some(-22.9));
        assert_eq!(parse_decimal("-22.9"), Some(-22.9));
        assert_eq!(parse_decimal("\u{2212}22,9"), Some(-22.9));
        assert_eq!(parse_decimal(" 15 "), Some(15.0));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("1,2,3"), None);
    }

    #[test]
    fn test_speed_is_parsed_strictly() {
        assert_eq!(raw(json!({"velocidade": "12.5"})).velocidade(), 12.5);
        assert_eq!(raw(json!({"velocidade": 7})).velocidade(), 7.0);
        assert_eq!(raw(json!({"velocidade": "0,5"})).velocidade(), 0.0);
        assert_eq!(raw(json!({"velocidade": "inf"})).velocidade(), 0.0);
        assert_eq!(raw(json!({})).velocidade(), 0.0);
    }

    #[test]
    fn test_normalize_full_record() {
        let rec = raw(json!({
            "ordem": "A1",
            "linha": "371",
            "latitude": "-22,9",
            "longitude": "-43,2",
            "velocidade": "15",
            "datahora": "1700000000000",
            "datahoraservidor": "1700000001000"
        }));

        let n = rec.normalize().unwrap();
        assert_eq!(n.ordem.as_deref(), Some("A1"));
        assert_eq!(n.linha.as_deref(), Some("371"));
        assert_eq!(n.latitude, Some(-22.9));
        assert_eq!(n.longitude, Some(-43.2));
        assert_eq!(n.velocidade, 15.0);
        assert_eq!(n.atraso_ms, 1000);
        assert_eq!(n.datahora, DateTime::from_timestamp_millis(1_700_000_000_000));
    }

    #[test]
    fn test_delay_from_integer_timestamps() {
        let rec = raw(json!({"datahora": 1000, "datahoraservidor": 1500}));
        assert_eq!(rec.normalize().unwrap().atraso_ms, 500);
    }

    #[test]
    fn test_delay_defaults_missing_to_zero() {
        let rec = raw(json!({"datahoraservidor": 1500}));
        let n = rec.normalize().unwrap();
        assert_eq!(n.atraso_ms, 1500);
        assert_eq!(n.datahora, None);
    }

    #[test]
    fn test_bad_coordinates_do_not_fail_record() {
        let rec = raw(json!({
            "latitude": "norte",
            "longitude": null,
            "velocidade": "rápido",
            "datahora": 1000,
            "datahoraservidor": 1200
        }));
        let n = rec.normalize().unwrap();
        assert_eq!(n.latitude, None);
        assert_eq!(n.longitude, None);
        assert_eq!(n.velocidade, 0.0);
        assert_eq!(n.atraso_ms, 200);
    }

    #[test]
    fn test_absent_coordinates_default_to_zero() {
        let n = raw(json!({"ordem": "B2"})).normalize().unwrap();
        assert_eq!(n.latitude, Some(0.0));
        assert_eq!(n.longitude, Some(0.0));
    }

    #[test]
    fn test_invalid_timestamp_fails_record() {
        let err = raw(json!({"datahora": "ontem"})).normalize().unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidTimestamp {
                field: "datahora",
                value: "\"ontem\"".to_string()
            }
        );

        let err = raw(json!({"datahoraservidor": null})).normalize().unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidTimestamp { field: "datahoraservidor", .. }
        ));
    }

    #[test]
    fn test_numeric_ordem_is_rendered_as_text() {
        let n = raw(json!({"ordem": 42, "linha": true})).normalize().unwrap();
        assert_eq!(n.ordem.as_deref(), Some("42"));
        assert_eq!(n.linha, None);
    }

    #[test]
    fn test_render_formats_in_zone() {
        let rec = raw(json!({"datahora": 1_700_000_000_000_i64}));
        let n = rec.normalize().unwrap();

        let utc = n.clone().render(&Tz::UTC);
        assert_eq!(utc.datahora.as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(utc.datahoraservidor, None);

        let rio = n.render(&chrono_tz::America::Sao_Paulo);
        assert_eq!(rio.datahora.as_deref(), Some("2023-11-14 19:13:20"));
    }

    #[test]
    fn test_newest_first_puts_missing_last() {
        let newer = raw(json!({"datahora": 2000})).normalize().unwrap();
        let older = raw(json!({"datahora": 1000})).normalize().unwrap();
        let unknown = raw(json!({})).normalize().unwrap();

        let mut all = vec![unknown.clone(), older.clone(), newer.clone()];
        all.sort_by(NormalizedRecord::newest_first);
        assert_eq!(all, vec![newer, older, unknown]);
    }

    #[test]
    fn test_raw_sort_key() {
        assert_eq!(raw(json!({"datahora": "1700"})).sort_key(), Some(1700));
        assert_eq!(raw(json!({"datahora": 1700})).sort_key(), Some(1700));
        assert_eq!(raw(json!({"datahora": "x"})).sort_key(), None);
        assert_eq!(raw(json!({})).sort_key(), None);
    }

    #[test]
    fn test_raw_record_keeps_field_order() {
        let body = r#"{"ordem":"A1","zeta":1,"alpha":[1,2],"datahora":"5"}"#;
        let rec: RawRecord = serde_json::from_str(body).unwrap();
        assert_eq!(serde_json::to_string(&rec).unwrap(), body);
    }
}
