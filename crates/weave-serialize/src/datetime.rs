//! Built-in serializer for chrono timestamps.
//!
//! Matches `DateTime<FixedOffset>`, `DateTime<Utc>` and `NaiveDateTime`.
//! Values are stored inline as RFC 3339 text, so saving a timestamp never
//! uploads a file. Aware timestamps decode to `DateTime<FixedOffset>` with
//! their original offset; naive ones decode to `NaiveDateTime`.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use weave_types::CustomValue;

use crate::registry::{Serializer, SerializerRegistry};

/// Serializer id written into envelopes.
pub const DATETIME_TYPE_ID: &str = "datetime.datetime";

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn is_datetime(value: &CustomValue) -> bool {
    value.is::<DateTime<FixedOffset>>() || value.is::<DateTime<Utc>>() || value.is::<NaiveDateTime>()
}

fn to_text(value: &CustomValue) -> anyhow::Result<String> {
    if let Some(dt) = value.downcast_ref::<DateTime<FixedOffset>>() {
        return Ok(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    if let Some(dt) = value.downcast_ref::<DateTime<Utc>>() {
        return Ok(dt.fixed_offset().to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    if let Some(dt) = value.downcast_ref::<NaiveDateTime>() {
        return Ok(dt.format(NAIVE_FORMAT).to_string());
    }
    anyhow::bail!("{} is not a datetime", value.type_name())
}

fn from_text(text: &str) -> anyhow::Result<CustomValue> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(CustomValue::new(dt));
    }
    let naive = NaiveDateTime::parse_from_str(text, NAIVE_FORMAT)?;
    Ok(CustomValue::new(naive))
}

/// The datetime serializer.
pub fn serializer() -> Serializer {
    Serializer::with_predicate(
        DATETIME_TYPE_ID,
        is_datetime,
        |value, artifact, name| {
            artifact.write(name, to_text(value)?);
            Ok(())
        },
        |artifact, name| {
            let bytes = artifact
                .read(name)
                .ok_or_else(|| anyhow::anyhow!("datetime file {name:?} missing"))?;
            from_text(std::str::from_utf8(bytes)?)
        },
    )
    .with_inline(
        |value| Ok(JsonValue::String(to_text(value)?)),
        |data| match data {
            JsonValue::String(text) => from_text(text),
            other => anyhow::bail!("expected datetime text, got {other}"),
        },
    )
}

pub(crate) fn register(registry: &SerializerRegistry) {
    registry.register(serializer());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, TimeZone, Timelike};

    fn round_trip(value: CustomValue) -> CustomValue {
        let ser = serializer();
        let inline = ser.inline().unwrap();
        let data = (inline.serialize)(&value).unwrap();
        (inline.deserialize)(&data).unwrap()
    }

    #[test]
    fn aware_datetime_keeps_fields_and_offset() {
        let tz = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let dt = tz.with_ymd_and_hms(2024, 2, 29, 13, 45, 7).unwrap();
        let back = round_trip(CustomValue::new(dt));
        let back = back.downcast_ref::<DateTime<FixedOffset>>().unwrap();
        assert_eq!(
            (back.year(), back.month(), back.day()),
            (2024, 2, 29)
        );
        assert_eq!((back.hour(), back.minute(), back.second()), (13, 45, 7));
        assert_eq!(back.offset(), &tz);
    }

    #[test]
    fn utc_decodes_with_zero_offset() {
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let back = round_trip(CustomValue::new(dt));
        let back = back.downcast_ref::<DateTime<FixedOffset>>().unwrap();
        assert_eq!(back.offset().local_minus_utc(), 0);
        assert_eq!(back.with_timezone(&Utc), dt);
    }

    #[test]
    fn naive_stays_naive() {
        let dt = NaiveDate::from_ymd_opt(2020, 5, 17)
            .unwrap()
            .and_hms_micro_opt(8, 9, 10, 123_456)
            .unwrap();
        let back = round_trip(CustomValue::new(dt));
        assert_eq!(back.downcast_ref::<NaiveDateTime>(), Some(&dt));
    }

    #[test]
    fn predicate_rejects_other_types() {
        let ser = serializer();
        assert!(!ser.matches(&CustomValue::new("2020-01-01".to_string())));
        assert!(ser.matches(&CustomValue::new(Utc::now())));
    }
}
