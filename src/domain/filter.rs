//! Photo query filters.
//!
//! Filters arrive loosely typed (TOML tables, CLI JSON) and are coerced into
//! a [`PhotoFilter`] by [`check_filters`]. The same filter drives both the
//! SQL store and the in-memory store, so its semantics live here.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::photo::Photo;
use crate::error::FilterError;

/// Earliest representable timestamp (0001-01-01T00:00:00Z)
const MIN_TIMESTAMP: i64 = -62_135_596_800;
/// Latest representable timestamp (9999-12-31T23:59:59Z)
const MAX_TIMESTAMP: i64 = 253_402_300_799;

const FLAG_HINT: &str = "should be `bool` type value or `int` type value from range {0, 1}";

/// Typed photo filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhotoFilter {
    pub owner_id: Option<i64>,
    /// Album must be one of these (empty list matches nothing)
    pub albums: Option<Vec<String>>,
    /// Album must not be one of these
    pub restricted_albums: Option<Vec<String>>,
    /// Inclusive lower bound on `date_time`
    pub start_datetime: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `date_time`
    pub end_datetime: Option<DateTime<Utc>>,
    pub posted: Option<bool>,
    /// Post watermarked files; does not restrict selection
    pub marked: Option<bool>,
    /// Uniformly random order instead of `(date_time, vk_id)`
    pub random: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl PhotoFilter {
    /// Every photo, in stable order
    pub fn all() -> Self {
        Self::default()
    }

    pub fn posted_only() -> Self {
        Self {
            posted: Some(true),
            ..Self::default()
        }
    }

    /// Random unposted photos, one unless a limit was given
    pub fn for_posting(mut self) -> Self {
        self.random = true;
        self.posted = Some(false);
        self.limit = Some(self.limit.unwrap_or(1));
        self
    }

    pub fn marked(&self) -> bool {
        self.marked.unwrap_or(false)
    }

    /// Evaluate the selection clauses against one record
    pub fn matches(&self, photo: &Photo) -> bool {
        if let Some(owner_id) = self.owner_id {
            if photo.owner_id != owner_id {
                return false;
            }
        }
        if let Some(albums) = &self.albums {
            if !albums.iter().any(|album| *album == photo.album) {
                return false;
            }
        }
        if let Some(restricted) = &self.restricted_albums {
            if restricted.iter().any(|album| *album == photo.album) {
                return false;
            }
        }
        if let Some(start) = self.start_datetime {
            if photo.date_time < start {
                return false;
            }
        }
        if let Some(end) = self.end_datetime {
            if photo.date_time > end {
                return false;
            }
        }
        if let Some(posted) = self.posted {
            if photo.posted != posted {
                return false;
            }
        }
        true
    }

    /// Selection, ordering and pagination over an in-memory set
    pub fn apply(&self, photos: impl IntoIterator<Item = Photo>) -> Vec<Photo> {
        let mut selected: Vec<Photo> = photos.into_iter().filter(|p| self.matches(p)).collect();

        if self.random {
            selected.shuffle(&mut rand::thread_rng());
        } else {
            selected.sort_by(|a, b| {
                a.date_time
                    .cmp(&b.date_time)
                    .then_with(|| a.vk_id.cmp(&b.vk_id))
            });
        }

        let offset = self.offset.map_or(0, |o| usize::try_from(o).unwrap_or(usize::MAX));
        let limit = self.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        selected.into_iter().skip(offset).take(limit).collect()
    }
}

/// Coerce and validate raw filter parameters
pub fn check_filters(raw: &Map<String, Value>) -> Result<PhotoFilter, FilterError> {
    let mut filter = PhotoFilter::default();

    for (key, value) in raw {
        if value.is_null() {
            continue;
        }
        match key.as_str() {
            "owner_id" => filter.owner_id = Some(coerce_int(key, value)?),
            "albums" => filter.albums = Some(coerce_strings(key, value)?),
            "restricted_albums" => filter.restricted_albums = Some(coerce_strings(key, value)?),
            "start_datetime" => filter.start_datetime = Some(coerce_datetime(key, value)?),
            "end_datetime" => filter.end_datetime = Some(coerce_datetime(key, value)?),
            "posted" => filter.posted = Some(coerce_flag(key, value)?),
            "marked" => filter.marked = Some(coerce_flag(key, value)?),
            "random" => filter.random = coerce_flag(key, value)?,
            "limit" => filter.limit = Some(coerce_count(key, value)?),
            "offset" => filter.offset = Some(coerce_count(key, value)?),
            unknown => warn!("Ignoring unknown filter parameter '{}'", unknown),
        }
    }

    Ok(filter)
}

fn invalid_value(key: &str, value: &Value, reason: impl Into<String>) -> FilterError {
    FilterError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn invalid_type(key: &str, value: &Value, expected: &'static str) -> FilterError {
    FilterError::InvalidType {
        key: key.to_string(),
        expected,
        value: value.to_string(),
    }
}

fn coerce_int(key: &str, value: &Value) -> Result<i64, FilterError> {
    match value {
        Value::Number(number) => {
            if let Some(n) = number.as_i64() {
                return Ok(n);
            }
            match number.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(invalid_value(key, value, "not an integer")),
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| invalid_value(key, value, e.to_string())),
        _ => Err(invalid_type(key, value, "an integer or a string with an integer")),
    }
}

fn coerce_count(key: &str, value: &Value) -> Result<u64, FilterError> {
    let n = coerce_int(key, value)?;
    u64::try_from(n).map_err(|_| invalid_value(key, value, "must not be negative"))
}

fn coerce_flag(key: &str, value: &Value) -> Result<bool, FilterError> {
    if let Value::Bool(flag) = value {
        return Ok(*flag);
    }
    match coerce_int(key, value) {
        Ok(0) => Ok(false),
        Ok(1) => Ok(true),
        Ok(_) => Err(invalid_value(key, value, FLAG_HINT)),
        Err(FilterError::InvalidValue { .. }) => Err(invalid_value(key, value, FLAG_HINT)),
        Err(e) => Err(e),
    }
}

fn coerce_strings(key: &str, value: &Value) -> Result<Vec<String>, FilterError> {
    let Value::Array(items) = value else {
        return Err(invalid_type(key, value, "a list of strings"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(invalid_type(key, value, "a list of strings")),
        })
        .collect()
}

/// Unix seconds (integer or fractional) into a UTC datetime
fn coerce_datetime(key: &str, value: &Value) -> Result<DateTime<Utc>, FilterError> {
    let Value::Number(number) = value else {
        return Err(invalid_type(key, value, "a unix timestamp number"));
    };

    let (secs, nanos) = if let Some(secs) = number.as_i64() {
        (secs, 0)
    } else {
        let f = number
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| invalid_value(key, value, "timestamp out of range"))?;
        if f < MIN_TIMESTAMP as f64 || f >= (MAX_TIMESTAMP + 1) as f64 {
            return Err(invalid_value(key, value, "timestamp out of range"));
        }
        let secs = f.floor();
        let nanos = (((f - secs) * 1e9).round() as u32).min(999_999_999);
        (secs as i64, nanos)
    };

    if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&secs) {
        return Err(invalid_value(key, value, "timestamp out of range"));
    }

    DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| invalid_value(key, value, "timestamp out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn photo(vk_id: &str, album: &str, day: u32, posted: bool) -> Photo {
        Photo {
            vk_id: vk_id.to_string(),
            owner_id: -14,
            object_id: 1,
            album_id: 1,
            album: album.to_string(),
            user_id: None,
            text: None,
            link: format!("http://example.com/{vk_id}.jpg"),
            date_time: Utc.with_ymd_and_hms(2016, 9, day, 12, 0, 0).unwrap(),
            posted,
        }
    }

    #[test]
    fn test_check_filters_coerces_everything() {
        let filter = check_filters(&raw(json!({
            "owner_id": "-14",
            "albums": ["wall", "graffiti"],
            "restricted_albums": ["saved"],
            "start_datetime": 717728719,
            "end_datetime": 5832683395u64,
            "posted": "1",
            "marked": "0",
            "random": "1",
            "limit": "100",
            "offset": "10"
        })))
        .unwrap();

        assert_eq!(
            filter,
            PhotoFilter {
                owner_id: Some(-14),
                albums: Some(vec!["wall".to_string(), "graffiti".to_string()]),
                restricted_albums: Some(vec!["saved".to_string()]),
                start_datetime: Some(Utc.with_ymd_and_hms(1992, 9, 29, 1, 5, 19).unwrap()),
                end_datetime: Some(Utc.with_ymd_and_hms(2154, 10, 30, 21, 49, 55).unwrap()),
                posted: Some(true),
                marked: Some(false),
                random: true,
                limit: Some(100),
                offset: Some(10),
            }
        );
    }

    #[test]
    fn test_check_filters_bad_int_parameters() {
        // en dash instead of hyphen
        let err = check_filters(&raw(json!({"owner_id": "\u{2013}14"}))).unwrap_err();
        assert!(!err.is_type_error());
        assert_eq!(err.key(), "owner_id");

        // typos like 1-l, o-0
        assert!(check_filters(&raw(json!({"limit": "l40"}))).is_err());
        assert!(check_filters(&raw(json!({"offset": "1o"}))).is_err());
        assert!(check_filters(&raw(json!({"offset": -1}))).is_err());
        assert!(check_filters(&raw(json!({"limit": 2.5}))).is_err());
        assert!(check_filters(&raw(json!({"limit": [1]})))
            .unwrap_err()
            .is_type_error());
    }

    #[test]
    fn test_check_filters_bad_list_parameters() {
        let err = check_filters(&raw(json!({"albums": "wall,graffiti"}))).unwrap_err();
        assert!(err.is_type_error());

        let err = check_filters(&raw(json!({"restricted_albums": "saved"}))).unwrap_err();
        assert!(err.is_type_error());

        let err = check_filters(&raw(json!({"albums": ["wall", 1]}))).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_check_filters_bad_bool_parameters() {
        for bad in [json!({"posted": -1}), json!({"marked": "-1"}), json!({"random": "l"})] {
            let err = check_filters(&raw(bad)).unwrap_err();
            assert!(!err.is_type_error(), "{err}");
            assert!(err.to_string().contains("from range {0, 1}"));
        }
    }

    #[test]
    fn test_check_filters_flag_forms() {
        let filter = check_filters(&raw(json!({
            "posted": true,
            "marked": 1.0,
            "random": 0
        })))
        .unwrap();
        assert_eq!(filter.posted, Some(true));
        assert_eq!(filter.marked, Some(true));
        assert!(!filter.random);
    }

    #[test]
    fn test_check_filters_bad_datetime_parameters() {
        let err = check_filters(&raw(json!({"start_datetime": MAX_TIMESTAMP + 1}))).unwrap_err();
        assert!(!err.is_type_error());

        let err = check_filters(&raw(json!({"start_datetime": MIN_TIMESTAMP - 1}))).unwrap_err();
        assert!(!err.is_type_error());

        let err =
            check_filters(&raw(json!({"start_datetime": "2154-10-30 21:49:55"}))).unwrap_err();
        assert!(err.is_type_error());

        let filter = check_filters(&raw(json!({"end_datetime": MAX_TIMESTAMP}))).unwrap();
        assert_eq!(
            filter.end_datetime,
            Some(Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn test_check_filters_fractional_timestamp() {
        let filter = check_filters(&raw(json!({"start_datetime": 0.5}))).unwrap();
        assert_eq!(
            filter.start_datetime,
            DateTime::<Utc>::from_timestamp(0, 500_000_000)
        );
    }

    #[test]
    fn test_check_filters_skips_null_and_unknown() {
        let filter = check_filters(&raw(json!({"limit": null, "colour": "red"}))).unwrap();
        assert_eq!(filter, PhotoFilter::default());
    }

    #[test]
    fn test_matches_albums_and_restrictions() {
        let wall = photo("a", "wall", 1, false);
        let saved = photo("b", "saved", 1, false);

        let filter = PhotoFilter {
            restricted_albums: Some(vec!["saved".to_string()]),
            ..PhotoFilter::default()
        };
        assert!(filter.matches(&wall));
        assert!(!filter.matches(&saved));

        let nothing = PhotoFilter {
            albums: Some(Vec::new()),
            ..PhotoFilter::default()
        };
        assert!(!nothing.matches(&wall));

        let unrestricted = PhotoFilter {
            restricted_albums: Some(Vec::new()),
            ..PhotoFilter::default()
        };
        assert!(unrestricted.matches(&saved));
    }

    #[test]
    fn test_matches_inclusive_date_bounds() {
        let p = photo("a", "wall", 10, false);
        let filter = PhotoFilter {
            start_datetime: Some(p.date_time),
            end_datetime: Some(p.date_time),
            ..PhotoFilter::default()
        };
        assert!(filter.matches(&p));

        let inverted = PhotoFilter {
            start_datetime: Some(p.date_time + chrono::Duration::seconds(1)),
            end_datetime: Some(p.date_time),
            ..PhotoFilter::default()
        };
        assert!(!inverted.matches(&p));
    }

    #[test]
    fn test_apply_orders_and_paginates() {
        let photos = vec![
            photo("c", "wall", 3, false),
            photo("a", "wall", 1, false),
            photo("b", "wall", 2, true),
            photo("d", "wall", 1, false),
        ];

        let page = PhotoFilter {
            offset: Some(1),
            limit: Some(2),
            ..PhotoFilter::default()
        }
        .apply(photos.clone());
        let ids: Vec<_> = page.iter().map(|p| p.vk_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b"]);

        let tail = PhotoFilter {
            offset: Some(3),
            ..PhotoFilter::default()
        }
        .apply(photos.clone());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].vk_id, "c");

        let unposted = PhotoFilter {
            posted: Some(false),
            ..PhotoFilter::default()
        }
        .apply(photos);
        assert_eq!(unposted.len(), 3);
    }

    #[test]
    fn test_for_posting_picks_one_random_unposted() {
        let photos = vec![
            photo("a", "wall", 1, true),
            photo("b", "wall", 2, false),
            photo("c", "wall", 3, false),
        ];

        let filter = PhotoFilter::default().for_posting();
        assert!(filter.random);
        assert_eq!(filter.limit, Some(1));

        let picked = filter.apply(photos);
        assert_eq!(picked.len(), 1);
        assert!(!picked[0].posted);
    }

    #[test]
    fn test_for_posting_keeps_explicit_limit() {
        let filter = PhotoFilter {
            limit: Some(5),
            posted: Some(true),
            ..PhotoFilter::default()
        }
        .for_posting();
        assert_eq!(filter.limit, Some(5));
        assert_eq!(filter.posted, Some(false));
    }
}
