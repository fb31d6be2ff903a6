use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::models::{Event, EventDraft};

const SLUG_MAX_LEN: usize = 96;

static TIME_24H_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)(?::[0-5]\d)?$").expect("valid time regex"));

static TIME_12H_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})(?::([0-5]\d))?\s*(am|pm)$").expect("valid time regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("date is not a recognizable calendar date: {0:?}")]
    InvalidDate(String),
    #[error("time must be HH:mm (24h) or h[:mm] AM/PM: {0:?}")]
    InvalidTime(String),
    #[error("{0} must be non-empty")]
    MissingField(&'static str),
    #[error("not a valid email address: {0:?}")]
    InvalidEmail(String),
}

/// An event record that passed validation, minus the identity and timestamps
/// the store fills in at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub title: String,
    pub slug: String,
    pub description: String,
    pub overview: String,
    pub image: String,
    pub venue: String,
    pub location: String,
    pub date: String,
    pub time: String,
    pub mode: String,
    pub audience: String,
    pub agenda: Vec<String>,
    pub organizer: String,
    pub tags: Vec<String>,
}

impl NormalizedEvent {
    pub fn into_event(self, id: String, created_at: String, updated_at: String) -> Event {
        Event {
            id,
            title: self.title,
            slug: self.slug,
            description: self.description,
            overview: self.overview,
            image: self.image,
            venue: self.venue,
            location: self.location,
            date: self.date,
            time: self.time,
            mode: self.mode,
            audience: self.audience,
            agenda: self.agenda,
            organizer: self.organizer,
            tags: self.tags,
            created_at,
            updated_at,
        }
    }
}

/// Derives the URL identifier from a title: NFKD, diacritics stripped,
/// lowercased, runs of non-alphanumerics collapsed to a single `-`, no
/// leading/trailing `-`, at most 96 characters. Pure and idempotent.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
    {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(SLUG_MAX_LEN);
    // Truncation can land on a separator.
    slug.trim_end_matches('-').to_string()
}

/// Parses a free-form date string and returns the canonical RFC 3339 UTC
/// instant. Inputs without a time component become midnight UTC.
pub fn normalize_date(input: &str) -> Result<String, ValidationError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(ValidationError::InvalidDate(input.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(canonical_instant(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(canonical_instant(dt.with_timezone(&Utc)));
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%m/%d/%Y %H:%M",
        "%B %d, %Y %H:%M",
    ];
    for fmt in datetime_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(canonical_instant(naive.and_utc()));
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%m/%d/%y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%B %e, %Y",
        "%b %e, %Y",
        "%d %B %Y",
    ];
    for fmt in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(canonical_instant(date.and_time(NaiveTime::MIN).and_utc()));
        }
    }

    Err(ValidationError::InvalidDate(input.to_string()))
}

/// Converts a 24-hour (`H(H):mm[:ss]`) or 12-hour (`h[:mm] am/pm`) time to
/// canonical `HH:mm`. Minutes must always be two digits.
pub fn normalize_time(input: &str) -> Result<String, ValidationError> {
    let value = input.trim();

    if let Some(caps) = TIME_24H_RE.captures(value) {
        return Ok(format!("{:0>2}:{}", &caps[1], &caps[2]));
    }

    if let Some(caps) = TIME_12H_RE.captures(value) {
        let hour: u32 = caps[1]
            .parse()
            .map_err(|_| ValidationError::InvalidTime(input.to_string()))?;
        if !(1..=12).contains(&hour) {
            return Err(ValidationError::InvalidTime(input.to_string()));
        }
        let minute = caps.get(2).map_or("00", |m| m.as_str());
        let hour24 = (hour % 12) + if caps[3].eq_ignore_ascii_case("pm") { 12 } else { 0 };
        return Ok(format!("{hour24:02}:{minute}"));
    }

    Err(ValidationError::InvalidTime(input.to_string()))
}

/// Trims, lowercases, and checks the `local@domain.tld` shape.
pub fn normalize_email(input: &str) -> Result<String, ValidationError> {
    let email = input.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(ValidationError::InvalidEmail(input.to_string()))
    }
}

/// Validates and normalizes a candidate event immediately before commit.
///
/// Required fields are checked first, in a fixed order so the reported field
/// is deterministic. The slug is recomputed only when the title changed
/// relative to `previous` (or there is no previous record); a title rename
/// therefore changes the public URL.
pub fn normalize_event(
    draft: &EventDraft,
    previous: Option<&Event>,
) -> Result<NormalizedEvent, ValidationError> {
    let required_strings: [(&'static str, &str); 11] = [
        ("title", &draft.title),
        ("description", &draft.description),
        ("overview", &draft.overview),
        ("image", &draft.image),
        ("venue", &draft.venue),
        ("location", &draft.location),
        ("date", &draft.date),
        ("time", &draft.time),
        ("mode", &draft.mode),
        ("audience", &draft.audience),
        ("organizer", &draft.organizer),
    ];
    for (name, value) in required_strings {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(name));
        }
    }

    let required_lists: [(&'static str, &[String]); 2] =
        [("agenda", &draft.agenda), ("tags", &draft.tags)];
    for (name, items) in required_lists {
        if items.is_empty() || items.iter().any(|item| item.trim().is_empty()) {
            return Err(ValidationError::MissingField(name));
        }
    }

    let title = draft.title.trim().to_string();
    let slug = match previous {
        Some(prev) if prev.title == title && !prev.slug.is_empty() => prev.slug.clone(),
        _ => slugify(&title),
    };

    Ok(NormalizedEvent {
        title,
        slug,
        description: draft.description.trim().to_string(),
        overview: draft.overview.trim().to_string(),
        image: draft.image.trim().to_string(),
        venue: draft.venue.trim().to_string(),
        location: draft.location.trim().to_string(),
        date: normalize_date(&draft.date)?,
        time: normalize_time(&draft.time)?,
        mode: draft.mode.trim().to_string(),
        audience: draft.audience.trim().to_string(),
        agenda: draft.agenda.iter().map(|s| s.trim().to_string()).collect(),
        organizer: draft.organizer.trim().to_string(),
        tags: draft.tags.iter().map(|s| s.trim().to_string()).collect(),
    })
}

fn canonical_instant(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> EventDraft {
        EventDraft {
            title: "Boise Dev Meetup".to_string(),
            description: "Monthly meetup for developers".to_string(),
            overview: "Talks, pizza, and hallway track".to_string(),
            image: "/images/meetup.png".to_string(),
            venue: "JUMP".to_string(),
            location: "Boise, ID".to_string(),
            date: "2025-10-08".to_string(),
            time: "6:30 PM".to_string(),
            mode: "offline".to_string(),
            audience: "developers".to_string(),
            agenda: vec!["Doors".to_string(), "Lightning talks".to_string()],
            organizer: "Boise Dev".to_string(),
            tags: vec!["meetup".to_string(), "boise".to_string()],
        }
    }

    #[test]
    fn slug_strips_diacritics_and_collapses_punctuation() {
        assert_eq!(slugify("Café  2024!!"), "cafe-2024");
        assert_eq!(slugify("  Rust & Friends: Part II  "), "rust-friends-part-ii");
        assert_eq!(slugify("élan VITAL"), "elan-vital");
    }

    #[test]
    fn slug_is_idempotent_and_bounded() {
        let titles = ["Café  2024!!", "A---B", "Ünïcode Ēvent", "plain title"];
        for title in titles {
            let slug = slugify(title);
            assert_eq!(slugify(&slug), slug);
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        let long = "a".repeat(200);
        assert_eq!(slugify(&long).len(), 96);
    }

    #[test]
    fn slug_truncation_never_leaves_trailing_dash() {
        // 95 chars then a separator right at the cut point.
        let title = format!("{} b", "a".repeat(95));
        let slug = slugify(&title);
        assert!(slug.len() <= 96);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn normalizes_24_hour_times() {
        assert_eq!(normalize_time("09:30"), Ok("09:30".to_string()));
        assert_eq!(normalize_time("9:30"), Ok("09:30".to_string()));
        assert_eq!(normalize_time("23:59:59"), Ok("23:59".to_string()));
        assert_eq!(normalize_time("00:00"), Ok("00:00".to_string()));
    }

    #[test]
    fn normalizes_12_hour_times() {
        assert_eq!(normalize_time("2:30pm"), Ok("14:30".to_string()));
        assert_eq!(normalize_time("11:59 PM"), Ok("23:59".to_string()));
        assert_eq!(normalize_time("12:00 AM"), Ok("00:00".to_string()));
        assert_eq!(normalize_time("12 PM"), Ok("12:00".to_string()));
        assert_eq!(normalize_time("7 pm"), Ok("19:00".to_string()));
    }

    #[test]
    fn rejects_malformed_times() {
        for input in ["25:00", "9:5", "13:00 PM", "0:30 AM", "noonish", "12:60", ""] {
            assert_eq!(
                normalize_time(input),
                Err(ValidationError::InvalidTime(input.to_string())),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn normalizes_dates_to_utc_instants() {
        assert_eq!(
            normalize_date("2025-10-08"),
            Ok("2025-10-08T00:00:00.000Z".to_string())
        );
        assert_eq!(
            normalize_date("10/08/2025"),
            Ok("2025-10-08T00:00:00.000Z".to_string())
        );
        assert_eq!(
            normalize_date("October 8, 2025"),
            Ok("2025-10-08T00:00:00.000Z".to_string())
        );
        // Offsets are converted, not dropped.
        assert_eq!(
            normalize_date("2025-10-08T10:00:00+02:00"),
            Ok("2025-10-08T08:00:00.000Z".to_string())
        );
    }

    #[test]
    fn canonical_date_round_trips() {
        let canonical = normalize_date("March 1, 2026").expect("valid date");
        assert_eq!(normalize_date(&canonical), Ok(canonical.clone()));
    }

    #[test]
    fn rejects_unparseable_dates() {
        for input in ["not a date", "2025-13-40", "", "soon"] {
            assert_eq!(
                normalize_date(input),
                Err(ValidationError::InvalidDate(input.to_string()))
            );
        }
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  Dev@Example.COM "),
            Ok("dev@example.com".to_string())
        );
    }

    #[test]
    fn rejects_malformed_emails() {
        for input in ["nope", "a@b", "a @b.com", "a@b c.com", "@b.com", "a@.com x"] {
            assert!(normalize_email(input).is_err(), "expected {input:?} to be rejected");
        }
    }

    #[test]
    fn reports_first_missing_field_in_fixed_order() {
        let mut d = draft();
        d.title = "   ".to_string();
        d.venue = String::new();
        assert_eq!(
            normalize_event(&d, None),
            Err(ValidationError::MissingField("title"))
        );

        let mut d = draft();
        d.venue = String::new();
        assert_eq!(
            normalize_event(&d, None),
            Err(ValidationError::MissingField("venue"))
        );
    }

    #[test]
    fn rejects_empty_agenda_and_blank_tag_entries() {
        let mut d = draft();
        d.agenda.clear();
        assert_eq!(
            normalize_event(&d, None),
            Err(ValidationError::MissingField("agenda"))
        );

        let mut d = draft();
        d.tags = vec!["meetup".to_string(), "  ".to_string()];
        assert_eq!(
            normalize_event(&d, None),
            Err(ValidationError::MissingField("tags"))
        );
    }

    #[test]
    fn normalized_event_has_canonical_forms() {
        let normalized = normalize_event(&draft(), None).expect("valid draft");
        assert_eq!(normalized.slug, "boise-dev-meetup");
        assert_eq!(normalized.date, "2025-10-08T00:00:00.000Z");
        assert_eq!(normalized.time, "18:30");
    }

    #[test]
    fn slug_kept_when_title_unchanged() {
        let normalized = normalize_event(&draft(), None).expect("valid draft");
        let previous = normalized.into_event(
            "event-1".to_string(),
            "2025-01-01T00:00:00.000Z".to_string(),
            "2025-01-01T00:00:00.000Z".to_string(),
        );

        let again = normalize_event(&draft(), Some(&previous)).expect("valid draft");
        assert_eq!(again.slug, previous.slug);

        let mut renamed = draft();
        renamed.title = "Boise Dev Conf".to_string();
        let renamed = normalize_event(&renamed, Some(&previous)).expect("valid draft");
        assert_eq!(renamed.slug, "boise-dev-conf");
    }

    #[test]
    fn string_fields_are_trimmed() {
        let mut d = draft();
        d.location = "  Boise, ID ".to_string();
        d.agenda = vec![" Doors ".to_string()];
        let normalized = normalize_event(&d, None).expect("valid draft");
        assert_eq!(normalized.location, "Boise, ID");
        assert_eq!(normalized.agenda, vec!["Doors".to_string()]);
    }
}
