use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};

pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct CountdownFile {
    #[allow(dead_code)]
    pub version: u32,
    pub countdowns: Vec<Countdown>,
}

/// One user-created countdown. Immutable once created; deletion is the only
/// removal path.
#[derive(Debug, Clone)]
pub struct Countdown {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub target_utc: DateTime<Utc>,
    /// Informational only; never compared against the clock.
    pub created_utc: DateTime<Utc>,
}

pub fn load_countdown_file(path: &Path) -> Result<CountdownFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read countdown file {}", path.display()))?;
    parse_countdown_file_text(&content)
}

pub fn parse_countdown_file_text(content: &str) -> Result<CountdownFile> {
    let raw = serde_json::from_str::<CountdownFileDoc>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != STORE_FORMAT_VERSION {
        bail!(
            "unsupported countdown file version {}; expected version {STORE_FORMAT_VERSION}",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut countdowns = Vec::with_capacity(raw.countdowns.len());
    for entry in raw.countdowns {
        if !ids.insert(entry.id.clone()) {
            bail!("duplicate countdown id found: {}", entry.id);
        }
        if entry.title.trim().is_empty() {
            bail!("countdown '{}' must have a non-empty title", entry.id);
        }

        let target_utc = parse_instant(&entry.target_instant)
            .with_context(|| format!("countdown '{}' has a bad target_instant", entry.id))?;
        let created_utc = match entry.created_instant.as_deref() {
            Some(raw_created) => parse_instant(raw_created)
                .with_context(|| format!("countdown '{}' has a bad created_instant", entry.id))?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        countdowns.push(Countdown {
            id: entry.id,
            title: entry.title.trim().to_string(),
            description: entry
                .description
                .filter(|description| !description.trim().is_empty()),
            target_utc,
            created_utc,
        });
    }

    Ok(CountdownFile {
        version: raw.version,
        countdowns,
    })
}

pub fn save_countdown_file(path: &Path, countdowns: &[Countdown]) -> Result<()> {
    let mut serialized = Vec::with_capacity(countdowns.len());
    for countdown in countdowns {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::String(countdown.id.clone()));
        obj.insert("title".to_string(), Value::String(countdown.title.clone()));
        if let Some(description) = &countdown.description {
            obj.insert("description".to_string(), Value::String(description.clone()));
        }
        obj.insert(
            "target_instant".to_string(),
            Value::String(format_instant(countdown.target_utc)),
        );
        obj.insert(
            "created_instant".to_string(),
            Value::String(format_instant(countdown.created_utc)),
        );
        serialized.push(Value::Object(obj));
    }

    let payload = json!({
        "version": STORE_FORMAT_VERSION,
        "countdowns": serialized,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write countdown file {}", path.display()))?;
    Ok(())
}

/// Accepts any RFC 3339 instant and normalizes it onto the UTC timeline.
/// Naive local datetimes are rejected here on purpose; the GUI resolves
/// those against the local zone before anything reaches storage.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .map(|instant| instant.with_timezone(&Utc))
        .with_context(|| {
            format!("invalid instant '{input}', expected RFC 3339 like 2030-06-01T12:00:00Z")
        })
}

pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Deserialize)]
struct CountdownFileDoc {
    version: u32,
    countdowns: Vec<CountdownEntryDoc>,
}

#[derive(Debug, Deserialize)]
struct CountdownEntryDoc {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    target_instant: String,
    #[serde(default)]
    created_instant: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Asia::Tokyo;

    use super::*;

    #[test]
    fn parses_valid_countdown_file() {
        let json = r#"
{
  "version": 1,
  "countdowns": [
    {
      "id": "cd-1",
      "title": "Product launch",
      "description": "v2.0 ships",
      "target_instant": "2030-06-01T12:00:00Z",
      "created_instant": "2026-01-15T08:30:00Z"
    },
    {
      "id": "cd-2",
      "title": "Conference",
      "target_instant": "2031-03-10T09:00:00+02:00"
    }
  ]
}
"#;

        let file = parse_countdown_file_text(json).expect("valid file");
        assert_eq!(file.version, 1);
        assert_eq!(file.countdowns.len(), 2);
        assert_eq!(file.countdowns[0].title, "Product launch");
        assert_eq!(file.countdowns[0].description.as_deref(), Some("v2.0 ships"));
        assert!(file.countdowns[1].description.is_none());
        assert_eq!(file.countdowns[1].created_utc, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            file.countdowns[1].target_utc,
            Utc.with_ymd_and_hms(2031, 3, 10, 7, 0, 0).single().expect("instant")
        );
    }

    #[test]
    fn rejects_invalid_target_instant() {
        let json = r#"
{
  "version": 1,
  "countdowns": [
    {
      "id": "bad",
      "title": "Broken",
      "target_instant": "not-a-time"
    }
  ]
}
"#;
        let err = parse_countdown_file_text(json).expect_err("invalid instant should fail");
        assert!(err.to_string().contains("bad target_instant"));
    }

    #[test]
    fn rejects_naive_local_datetime_targets() {
        let json = r#"
{
  "version": 1,
  "countdowns": [
    {
      "id": "naive",
      "title": "No offset",
      "target_instant": "2030-06-01T12:00:00"
    }
  ]
}
"#;
        assert!(parse_countdown_file_text(json).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"
{
  "version": 1,
  "countdowns": [
    {
      "id": "dup",
      "title": "First",
      "target_instant": "2030-06-01T12:00:00Z"
    },
    {
      "id": "dup",
      "title": "Second",
      "target_instant": "2030-07-01T12:00:00Z"
    }
  ]
}
"#;
        let err = parse_countdown_file_text(json).expect_err("duplicate ids should fail");
        assert!(err.to_string().contains("duplicate countdown id"));
    }

    #[test]
    fn rejects_blank_title() {
        let json = r#"
{
  "version": 1,
  "countdowns": [
    {
      "id": "blank",
      "title": "   ",
      "target_instant": "2030-06-01T12:00:00Z"
    }
  ]
}
"#;
        let err = parse_countdown_file_text(json).expect_err("blank title should fail");
        assert!(err.to_string().contains("non-empty title"));
    }

    #[test]
    fn rejects_unknown_version() {
        let json = r#"{ "version": 2, "countdowns": [] }"#;
        let err = parse_countdown_file_text(json).expect_err("version 2 should fail");
        assert!(err.to_string().contains("unsupported countdown file version"));
    }

    #[test]
    fn malformed_json_reports_line_and_column() {
        let err = parse_countdown_file_text("{ not-json ").expect_err("garbage should fail");
        assert!(err.to_string().contains("invalid JSON at line"));
    }

    #[test]
    fn offset_instants_normalize_onto_the_utc_timeline() {
        let in_tokyo = Tokyo.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).single().expect("tokyo");
        let parsed = parse_instant("2030-01-01T09:00:00+09:00").expect("parse");
        assert_eq!(parsed, in_tokyo.with_timezone(&Utc));
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("utc")
        );
    }

    #[test]
    fn save_then_parse_preserves_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("countdowns.json");
        let countdowns = vec![Countdown {
            id: "cd-7".to_string(),
            title: "Round trip".to_string(),
            description: Some("still here".to_string()),
            target_utc: Utc.with_ymd_and_hms(2032, 5, 4, 3, 2, 1).single().expect("target"),
            created_utc: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).single().expect("created"),
        }];

        save_countdown_file(&path, &countdowns).expect("save");
        let reloaded = load_countdown_file(&path).expect("load");
        assert_eq!(reloaded.countdowns.len(), 1);
        assert_eq!(reloaded.countdowns[0].id, "cd-7");
        assert_eq!(reloaded.countdowns[0].target_utc, countdowns[0].target_utc);
        assert_eq!(reloaded.countdowns[0].description.as_deref(), Some("still here"));
    }
}
