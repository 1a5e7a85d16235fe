use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::sm2::ReviewState;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Card {
    pub deck: String,
    pub front: String,
    pub back: String,
    pub id: String,
    /// None until the card is graded for the first time.
    pub review: Option<ReviewState>,
}

pub fn expand_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

fn parse_optional_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() { None } else { s.parse().ok() }
}

fn parse_optional_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() { None } else { s.parse().ok() }
}

fn parse_optional_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }
}

fn get_field(record: &csv::StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").to_string()
}

pub fn load_csv(path: &Path) -> Result<Vec<Card>, String> {
    let default_deck = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;

    let mut cards = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| format!("CSV parse error in {}: {}", path.display(), e))?;

        let deck_raw = get_field(&record, 0);
        let deck = if deck_raw.trim().is_empty() {
            default_deck.clone()
        } else {
            deck_raw
        };

        let id_raw = get_field(&record, 3);
        let id = if id_raw.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id_raw
        };

        // Scheduling columns travel together: a card is either fresh
        // (all blank) or has a complete review state.
        let interval = parse_optional_u32(&get_field(&record, 4));
        let repetition = parse_optional_u32(&get_field(&record, 5));
        let ef = parse_optional_f64(&get_field(&record, 6));
        let due_at = parse_optional_datetime(&get_field(&record, 7));
        let review = match (interval, repetition, ef, due_at) {
            (Some(interval), Some(repetition), Some(ef), Some(due_at)) => Some(ReviewState {
                interval,
                repetition,
                ef,
                due_at,
            }),
            _ => None,
        };

        cards.push(Card {
            deck,
            front: get_field(&record, 1),
            back: get_field(&record, 2),
            id,
            review,
        });
    }
    Ok(cards)
}

pub fn save_csv(path: &Path, cards: &[Card]) -> Result<(), String> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;

    writer
        .write_record([
            "deck",
            "front",
            "back",
            "id",
            "interval",
            "repetition",
            "ef",
            "due_at",
        ])
        .map_err(|e| format!("write error: {e}"))?;

    for card in cards {
        let r = card.review.as_ref();
        writer
            .write_record([
                &card.deck,
                &card.front,
                &card.back,
                &card.id,
                &r.map_or(String::new(), |r| r.interval.to_string()),
                &r.map_or(String::new(), |r| r.repetition.to_string()),
                &r.map_or(String::new(), |r| format!("{:.4}", r.ef)),
                &r.map_or(String::new(), |r| r.due_at.to_rfc3339()),
            ])
            .map_err(|e| format!("write error: {e}"))?;
    }

    writer.flush().map_err(|e| format!("flush error: {e}"))?;
    Ok(())
}

pub fn discover_files(paths: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for p in paths {
        let path = PathBuf::from(p);
        if path.is_dir() {
            collect_csv_recursive(&path, &mut files);
        } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }
    files
}

fn collect_csv_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_csv_recursive(&path, files);
        } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    #[test]
    fn expand_newlines_works() {
        assert_eq!(expand_newlines("line1\\nline2"), "line1\nline2");
        assert_eq!(expand_newlines("no newlines"), "no newlines");
    }

    #[test]
    fn csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.csv");

        let due = Utc.with_ymd_and_hms(2025, 6, 15, 8, 30, 0).unwrap();
        let cards = vec![Card {
            deck: "math".to_string(),
            front: "What is 2+2?".to_string(),
            back: "4".to_string(),
            id: "test-id-1".to_string(),
            review: Some(ReviewState {
                interval: 6,
                repetition: 2,
                ef: 2.6,
                due_at: due,
            }),
        }];

        save_csv(&path, &cards).unwrap();
        let loaded = load_csv(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].deck, "math");
        assert_eq!(loaded[0].front, "What is 2+2?");
        assert_eq!(loaded[0].back, "4");
        assert_eq!(loaded[0].id, "test-id-1");
        let review = loaded[0].review.unwrap();
        assert_eq!(review.interval, 6);
        assert_eq!(review.repetition, 2);
        assert!((review.ef - 2.6).abs() < 1e-4);
        assert_eq!(review.due_at, due);
    }

    #[test]
    fn csv_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.csv");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "deck,front,back,id,interval,repetition,ef,due_at").unwrap();
            writeln!(f, ",What is Rust?,A language,,,,,").unwrap();
        }
        let cards = load_csv(&path).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].deck, "sparse");
        assert_eq!(cards[0].front, "What is Rust?");
        assert!(!cards[0].id.is_empty());
        assert!(cards[0].review.is_none());
    }

    #[test]
    fn csv_partial_review_state_treated_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "deck,front,back,id,interval,repetition,ef,due_at").unwrap();
            // interval present but the rest blank
            writeln!(f, "math,q,a,id-1,6,,,").unwrap();
        }
        let cards = load_csv(&path).unwrap();
        assert!(cards[0].review.is_none());
    }

    #[test]
    fn discover_files_works() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(dir.path().join("a.csv"), "").unwrap();
        std::fs::write(sub.join("b.csv"), "").unwrap();
        std::fs::write(dir.path().join("c.txt"), "").unwrap();

        let files = discover_files(&[dir.path().to_str().unwrap().to_string()]);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "csv"));
    }
}
