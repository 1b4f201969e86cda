//! EPICS slow-control history
//!
//! Each EPICS event carries a ctime timestamp line followed by
//! `TAG VALUE [UNITS...]` lines. Every reading is kept, tagged with the
//! physics event number current when it was loaded, so a value can be
//! looked up "as of" any event.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

const CTIME_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// One EPICS reading
#[derive(Debug, Clone, PartialEq)]
pub struct EpicsEntry {
    pub tag: String,
    /// Value as written in the record
    pub text: String,
    /// Numeric value, when the text parses as a number
    pub value: Option<f64>,
    pub units: String,
    /// Unix seconds of the record timestamp (0 when missing)
    pub time: i64,
    /// Last physics event number when the record was loaded
    pub event: u32,
}

/// Tag → readings in load order
#[derive(Debug, Clone, Default)]
pub struct EpicsStore {
    entries: HashMap<String, Vec<EpicsEntry>>,
}

impl EpicsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one EPICS text record; returns the number of readings stored
    pub fn load(&mut self, text: &str, event: u32) -> usize {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut time = 0;
        let mut loaded = 0;

        let mut pending = None;
        if let Some(first) = lines.next() {
            match parse_ctime(first) {
                Some(t) => time = t,
                None => {
                    warn!(line = first, "EPICS record without timestamp");
                    pending = Some(first);
                }
            }
        }

        for line in pending.into_iter().chain(lines) {
            let mut fields = line.split_whitespace();
            let (Some(tag), Some(text)) = (fields.next(), fields.next()) else {
                debug!(line, "skipping EPICS line without value");
                continue;
            };
            let units = fields.collect::<Vec<_>>().join(" ");

            self.entries
                .entry(tag.to_string())
                .or_default()
                .push(EpicsEntry {
                    tag: tag.to_string(),
                    text: text.to_string(),
                    value: text.parse().ok(),
                    units,
                    time,
                    event,
                });
            loaded += 1;
        }

        loaded
    }

    /// Reading of `tag` as of `event`
    ///
    /// With no event the latest reading is returned. Otherwise readings are
    /// scanned in load order and one is accepted when it was loaded at or
    /// before `event` and not before the previously accepted one; the last
    /// accepted reading wins.
    pub fn entry(&self, tag: &str, event: Option<u32>) -> Option<&EpicsEntry> {
        let entries = self.entries.get(tag)?;
        let Some(n) = event else {
            return entries.last();
        };

        let mut accepted: Option<&EpicsEntry> = None;
        for e in entries {
            if e.event <= n && accepted.map_or(true, |a| e.event >= a.event) {
                accepted = Some(e);
            }
        }
        accepted
    }

    pub fn value(&self, tag: &str, event: Option<u32>) -> Option<f64> {
        self.entry(tag, event).and_then(|e| e.value)
    }

    pub fn time(&self, tag: &str, event: Option<u32>) -> Option<i64> {
        self.entry(tag, event).map(|e| e.time)
    }

    pub fn string(&self, tag: &str, event: Option<u32>) -> Option<&str> {
        self.entry(tag, event).map(|e| e.text.as_str())
    }

    pub fn is_loaded(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Number of readings stored for a tag
    pub fn history_len(&self, tag: &str) -> usize {
        self.entries.get(tag).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Parse a ctime timestamp ("Tue Jun  3 12:00:00 2003") as UTC unix seconds
fn parse_ctime(line: &str) -> Option<i64> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    // ctime pads single-digit days with a space
    let day = format!("{:0>2}", fields[2]);
    let normalized = format!(
        "{} {} {} {} {}",
        fields[0], fields[1], day, fields[3], fields[4]
    );
    NaiveDateTime::parse_from_str(&normalized, CTIME_FORMAT)
        .ok()
        .map(|t| t.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "Tue Jun 17 12:00:00 2003\n\
                          HALLA:p 1234.5 MeV\n\
                          IPM1H04A.XPOS -0.12 mm\n\
                          MBSY1C_energy ok\n";

    #[test]
    fn test_parse_ctime() {
        assert_eq!(parse_ctime("Tue Jun 17 12:00:00 2003"), Some(1_055_851_200));
        assert_eq!(parse_ctime("Tue Jun  3 12:00:00 2003"), Some(1_054_641_600));
        assert_eq!(parse_ctime("HALLA:p 1234.5"), None);
    }

    #[test]
    fn test_load_record() {
        let mut store = EpicsStore::new();
        assert_eq!(store.load(RECORD, 10), 3);

        assert!(store.is_loaded("HALLA:p"));
        assert!(!store.is_loaded("HALLB:p"));
        assert_eq!(store.value("HALLA:p", None), Some(1234.5));
        assert_eq!(store.time("HALLA:p", None), Some(1_055_851_200));
        assert_eq!(store.entry("HALLA:p", None).unwrap().units, "MeV");
        assert_eq!(store.value("IPM1H04A.XPOS", None), Some(-0.12));

        // non-numeric values are still retrievable as strings
        assert_eq!(store.value("MBSY1C_energy", None), None);
        assert_eq!(store.string("MBSY1C_energy", None), Some("ok"));
    }

    #[test]
    fn test_history_is_kept() {
        let mut store = EpicsStore::new();
        store.load("Tue Jun 17 12:00:00 2003\nHALLA:p 1.0\n", 10);
        store.load("Tue Jun 17 12:01:00 2003\nHALLA:p 2.0\n", 20);
        store.load("Tue Jun 17 12:02:00 2003\nHALLA:p 3.0\n", 30);

        assert_eq!(store.history_len("HALLA:p"), 3);
        assert_eq!(store.value("HALLA:p", None), Some(3.0));
        assert_eq!(store.value("HALLA:p", Some(25)), Some(2.0));
        assert_eq!(store.value("HALLA:p", Some(20)), Some(2.0));
        assert_eq!(store.value("HALLA:p", Some(10)), Some(1.0));
        assert_eq!(store.value("HALLA:p", Some(5)), None);
        assert_eq!(store.time("HALLA:p", Some(29)), Some(1_055_851_260));
    }

    #[test]
    fn test_lookup_precedence_out_of_order() {
        let mut store = EpicsStore::new();
        store.load("Tue Jun 17 12:00:00 2003\nX 1\n", 10);
        store.load("Tue Jun 17 12:01:00 2003\nX 2\n", 30);
        store.load("Tue Jun 17 12:02:00 2003\nX 3\n", 20);
        store.load("Tue Jun 17 12:03:00 2003\nX 4\n", 20);

        // 10 accepted, 30 is past the request, 20 >= 10 accepted,
        // second 20 >= 20 accepted and wins
        assert_eq!(store.value("X", Some(25)), Some(4.0));
        // 30 accepted, then 20 and 20 are older than the accepted entry
        assert_eq!(store.value("X", Some(35)), Some(2.0));
    }

    #[test]
    fn test_missing_timestamp() {
        let mut store = EpicsStore::new();
        assert_eq!(store.load("HALLA:p 5.5\n", 1), 1);
        assert_eq!(store.value("HALLA:p", None), Some(5.5));
        assert_eq!(store.time("HALLA:p", None), Some(0));
    }

    #[test]
    fn test_clear() {
        let mut store = EpicsStore::new();
        store.load(RECORD, 1);
        store.clear();
        assert!(!store.is_loaded("HALLA:p"));
    }
}
