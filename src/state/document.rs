use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Writer id used for documents produced by the system itself.
pub const SYSTEM_WRITER: &str = "system";

pub type PoleId = String;
pub type BoardId = String;

/// The single shared aggregate every participant converges on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub signal_status: BTreeMap<PoleId, SignalColor>,
    pub time_zones: Vec<TimeZone>,
    pub priorities: BTreeMap<PoleId, Priority>,
    pub control_mode: ControlMode,
    pub ip_addresses: BTreeMap<BoardId, Ipv4Addr>,
    /// Milliseconds since the Unix epoch, set by whoever commits the write.
    pub last_updated: i64,
    pub last_updated_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Manual,
    Auto,
    Semi,
}

/// A timing plan active between `start_time` and `end_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeZone {
    pub id: u32,
    pub name: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    /// Order in which poles receive green within one cycle.
    pub route: Vec<PoleId>,
    pub timings: BTreeMap<PoleId, PoleTiming>,
}

/// Phase durations for one pole, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoleTiming {
    pub red: u32,
    pub yellow: u32,
    pub green_left: u32,
    pub green_straight: u32,
    pub green_right: u32,
}

impl PoleTiming {
    /// Full cycle length, saturating at `u32::MAX`.
    pub fn cycle_seconds(&self) -> u32 {
        [self.yellow, self.green_left, self.green_straight, self.green_right]
            .into_iter()
            .fold(self.red, u32::saturating_add)
    }
}

/// Rank (1 = first) of each green phase. Distinct ranks are a convention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    pub green_left: u8,
    pub green_straight: u8,
    pub green_right: u8,
}

/// Wall-clock time of day, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s, "%H:%M").map(Self)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A shallow edit: every present field replaces the whole field of the base document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_status: Option<BTreeMap<PoleId, SignalColor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zones: Option<Vec<TimeZone>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<BTreeMap<PoleId, Priority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<ControlMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addresses: Option<BTreeMap<BoardId, Ipv4Addr>>,
}

impl StatePatch {
    pub fn control_mode(mode: ControlMode) -> Self {
        Self {
            control_mode: Some(mode),
            ..Default::default()
        }
    }

    pub fn signal_status(status: BTreeMap<PoleId, SignalColor>) -> Self {
        Self {
            signal_status: Some(status),
            ..Default::default()
        }
    }

    pub fn time_zones(zones: Vec<TimeZone>) -> Self {
        Self {
            time_zones: Some(zones),
            ..Default::default()
        }
    }

    pub fn priorities(priorities: BTreeMap<PoleId, Priority>) -> Self {
        Self {
            priorities: Some(priorities),
            ..Default::default()
        }
    }

    pub fn ip_addresses(addresses: BTreeMap<BoardId, Ipv4Addr>) -> Self {
        Self {
            ip_addresses: Some(addresses),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signal_status.is_none()
            && self.time_zones.is_none()
            && self.priorities.is_none()
            && self.control_mode.is_none()
            && self.ip_addresses.is_none()
    }
}

impl StateDocument {
    /// Returns a copy of `self` with every field present in `patch` replaced.
    /// The stamp fields are left untouched.
    pub fn merged(&self, patch: StatePatch) -> Self {
        let mut next = self.clone();
        if let Some(status) = patch.signal_status {
            next.signal_status = status;
        }
        if let Some(zones) = patch.time_zones {
            next.time_zones = zones;
        }
        if let Some(priorities) = patch.priorities {
            next.priorities = priorities;
        }
        if let Some(mode) = patch.control_mode {
            next.control_mode = mode;
        }
        if let Some(addresses) = patch.ip_addresses {
            next.ip_addresses = addresses;
        }
        next
    }

    pub fn stamp(&mut self, writer: impl Into<String>, at_millis: i64) {
        self.last_updated = at_millis;
        self.last_updated_by = writer.into();
    }

    /// Wire names of every field a document must carry.
    pub const FIELDS: [&'static str; 7] = [
        "signalStatus",
        "timeZones",
        "priorities",
        "controlMode",
        "ipAddresses",
        "lastUpdated",
        "lastUpdatedBy",
    ];

    pub fn poles(&self) -> impl Iterator<Item = &PoleId> {
        self.signal_status.keys()
    }
}

const DEFAULT_POLES: [&str; 4] = ["pole1", "pole2", "pole3", "pole4"];

impl Default for StateDocument {
    fn default() -> Self {
        let poles = || DEFAULT_POLES.iter().map(|p| p.to_string());

        let timing = PoleTiming {
            red: 30,
            yellow: 3,
            green_left: 10,
            green_straight: 20,
            green_right: 10,
        };
        let priority = Priority {
            green_left: 2,
            green_straight: 1,
            green_right: 3,
        };

        let all_day = TimeZone {
            id: 1,
            name: "All day".to_string(),
            start_time: TimeOfDay::default(),
            end_time: TimeOfDay::new(23, 59).unwrap_or_default(),
            route: poles().collect(),
            timings: poles().map(|p| (p, timing)).collect(),
        };

        Self {
            signal_status: poles().map(|p| (p, SignalColor::Red)).collect(),
            time_zones: vec![all_day],
            priorities: poles().map(|p| (p, priority)).collect(),
            control_mode: ControlMode::Auto,
            ip_addresses: (1..=4u8)
                .map(|n| (format!("board{n}"), Ipv4Addr::new(192, 168, 1, 100 + n)))
                .collect(),
            last_updated: 0,
            last_updated_by: SYSTEM_WRITER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_has_fixed_poles() {
        let doc = StateDocument::default();
        let poles: Vec<_> = doc.poles().cloned().collect();
        assert_eq!(poles, DEFAULT_POLES);
        assert_eq!(doc.control_mode, ControlMode::Auto);
        assert_eq!(doc.last_updated_by, SYSTEM_WRITER);
        assert_eq!(doc.time_zones[0].timings.len(), 4);
        assert_eq!(doc.ip_addresses["board4"], Ipv4Addr::new(192, 168, 1, 104));
    }

    #[test]
    fn merge_replaces_only_present_fields() {
        let base = StateDocument::default();
        let merged = base.merged(StatePatch::control_mode(ControlMode::Manual));

        assert_eq!(merged.control_mode, ControlMode::Manual);
        assert_eq!(merged.signal_status, base.signal_status);
        assert_eq!(merged.time_zones, base.time_zones);
        assert_eq!(merged.last_updated, base.last_updated);
    }

    #[test]
    fn merge_replaces_whole_maps() {
        let base = StateDocument::default();
        let mut status = BTreeMap::new();
        status.insert("pole1".to_string(), SignalColor::Green);

        let merged = base.merged(StatePatch::signal_status(status));
        assert_eq!(merged.signal_status.len(), 1);
        assert_eq!(merged.signal_status["pole1"], SignalColor::Green);
    }

    #[test]
    fn json_shape_uses_camel_case() {
        let doc = StateDocument::default();
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["controlMode"], "auto");
        assert_eq!(value["signalStatus"]["pole1"], "red");
        assert_eq!(value["ipAddresses"]["board1"], "192.168.1.101");
        assert_eq!(value["timeZones"][0]["startTime"], "00:00");
        assert_eq!(value["timeZones"][0]["endTime"], "23:59");
        assert_eq!(value["timeZones"][0]["timings"]["pole2"]["greenStraight"], 20);
        assert_eq!(value["lastUpdatedBy"], "system");
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        assert!("07:05".parse::<TimeOfDay>().is_ok());
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert_eq!(TimeOfDay::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[test]
    fn unknown_color_is_a_shape_error() {
        let mut value = serde_json::to_value(StateDocument::default()).unwrap();
        value["signalStatus"]["pole1"] = serde_json::json!("blue");
        assert!(serde_json::from_value::<StateDocument>(value).is_err());
    }

    #[test]
    fn empty_patch() {
        assert!(StatePatch::default().is_empty());
        assert!(!StatePatch::control_mode(ControlMode::Semi).is_empty());
    }

    #[test]
    fn cycle_length() {
        let doc = StateDocument::default();
        assert_eq!(doc.time_zones[0].timings["pole1"].cycle_seconds(), 73);

        let long = PoleTiming {
            red: u32::MAX - 1,
            yellow: 5,
            green_left: 0,
            green_straight: 0,
            green_right: 0,
        };
        assert_eq!(long.cycle_seconds(), u32::MAX);
    }

    #[test]
    fn field_names_match_serialized_document() {
        let value = serde_json::to_value(StateDocument::default()).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        let mut fields = StateDocument::FIELDS.to_vec();
        keys.sort_unstable();
        fields.sort_unstable();
        assert_eq!(keys, fields);
    }
}
