use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Wall-clock format used by terminals and by the receiving API.
pub const PUNCH_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One clock-in/clock-out event read from the terminal.
///
/// Serializes to a flat JSON object: `uid`, `timestamp`, `type`, followed by
/// any extra fields the terminal reported, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "uid")]
    pub subject_id: String,
    #[serde(with = "punch_time")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "type")]
    pub event_type: PunchType,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AttendanceRecord {
    pub fn new<S: Into<String>>(subject_id: S, timestamp: NaiveDateTime, event_type: PunchType) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
            event_type,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_within(&self, start: NaiveDateTime, end: Option<NaiveDateTime>) -> bool {
        self.timestamp >= start && end.map_or(true, |end| self.timestamp <= end)
    }
}

/// Punch codes as reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PunchType {
    CheckIn,
    CheckOut,
    BreakOut,
    BreakIn,
    OvertimeIn,
    OvertimeOut,
    Other(u8),
}

impl From<u8> for PunchType {
    fn from(code: u8) -> Self {
        match code {
            0 => PunchType::CheckIn,
            1 => PunchType::CheckOut,
            2 => PunchType::BreakOut,
            3 => PunchType::BreakIn,
            4 => PunchType::OvertimeIn,
            5 => PunchType::OvertimeOut,
            other => PunchType::Other(other),
        }
    }
}

impl From<PunchType> for u8 {
    fn from(punch: PunchType) -> Self {
        match punch {
            PunchType::CheckIn => 0,
            PunchType::CheckOut => 1,
            PunchType::BreakOut => 2,
            PunchType::BreakIn => 3,
            PunchType::OvertimeIn => 4,
            PunchType::OvertimeOut => 5,
            PunchType::Other(code) => code,
        }
    }
}

impl std::str::FromStr for PunchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" | "check in" | "check-in" => Ok(PunchType::CheckIn),
            "out" | "check out" | "check-out" => Ok(PunchType::CheckOut),
            "break out" | "break-out" => Ok(PunchType::BreakOut),
            "break in" | "break-in" => Ok(PunchType::BreakIn),
            "overtime in" | "overtime-in" => Ok(PunchType::OvertimeIn),
            "overtime out" | "overtime-out" => Ok(PunchType::OvertimeOut),
            other => other
                .parse::<u8>()
                .map(PunchType::from)
                .map_err(|_| format!("Invalid punch type: {s}")),
        }
    }
}

pub(crate) mod punch_time {
    use super::PUNCH_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(PUNCH_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, PUNCH_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
