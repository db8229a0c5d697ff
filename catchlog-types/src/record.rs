use crate::photo::Photo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Logical record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Trip,
    WeatherLog,
    FishCatch,
}

impl RecordType {
    /// All record types in migration order.
    pub const ALL: [RecordType; 3] = [RecordType::Trip, RecordType::WeatherLog, RecordType::FishCatch];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Trip => "trip",
            RecordType::WeatherLog => "weather_log",
            RecordType::FishCatch => "fish_catch",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ParseCandidateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trip" => Ok(RecordType::Trip),
            "weather_log" => Ok(RecordType::WeatherLog),
            "fish_catch" => Ok(RecordType::FishCatch),
            other => Err(ParseCandidateIdError(other.to_string())),
        }
    }
}

/// A user record. `owner_id` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub owner_id: String,
    pub record_type: RecordType,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(record_type: RecordType, id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            record_type,
            fields: Map::new(),
            photos: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_photo(mut self, photo: Photo) -> Self {
        self.photos.push(photo);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn candidate_id(&self) -> CandidateId {
        CandidateId::new(self.record_type, self.id.clone())
    }

    pub fn has_unencrypted_photos(&self) -> bool {
        self.photos.iter().any(|p| !p.is_encrypted())
    }
}

/// Stable identifier of a migration candidate: `<record_type>/<record_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId {
    pub record_type: RecordType,
    pub record_id: String,
}

impl CandidateId {
    pub fn new(record_type: RecordType, record_id: impl Into<String>) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.record_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid candidate id: {0}")]
pub struct ParseCandidateIdError(pub String);

impl FromStr for CandidateId {
    type Err = ParseCandidateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = s
            .split_once('/')
            .ok_or_else(|| ParseCandidateIdError(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseCandidateIdError(s.to_string()));
        }
        Ok(CandidateId::new(ty.parse()?, id))
    }
}

impl Serialize for CandidateId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CandidateId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
