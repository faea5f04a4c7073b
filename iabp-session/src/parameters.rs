use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};

/// Balloon inflation ratio relative to cardiac cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssistRatio {
    #[default]
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:2")]
    OneToTwo,
    #[serde(rename = "1:3")]
    OneToThree,
}

impl AssistRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistRatio::OneToOne => "1:1",
            AssistRatio::OneToTwo => "1:2",
            AssistRatio::OneToThree => "1:3",
        }
    }
}

impl fmt::Display for AssistRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssistRatio {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1:1" => Ok(AssistRatio::OneToOne),
            "1:2" => Ok(AssistRatio::OneToTwo),
            "1:3" => Ok(AssistRatio::OneToThree),
            other => Err(SessionError::InvalidParameter {
                field: "assistRatio".to_string(),
                reason: format!("expected one of 1:1, 1:2, 1:3, got '{}'", other),
            }),
        }
    }
}

/// Clinical values shown on the IABP monitor.
///
/// Values are kept as entered so a partially read monitor can still be
/// analyzed; an empty string means "not visible / not provided".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParameters {
    pub heart_rate: String,
    pub systolic: String,
    pub diastolic: String,
    pub map: String,
    pub pdap: String,
    pub baedp: String,
    pub paedp: String,
    pub assist_ratio: AssistRatio,
    pub balloon_volume: String,
    pub timing: String,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            heart_rate: String::new(),
            systolic: String::new(),
            diastolic: String::new(),
            map: String::new(),
            pdap: String::new(),
            baedp: String::new(),
            paedp: String::new(),
            assist_ratio: AssistRatio::OneToOne,
            balloon_volume: "40".to_string(),
            timing: String::new(),
        }
    }
}

/// Partial update submitted from the parameters form. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterUpdate {
    pub heart_rate: Option<String>,
    pub systolic: Option<String>,
    pub diastolic: Option<String>,
    pub map: Option<String>,
    pub pdap: Option<String>,
    pub baedp: Option<String>,
    pub paedp: Option<String>,
    pub assist_ratio: Option<AssistRatio>,
    pub balloon_volume: Option<String>,
    pub timing: Option<String>,
}

impl SessionParameters {
    pub const KEYS: [&'static str; 10] = [
        "heartRate",
        "systolic",
        "diastolic",
        "map",
        "pdap",
        "baedp",
        "paedp",
        "assistRatio",
        "balloonVolume",
        "timing",
    ];

    pub fn apply(&mut self, update: ParameterUpdate) {
        let ParameterUpdate {
            heart_rate,
            systolic,
            diastolic,
            map,
            pdap,
            baedp,
            paedp,
            assist_ratio,
            balloon_volume,
            timing,
        } = update;

        let assign = |slot: &mut String, value: Option<String>| {
            if let Some(value) = value {
                *slot = value.trim().to_string();
            }
        };
        assign(&mut self.heart_rate, heart_rate);
        assign(&mut self.systolic, systolic);
        assign(&mut self.diastolic, diastolic);
        assign(&mut self.map, map);
        assign(&mut self.pdap, pdap);
        assign(&mut self.baedp, baedp);
        assign(&mut self.paedp, paedp);
        assign(&mut self.balloon_volume, balloon_volume);
        assign(&mut self.timing, timing);
        if let Some(ratio) = assist_ratio {
            self.assist_ratio = ratio;
        }
    }

    /// Merge values read from the monitor image. Only known keys with a
    /// non-empty value overwrite the current ones; returns the keys that changed.
    pub fn merge_extracted(&mut self, extracted: &Map<String, Value>) -> Vec<String> {
        let mut updated = Vec::new();

        for key in Self::KEYS {
            let Some(text) = extracted.get(key).and_then(value_as_text) else {
                continue;
            };

            if key == "assistRatio" {
                match text.parse::<AssistRatio>() {
                    Ok(ratio) => self.assist_ratio = ratio,
                    Err(e) => {
                        warn!("Ignoring extracted assist ratio: {}", e);
                        continue;
                    }
                }
            } else if let Some(slot) = self.field_mut(key) {
                *slot = text;
            }
            updated.push(key.to_string());
        }

        debug!("Merged {} extracted parameters", updated.len());
        updated
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            "heartRate" => Some(&mut self.heart_rate),
            "systolic" => Some(&mut self.systolic),
            "diastolic" => Some(&mut self.diastolic),
            "map" => Some(&mut self.map),
            "pdap" => Some(&mut self.pdap),
            "baedp" => Some(&mut self.baedp),
            "paedp" => Some(&mut self.paedp),
            "balloonVolume" => Some(&mut self.balloon_volume),
            "timing" => Some(&mut self.timing),
            _ => None,
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Text form of an extracted value, or None for blank values (null, "", 0, false).
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}
