use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::classify::DEFAULT_BYTES_PER_NODE;
use crate::error::{EditorError, Result};
use crate::util::{ensure_exists, parse_duration_value};

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub values: BTreeMap<String, String>,
}

impl Profile {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|raw| raw.trim().parse::<u32>().ok())
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|raw| raw.trim().parse::<i64>().ok())
    }

    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }

    fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
        self.get(key).map(parse_duration_value).transpose()
    }
}

const LOCAL: &str = include_str!("../profiles/local.env");
const READONLY_DEMO: &str = include_str!("../profiles/readonly-demo.env");

const BUILTIN_PROFILES: [(&str, &str); 2] = [("local", LOCAL), ("readonly-demo", READONLY_DEMO)];

pub const DEFAULT_PROFILE: &str = "local";

#[must_use]
pub fn list_profile_names() -> Vec<String> {
    BUILTIN_PROFILES
        .iter()
        .map(|(name, _)| (*name).to_string())
        .collect()
}

pub fn load_profile(name: &str) -> Result<Profile> {
    let (_, content) = BUILTIN_PROFILES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .ok_or_else(|| EditorError::ProfileNotFound {
            name: name.to_string(),
        })?;

    Ok(Profile {
        name: name.to_string(),
        values: parse_profile_content(content),
    })
}

pub fn load_profile_file(path: &Path) -> Result<Profile> {
    ensure_exists(path)?;
    let content = fs::read_to_string(path)?;
    Ok(Profile {
        name: path.display().to_string(),
        values: parse_profile_content(&content),
    })
}

#[must_use]
pub fn parse_profile_content(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim().to_string();
        let mut value = value_raw.trim().to_string();

        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].to_string();
        }

        values.insert(key, value);
    }

    values
}

/// Client-side knobs. Server capabilities arrive separately from `config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub profile: String,
    pub api_url: String,
    pub remote_control_url: String,
    pub bytes_per_node: i64,
    /// Viewport settles below this zoom skip the border fetch.
    pub min_fetch_zoom: f64,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Extra attempts for read-only requests after a transport failure.
    pub retries: u32,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            api_url: "http://127.0.0.1:5000".to_string(),
            remote_control_url: "http://127.0.0.1:8111".to_string(),
            bytes_per_node: DEFAULT_BYTES_PER_NODE,
            min_fetch_zoom: 0.0,
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

impl Settings {
    /// Layers a profile over the defaults; unknown keys are ignored.
    pub fn from_profile(profile: &Profile) -> Result<Self> {
        let defaults = Self::default();
        let bytes_per_node = profile
            .get_i64("bytes_per_node")
            .unwrap_or(defaults.bytes_per_node);
        if bytes_per_node <= 0 {
            return Err(EditorError::invalid(format!(
                "bytes_per_node must be positive in profile {}",
                profile.name
            )));
        }

        Ok(Self {
            profile: profile.name.clone(),
            api_url: profile
                .get("api_url")
                .map_or(defaults.api_url, str::to_string),
            remote_control_url: profile
                .get("remote_control_url")
                .map_or(defaults.remote_control_url, str::to_string),
            bytes_per_node,
            min_fetch_zoom: profile
                .get_f64("min_fetch_zoom")
                .unwrap_or(defaults.min_fetch_zoom),
            connect_timeout: profile
                .get_duration("connect_timeout")?
                .unwrap_or(defaults.connect_timeout),
            request_timeout: profile
                .get_duration("request_timeout")?
                .unwrap_or(defaults.request_timeout),
            retries: profile.get_u32("retries").unwrap_or(defaults.retries),
        })
    }

    /// Resolves `--settings <file>` first, then the named built-in profile.
    pub fn resolve(profile_name: &str, settings_file: Option<&Path>) -> Result<Self> {
        let profile = match settings_file {
            Some(path) => load_profile_file(path)?,
            None => load_profile(profile_name)?,
        };
        Self::from_profile(&profile)
    }
}
