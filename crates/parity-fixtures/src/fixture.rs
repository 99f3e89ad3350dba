use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SUITE_PREFIX: &str = "lambda-test-suite";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Runtime tag a fixture's handler is written for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Runtime {
    NodeJs,
    NodeJs43,
    Python27,
    Java8,
    Other(String),
}

impl Runtime {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "nodejs" => Self::NodeJs,
            "nodejs4.3" => Self::NodeJs43,
            "python2.7" => Self::Python27,
            "java8" => Self::Java8,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeJs => "nodejs",
            Self::NodeJs43 => "nodejs4.3",
            Self::Python27 => "python2.7",
            Self::Java8 => "java8",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Runtime tag with dots replaced so it can be embedded in function names.
    pub fn normalized(&self) -> String {
        self.as_str().replace('.', "_")
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Runtime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// On-disk shape of a `lambda.test` fixture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFile {
    pub handler: String,
    pub name: String,
    pub runtime: Runtime,
    #[serde(default)]
    pub event: Map<String, Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timeout: Option<i64>,
}

/// A loaded, immutable test case.
#[derive(Debug, Clone, PartialEq)]
pub struct TestFixture {
    pub handler: String,
    pub raw_name: String,
    pub runtime: Runtime,
    pub derived_name: String,
    pub event: Map<String, Value>,
    /// Informational only; never compared.
    pub description: String,
    pub timeout_seconds: u64,
    pub source: PathBuf,
}

impl TestFixture {
    pub fn from_file(file: FixtureFile, suite_prefix: &str, source: PathBuf) -> Self {
        let derived_name = derive_fixture_name(suite_prefix, &file.runtime, &file.name);
        Self {
            handler: file.handler,
            raw_name: file.name,
            runtime: file.runtime,
            derived_name,
            event: file.event,
            description: file.description,
            timeout_seconds: clamp_timeout_seconds(file.timeout),
            source,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// JSON payload delivered to both backends.
    pub fn payload(&self) -> String {
        Value::Object(self.event.clone()).to_string()
    }
}

/// Builds `<prefix>-<runtime_with_underscores>-<name>`.
pub fn derive_fixture_name(suite_prefix: &str, runtime: &Runtime, name: &str) -> String {
    format!("{suite_prefix}-{}-{name}", runtime.normalized())
}

/// Absent or zero timeouts take the default; everything else is clamped.
pub fn clamp_timeout_seconds(raw: Option<i64>) -> u64 {
    match raw {
        None | Some(0) => DEFAULT_TIMEOUT_SECONDS,
        Some(value) if value < MIN_TIMEOUT_SECONDS as i64 => MIN_TIMEOUT_SECONDS,
        Some(value) => (value as u64).min(MAX_TIMEOUT_SECONDS),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        clamp_timeout_seconds, derive_fixture_name, FixtureFile, Runtime, TestFixture,
        DEFAULT_SUITE_PREFIX,
    };
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn unit_timeout_clamping_applies_default_floor_and_cap() {
        let clamped: Vec<u64> = [Some(0), Some(-5), Some(45), Some(1000)]
            .into_iter()
            .map(clamp_timeout_seconds)
            .collect();
        assert_eq!(clamped, vec![30, 1, 45, 300]);
        assert_eq!(clamp_timeout_seconds(None), 30);
        assert_eq!(clamp_timeout_seconds(Some(1)), 1);
        assert_eq!(clamp_timeout_seconds(Some(300)), 300);
    }

    #[test]
    fn unit_derived_name_replaces_runtime_dots() {
        assert_eq!(
            derive_fixture_name(DEFAULT_SUITE_PREFIX, &Runtime::Python27, "hello"),
            "lambda-test-suite-python2_7-hello"
        );
        assert_eq!(
            derive_fixture_name("suite", &Runtime::NodeJs, "ctx"),
            "suite-nodejs-ctx"
        );
    }

    #[test]
    fn unit_runtime_round_trips_known_and_unknown_tags() {
        assert_eq!(Runtime::parse("java8"), Runtime::Java8);
        assert_eq!(Runtime::parse("nodejs4.3").normalized(), "nodejs4_3");
        let other = Runtime::parse("go1.x");
        assert_eq!(other, Runtime::Other("go1.x".to_string()));
        assert_eq!(other.to_string(), "go1.x");
    }

    #[test]
    fn functional_fixture_file_parses_with_optional_fields() {
        let file: FixtureFile = serde_json::from_value(json!({
            "handler": "test.run",
            "name": "test-context",
            "runtime": "nodejs",
            "event": {"a": 1}
        }))
        .expect("fixture file should parse");
        let fixture = TestFixture::from_file(
            file,
            DEFAULT_SUITE_PREFIX,
            PathBuf::from("node/test-context/lambda.test"),
        );

        assert_eq!(fixture.derived_name, "lambda-test-suite-nodejs-test-context");
        assert_eq!(fixture.timeout_seconds, 30);
        assert_eq!(fixture.description, "");
        assert_eq!(fixture.payload(), r#"{"a":1}"#);
    }
}
