// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a raw log line into a [`FieldMap`].
//!
//! Understands syslog lines of the form
//! `<rfc3339 timestamp> <hostname> <programname>[<pid>]: <body>`, whose body
//! may be a JSON object, and bare JSON object lines.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::RecordError;
use crate::fields::{FieldMap, FieldValue, TIMESTAMP_FIELD};

lazy_static! {
    static ref SYSLOG_REGEX: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(\S+) (\S+) ([^\s\[:]+)(?:\[\d+\])?: ?(.*)$").expect("failed creating regex")
    };
    static ref CONTAINER_PROGRAM_REGEX: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(.+?)--([^/]+)/(.+)$").expect("failed creating regex")
    };
}

pub trait FieldExtractor: Send + Sync {
    fn extract(&self, raw: &[u8]) -> Result<FieldMap, RecordError>;
}

#[derive(Debug, Clone)]
pub struct LogLineExtractor {
    deploy_env: String,
}

impl LogLineExtractor {
    pub fn new(deploy_env: impl Into<String>) -> Self {
        Self {
            deploy_env: deploy_env.into(),
        }
    }
}

impl FieldExtractor for LogLineExtractor {
    fn extract(&self, raw: &[u8]) -> Result<FieldMap, RecordError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| RecordError::Decode(format!("record is not valid UTF-8: {e}")))?
            .trim_end_matches(['\r', '\n']);

        let mut fields = FieldMap::new();
        let body = match syslog_prefix(line) {
            Some((prefix, body)) => {
                fields.extend(prefix);
                body
            }
            None => line,
        };

        match json_object(body) {
            Some(object) => fields.extend(object),
            None if fields.is_empty() => {
                return Err(RecordError::Decode(
                    "record is neither a syslog line nor a JSON object".to_string(),
                ));
            }
            None => {}
        }

        fields
            .entry("env".to_string())
            .or_insert_with(|| FieldValue::from(self.deploy_env.as_str()));
        Ok(fields)
    }
}

fn syslog_prefix(line: &str) -> Option<(FieldMap, &str)> {
    let captures = SYSLOG_REGEX.captures(line)?;
    let timestamp = parse_timestamp(captures.get(1)?.as_str())?;
    let hostname = captures.get(2)?.as_str();
    let programname = captures.get(3)?.as_str();
    let body = captures.get(4)?.as_str();

    let mut fields = FieldMap::new();
    fields.insert(TIMESTAMP_FIELD.to_string(), FieldValue::from(timestamp));
    fields.insert("hostname".to_string(), FieldValue::from(hostname));
    fields.insert("programname".to_string(), FieldValue::from(programname));
    fields.insert("rawlog".to_string(), FieldValue::from(body));

    if let Some(container) = CONTAINER_PROGRAM_REGEX.captures(programname) {
        for (index, name) in [(1, "container_env"), (2, "container_app"), (3, "container_task")] {
            if let Some(m) = container.get(index) {
                fields.insert(name.to_string(), FieldValue::from(m.as_str()));
            }
        }
    }
    Some((fields, body))
}

fn json_object(body: &str) -> Option<FieldMap> {
    let body = body.trim();
    if !body.starts_with('{') {
        return None;
    }
    let serde_json::Value::Object(object) = serde_json::from_str::<serde_json::Value>(body).ok()?
    else {
        return None;
    };
    Some(
        object
            .into_iter()
            .map(|(key, value)| {
                let value = match (key.as_str(), value) {
                    (TIMESTAMP_FIELD, serde_json::Value::String(s)) => parse_timestamp(&s)
                        .map_or(FieldValue::String(s), FieldValue::Timestamp),
                    (_, value) => FieldValue::from_json(value),
                };
                (key, value)
            })
            .collect(),
    )
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
