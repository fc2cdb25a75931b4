// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compiled-in routes applied to every record, regardless of what the producer
//! declared.

use lazy_static::lazy_static;
use regex::Regex;

use crate::fields::{get_str, str_eq, FieldMap, FieldValue};
use crate::route::{Route, DEFAULT_VALUE_FIELD};

const COUNTER: &str = "counter";
const GAUGE: &str = "gauge";
const EVENT: &str = "event";

const ALLOWED_LIFECYCLE_EVENTS: [&str; 7] = [
    "app_deploying",
    "app_scaling",
    "app_rollback",
    "app_stopping",
    "app_restarting",
    "app_canary",
    "app_canaryscaling",
];

const MONGO_DIMENSIONS: [&str; 4] = ["hostname", "operation", "namespace", "is_collscan"];

lazy_static! {
    static ref MONGO_SLOW_QUERY_REGEX: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^\[conn\d+\]\s([a-z]+)\s([^\s]+?)\s.*\s(\d+)ms$")
            .expect("failed creating regex")
    };
}

type RuleFn = fn(&mut FieldMap) -> Vec<Route>;

/// Evaluation order of the global rules.
const RULES: [RuleFn; 10] = [
    process_metrics,
    rsyslog_rate_limit,
    gearman,
    gearcmd_passfail,
    gearcmd_duration,
    gearcmd_heartbeat,
    wag_circuit_breakers,
    app_lifecycle,
    mongo_slow_queries,
    rds_slow_queries,
];

/// Routes contributed by the global rules, in evaluation order.
pub fn global_routes(fields: &mut FieldMap) -> Vec<Route> {
    RULES.iter().flat_map(|rule| rule(fields)).collect()
}

/// Metrics emitted by the node and go process-metrics libraries.
fn process_metrics(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "via", "process-metrics") || get_str(fields, "source").is_none() {
        return Vec::new();
    }
    let (Some(title), Some(stat_type)) = (get_str(fields, "title"), get_str(fields, "type"))
    else {
        return Vec::new();
    };
    // the libraries have shipped with this misspelling
    let stat_type = if stat_type == "guage" { GAUGE } else { stat_type };

    vec![Route::new(
        format!("process-metrics.{title}"),
        &["Hostname", "env", "source"],
        stat_type,
        DEFAULT_VALUE_FIELD,
        "global-process-metrics",
    )]
}

fn rsyslog_rate_limit(fields: &mut FieldMap) -> Vec<Route> {
    let program_matches = get_str(fields, "programname").is_some_and(|p| p.contains("rsyslog"));
    let log_matches = get_str(fields, "rawlog")
        .is_some_and(|l| l.contains("imuxsock begins to drop messages"));
    if !(program_matches && log_matches) {
        return Vec::new();
    }
    vec![Route::new(
        "rsyslog.rate-limit-triggered",
        &["Hostname", "env"],
        COUNTER,
        DEFAULT_VALUE_FIELD,
        "global-rsyslog-rate-limit",
    )]
}

fn gearman(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "source", "gearman") || !str_eq(fields, "env", "production") {
        return Vec::new();
    }
    let Some(title) = get_str(fields, "title").filter(|t| *t == "success" || *t == "failure")
    else {
        return Vec::new();
    };
    vec![Route::new(
        format!("gearman.{title}"),
        &["Hostname", "function"],
        COUNTER,
        DEFAULT_VALUE_FIELD,
        "global-gearman",
    )]
}

fn gearcmd_passfail(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "source", "gearcmd")
        || !str_eq(fields, "title", "END")
        || !str_eq(fields, "env", "production")
    {
        return Vec::new();
    }
    vec![Route::new(
        "gearcmd.passfail",
        &["Hostname", "function"],
        GAUGE,
        DEFAULT_VALUE_FIELD,
        "global-gearcmd-passfail",
    )]
}

fn gearcmd_duration(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "source", "gearcmd") || !str_eq(fields, "title", "duration") {
        return Vec::new();
    }
    vec![Route::new(
        "gearcmd.duration",
        &["Hostname", "function", "env"],
        GAUGE,
        DEFAULT_VALUE_FIELD,
        "global-gearcmd-duration",
    )]
}

fn gearcmd_heartbeat(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "source", "gearcmd") || !str_eq(fields, "title", "heartbeat") {
        return Vec::new();
    }
    vec![Route::new(
        "gearcmd.heartbeat",
        &["Hostname", "env", "function", "job_id", "try_number", "unit"],
        GAUGE,
        DEFAULT_VALUE_FIELD,
        "global-gearcmd-heartbeat",
    )]
}

fn wag_circuit_breakers(fields: &mut FieldMap) -> Vec<Route> {
    let from_wag_client = get_str(fields, "source").is_some_and(|s| s.contains("wagclient"));
    if !from_wag_client || !fields.contains_key("errorPercentage") {
        return Vec::new();
    }
    vec![Route::new(
        "wag.client-circuit-breakers",
        &["container_env", "container_app", "title"],
        GAUGE,
        "errorPercentage",
        "global-wag-circuit-breakers",
    )]
}

fn app_lifecycle(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "category", "app_lifecycle") {
        return Vec::new();
    }
    let allowed =
        get_str(fields, "title").is_some_and(|t| ALLOWED_LIFECYCLE_EVENTS.contains(&t));
    if !allowed {
        return Vec::new();
    }
    vec![Route::new(
        "app_lifecycle",
        &[
            "container_app",
            "container_env",
            "launched_scope",
            "title",
            "user",
            "version",
            "team",
        ],
        EVENT,
        "",
        "global-app-lifecycle",
    )]
}

/// Slow query lines logged by mongod. Writes `operation`, `namespace`,
/// `is_collscan` and `millis` into the record when the line matches.
fn mongo_slow_queries(fields: &mut FieldMap) -> Vec<Route> {
    let Some((operation, namespace, is_collscan, millis)) =
        get_str(fields, "rawlog").and_then(parse_mongo_slow_query)
    else {
        return Vec::new();
    };

    fields.insert("operation".to_string(), FieldValue::from(operation));
    fields.insert("namespace".to_string(), FieldValue::from(namespace));
    fields.insert("is_collscan".to_string(), FieldValue::from(is_collscan));
    fields.insert("millis".to_string(), FieldValue::from(millis));

    vec![
        Route::new(
            "mongo.slow-query",
            &MONGO_DIMENSIONS,
            COUNTER,
            "",
            "global-mongo-slow-query-count",
        ),
        Route::new(
            "mongo.slow-query-millis",
            &MONGO_DIMENSIONS,
            GAUGE,
            "millis",
            "global-mongo-slow-query-gauge",
        ),
    ]
}

fn parse_mongo_slow_query(rawlog: &str) -> Option<(String, String, bool, f64)> {
    let captures = MONGO_SLOW_QUERY_REGEX.captures(rawlog)?;
    let millis = captures.get(3)?.as_str().parse::<f64>().ok()?;
    Some((
        captures.get(1)?.as_str().to_string(),
        captures.get(2)?.as_str().to_string(),
        rawlog.contains("COLLSCAN"),
        millis,
    ))
}

fn rds_slow_queries(fields: &mut FieldMap) -> Vec<Route> {
    if !str_eq(fields, "hostname", "aws-rds") {
        return Vec::new();
    }
    // rdsadmin's own maintenance queries
    let Some(_user) = get_str(fields, "user").filter(|u| *u != "rdsadmin[rdsadmin]") else {
        return Vec::new();
    };
    vec![Route::new(
        "rds.slow-query",
        &["env", "programname"],
        COUNTER,
        DEFAULT_VALUE_FIELD,
        "global-rds-slow-query-count",
    )]
}
