//! Mapping between [`Job`] and the stored item schema.
//!
//! | attribute    | type | notes                     |
//! |--------------|------|---------------------------|
//! | `job_id`     | S    | partition key             |
//! | `status`     | S    | `open` or `complete`      |
//! | `prompt`     | S    | the append-only job log   |
//! | `updated_at` | S    | RFC 3339 timestamp        |
//! | `iterations` | N    | applied iteration count   |
//! | `context`    | M    | structured initial context|

use super::StoreError;
use super::attribute::{AttributeValue, Item, from_attribute, to_attribute};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use sleuth_proto::{Job, JobStatus};

pub const JOB_ID: &str = "job_id";
pub const STATUS: &str = "status";
pub const LOG: &str = "prompt";
pub const UPDATED_AT: &str = "updated_at";
pub const ITERATIONS: &str = "iterations";
pub const CONTEXT: &str = "context";

pub fn job_to_item(job: &Job) -> Result<Item, StoreError> {
    let mut item = Item::new();
    item.insert(JOB_ID.into(), job.job_id.as_str().into());
    item.insert(STATUS.into(), job.status.as_str().into());
    item.insert(LOG.into(), job.log.as_str().into());
    item.insert(UPDATED_AT.into(), job.updated_at.to_rfc3339().into());
    item.insert(ITERATIONS.into(), job.iterations.into());
    if !job.context.is_empty() {
        let context = serde_json::Value::Object(job.context.clone());
        item.insert(CONTEXT.into(), to_attribute(&context)?);
    }
    Ok(item)
}

pub fn job_from_item(item: &Item) -> Result<Job, StoreError> {
    let job_id = required_s(item, JOB_ID, "?")?;
    let malformed = |reason: String| StoreError::Malformed {
        job_id: job_id.to_string(),
        reason,
    };

    let status = required_s(item, STATUS, job_id)?
        .parse::<JobStatus>()
        .map_err(malformed)?;
    // Older records may lack everything but the key, status and log.
    let log = item.get(LOG).and_then(AttributeValue::as_s).unwrap_or_default();
    let updated_at = match item.get(UPDATED_AT).and_then(AttributeValue::as_s) {
        Some(raw) => parse_timestamp(raw).map_err(malformed)?,
        None => Utc::now(),
    };
    let iterations = item
        .get(ITERATIONS)
        .and_then(AttributeValue::as_n)
        .and_then(|n| n.to_u32())
        .unwrap_or(0);
    let context = match item.get(CONTEXT).map(from_attribute) {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    Ok(Job {
        job_id: job_id.to_string(),
        status,
        log: log.to_string(),
        updated_at,
        iterations,
        context,
    })
}

fn required_s<'a>(item: &'a Item, attr: &str, job_id: &str) -> Result<&'a str, StoreError> {
    item.get(attr)
        .and_then(AttributeValue::as_s)
        .ok_or_else(|| StoreError::Malformed {
            job_id: job_id.to_string(),
            reason: format!("missing string attribute '{attr}'"),
        })
}

/// Accepts RFC 3339 and the offset-less ISO-8601 form older writers produced.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("bad updated_at '{raw}': {e}"))
}
