use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::models::{
    JobListing, SearchMetadata, SearchParameters, SearchResponse, Validate, Validator,
};

/// Split a raw API payload into a validated response and its continuation token.
///
/// The `pagination` object is removed before validation: first pages and
/// continuation pages disagree on whether it is present, and the token is
/// only needed to drive the next fetch. Each section is decoded on its own
/// so one bad field does not hide problems elsewhere in the page.
pub fn parse_response(raw: Value) -> Result<(SearchResponse, Option<String>), ParseError> {
    let Value::Object(mut body) = raw else {
        return Err(ParseError::NotAnObject);
    };

    let next_page_token = body
        .remove("pagination")
        .and_then(|pagination| match pagination.get("next_page_token") {
            Some(Value::String(token)) if !token.trim().is_empty() => Some(token.clone()),
            _ => None,
        });

    let mut v = Validator::default();

    let search_metadata: SearchMetadata = required(&mut body, "search_metadata", &mut v);
    let search_parameters: SearchParameters = required(&mut body, "search_parameters", &mut v);
    let search_information = match body.remove("search_information") {
        None | Some(Value::Null) => None,
        Some(raw) => decode(raw, "search_information", &mut v),
    };

    let mut jobs = Vec::new();
    match body.remove("jobs") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.into_iter().enumerate() {
                let path = format!("jobs[{}]", i);
                if let Some(job) = decode::<JobListing>(item, &path, &mut v) {
                    job.check(&path, &mut v);
                    jobs.push(job);
                }
            }
        }
        Some(other) => v.issue("jobs", format!("expected a list, found {}", kind(&other))),
    }

    v.finish()?;

    let response = SearchResponse {
        search_metadata,
        search_parameters,
        search_information,
        jobs,
        is_subsequent_page: false,
    };
    Ok((response, next_page_token))
}

/// A section the page cannot do without. Missing or undecodable sections are
/// recorded and replaced by an empty value so the rest of the page is still checked.
fn required<T>(body: &mut Map<String, Value>, key: &str, v: &mut Validator) -> T
where
    T: DeserializeOwned + Default + Validate,
{
    match body.remove(key) {
        None | Some(Value::Null) => {
            v.issue(key, "is required");
            T::default()
        }
        Some(raw) => match decode::<T>(raw, key, v) {
            Some(section) => {
                section.check(key, v);
                section
            }
            None => T::default(),
        },
    }
}

/// Decode one section, attributing failures to the fields that cause them.
///
/// Every field of a section type tolerates being absent, so a field whose
/// value fails to decode alone is one of the culprits.
fn decode<T: DeserializeOwned>(raw: Value, path: &str, v: &mut Validator) -> Option<T> {
    let err = match serde_json::from_value::<T>(raw.clone()) {
        Ok(section) => return Some(section),
        Err(e) => e,
    };

    let Value::Object(fields) = raw else {
        v.issue(path, format!("expected an object, found {}", kind(&raw)));
        return None;
    };

    let mut blamed = false;
    for (key, value) in fields {
        let single = Value::Object(Map::from_iter([(key.clone(), value)]));
        if let Err(e) = serde_json::from_value::<T>(single) {
            v.issue(format!("{}.{}", path, key), e.to_string());
            blamed = true;
        }
    }
    if !blamed {
        v.issue(path, err.to_string());
    }
    None
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
