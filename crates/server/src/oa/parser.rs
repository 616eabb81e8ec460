//! Extracts release jobs from stored OA approval documents.
//!
//! OA documents arrive in several wrappings (raw form data, API responses
//! carrying `data.latest_file`, previously stored records). The approval form
//! itself is the object holding `fwm`, a `<br>`-separated list of
//! `project branch` lines.

use serde_json::{Map, Value};
use tracing::warn;

use super::error::OaError;

/// One project to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseJob {
    pub project: String,
    pub branch: String,
}

/// A parsed OA release approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaRelease {
    /// Applicant display name, possibly prefixed with an employee number.
    pub initiator: String,
    pub request_name: String,
    /// OA-side request id, empty when absent.
    pub request_id: String,
    pub jobs: Vec<ReleaseJob>,
}

impl OaRelease {
    /// Name used for directory lookup and greetings.
    ///
    /// Initiators recorded as employee numbers fall back to the second
    /// `-`-separated part of the request name, which OA fills with the
    /// applicant's name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        let numeric = self
            .initiator
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());

        if numeric
            && let Some(name) = self.request_name.split('-').nth(1)
            && !name.trim().is_empty()
        {
            return name.trim();
        }

        &self.initiator
    }
}

/// Parse a stored OA document.
///
/// # Errors
///
/// Returns `OaError::MissingOriginalData` if no approval form is found and
/// `OaError::MissingJobList` if the form has no `fwm` string.
pub fn parse_release(document: &Value) -> Result<OaRelease, OaError> {
    let form = find_original_data(document).ok_or(OaError::MissingOriginalData)?;
    let fwm = form
        .get("fwm")
        .and_then(Value::as_str)
        .ok_or(OaError::MissingJobList)?;

    let manager = form.get("requestManager").and_then(Value::as_object);
    let from_manager = |key: &str| {
        manager
            .map(|m| value_to_string(m.get(key)))
            .unwrap_or_default()
    };
    let or_top_level = |value: String, key: &str| {
        if value.is_empty() {
            value_to_string(form.get(key))
        } else {
            value
        }
    };

    let mut initiator = from_manager("sqr");
    if initiator.is_empty() {
        initiator = from_manager("creater");
    }
    let initiator = or_top_level(initiator, "sqr");
    let request_name = or_top_level(from_manager("requestname"), "requestname");
    let request_id = or_top_level(from_manager("requestid"), "requestId");

    Ok(OaRelease {
        initiator,
        request_name,
        request_id,
        jobs: parse_jobs(fwm),
    })
}

/// Split `fwm` into `project branch` pairs. Lines with fewer than two
/// words are skipped.
fn parse_jobs(fwm: &str) -> Vec<ReleaseJob> {
    fwm.split("<br>")
        .map(|line| line.replace("&nbsp;", " "))
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some(project), Some(branch)) => Some(ReleaseJob {
                    project: project.to_string(),
                    branch: branch.to_string(),
                }),
                _ => {
                    warn!(line = %line.trim(), "Skipping invalid project format");
                    None
                }
            }
        })
        .collect()
}

/// Locate the approval form inside a document.
///
/// Search order: `original_data` (or the response it wraps),
/// `data.original_data`, `data.latest_file.original_data`,
/// `latest_file.original_data`, the document itself, then `data`.
fn find_original_data(document: &Value) -> Option<&Map<String, Value>> {
    let root = document.as_object()?;
    let data = object(root.get("data"));

    object(root.get("original_data"))
        .and_then(|od| {
            if od.contains_key("fwm") {
                Some(od)
            } else {
                latest_original(object(od.get("data")))
            }
        })
        .or_else(|| object(data?.get("original_data")))
        .or_else(|| latest_original(data))
        .or_else(|| latest_original(Some(root)))
        .or_else(|| Some(root).filter(|r| r.get("fwm").is_some_and(|v| !v.is_null())))
        .or_else(|| data.filter(|d| d.contains_key("fwm")))
}

fn object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object)
}

/// `latest_file.original_data` below `map`.
fn latest_original(map: Option<&Map<String, Value>>) -> Option<&Map<String, Value>> {
    object(object(map?.get("latest_file"))?.get("original_data"))
}

/// Render a scalar JSON value as trimmed text. Integral floats lose their
/// fraction so numeric ids print as `123`, not `123.0`.
fn value_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            #[allow(clippy::cast_possible_truncation)] // Only integral values in i64 range
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        },
        Some(other) => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn form() -> Value {
        json!({
            "fwm": "api-server master<br>web&nbsp;release/1.2<br>  <br>broken",
            "requestManager": {
                "sqr": "张三",
                "requestname": "应用发布-张三-20250101",
                "requestid": 9001
            }
        })
    }

    #[test]
    fn test_parse_direct_original_data() {
        let release = parse_release(&json!({"id": "x", "original_data": form()})).unwrap();

        assert_eq!(release.initiator, "张三");
        assert_eq!(release.request_name, "应用发布-张三-20250101");
        assert_eq!(release.request_id, "9001");
        assert_eq!(
            release.jobs,
            [
                ReleaseJob {
                    project: "api-server".to_string(),
                    branch: "master".to_string()
                },
                ReleaseJob {
                    project: "web".to_string(),
                    branch: "release/1.2".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_wrapped_documents() {
        let wrapped = [
            json!({"original_data": {"data": {"latest_file": {"original_data": form()}}}}),
            json!({"data": {"original_data": form()}}),
            json!({"data": {"latest_file": {"original_data": form()}}}),
            json!({"latest_file": {"original_data": form()}}),
            form(),
            json!({"data": form()}),
        ];

        for document in &wrapped {
            let release = parse_release(document).unwrap();
            assert_eq!(release.jobs.len(), 2, "document: {document}");
        }
    }

    #[test]
    fn test_initiator_fallbacks() {
        let creater = json!({"fwm": "a b", "requestManager": {"creater": "李四"}});
        assert_eq!(parse_release(&creater).unwrap().initiator, "李四");

        let top_level = json!({"fwm": "a b", "sqr": " 王五 ", "requestId": "77"});
        let release = parse_release(&top_level).unwrap();
        assert_eq!(release.initiator, "王五");
        assert_eq!(release.request_id, "77");
    }

    #[test]
    fn test_missing_form_and_fwm() {
        assert!(matches!(
            parse_release(&json!({"foo": 1})),
            Err(OaError::MissingOriginalData)
        ));
        assert!(matches!(
            parse_release(&json!({"original_data": {"data": {}}, "fwm": 5})),
            Err(OaError::MissingJobList)
        ));
    }

    #[test]
    fn test_display_name() {
        let mut release = OaRelease {
            initiator: "10086".to_string(),
            request_name: "应用发布-张三-20250101".to_string(),
            request_id: String::new(),
            jobs: vec![],
        };
        assert_eq!(release.display_name(), "张三");

        release.request_name = "应用发布".to_string();
        assert_eq!(release.display_name(), "10086");

        release.initiator = "张三".to_string();
        release.request_name = "应用发布-李四".to_string();
        assert_eq!(release.display_name(), "张三");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(Some(&json!(42))), "42");
        assert_eq!(value_to_string(Some(&json!(42.0))), "42");
        assert_eq!(value_to_string(Some(&json!(1.5))), "1.5");
        assert_eq!(value_to_string(Some(&json!(null))), "");
        assert_eq!(value_to_string(None), "");
        assert_eq!(value_to_string(Some(&json!(true))), "true");
    }
}
