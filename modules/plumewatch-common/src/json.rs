//! Best-effort structured extraction from model free text.
//!
//! Generation services are asked for "only JSON" and still wrap it in prose,
//! code fences, or trailing commentary. This module is the single seam for
//! digging the first well-formed JSON object out of arbitrary text. It
//! returns `Option`, never an error.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Find the first well-formed JSON object in `text`.
///
/// Scans for balanced `{...}` spans (string- and escape-aware) and returns
/// the first span that parses as a JSON object. Surrounding prose, fences,
/// and malformed earlier spans are ignored.
pub fn first_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        if let Some(end) = balanced_end(text, i) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[i..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
            // Malformed or non-object span: resume scanning inside it, a
            // nested object may still parse.
        }
        i += 1;
    }

    None
}

/// Deserialize the first well-formed JSON object in `text` into `T`.
pub fn parse_first<T: DeserializeOwned>(text: &str) -> Option<T> {
    first_object(text).and_then(|value| serde_json::from_value(value).ok())
}

/// Byte index of the `}` closing the object that opens at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        facility: String,
        confidence: f64,
    }

    #[test]
    fn bare_object() {
        let v = first_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn object_inside_prose() {
        let text = r#"Here is the answer you asked for:

{"facility": "XYZ Textile", "confidence": 0.8}

Let me know if you need anything else."#;
        let v: Verdict = parse_first(text).unwrap();
        assert_eq!(v.facility, "XYZ Textile");
    }

    #[test]
    fn object_inside_code_fence() {
        let text = "```json\n{\"facility\": \"Soma Termik\", \"confidence\": 0.5}\n```";
        let v: Verdict = parse_first(text).unwrap();
        assert_eq!(v.facility, "Soma Termik");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let text = r#"{"facility": "Plant {east wing}", "confidence": 0.6}"#;
        let v: Verdict = parse_first(text).unwrap();
        assert_eq!(v.facility, "Plant {east wing}");
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let text = r#"{"a": "he said \"fire\" twice"}"#;
        let v = first_object(text).unwrap();
        assert_eq!(v["a"], "he said \"fire\" twice");
    }

    #[test]
    fn skips_malformed_span_for_later_valid_one() {
        let text = r#"{broken json} and then {"a": 2}"#;
        let v = first_object(text).unwrap();
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn no_object_yields_none() {
        assert!(first_object("no json here at all").is_none());
        assert!(first_object("[1, 2, 3]").is_none());
        assert!(first_object("").is_none());
    }

    #[test]
    fn unterminated_object_yields_none() {
        assert!(first_object(r#"{"a": 1"#).is_none());
    }

    #[test]
    fn parse_first_type_mismatch_yields_none() {
        let text = r#"{"facility": 42}"#;
        assert!(parse_first::<Verdict>(text).is_none());
    }
}
