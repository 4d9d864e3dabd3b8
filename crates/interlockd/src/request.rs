//! JSON request parsing and shape validation.
//!
//! Validation is driven by a `["field:kind", ...]` list with kind ∈
//! {s=string, b=bool, n=number, a=array, i=any}; missing or mistyped
//! fields reject the request before any handler logic runs.

use serde_json::{Map, Value};

use interlock_core::{Error, Result};

pub type Request = Map<String, Value>;

pub fn parse(body: &[u8]) -> Result<Request> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("invalid request body: {e}")))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::BadRequest("request body is not a JSON object".into())),
    }
}

pub fn validate(req: &Request, attrs: &[&str]) -> Result<()> {
    for attr in attrs {
        let (key, kind) = attr
            .split_once(':')
            .ok_or_else(|| Error::BadRequest("unknown validation argument".into()))?;

        let value = req
            .get(key)
            .ok_or_else(|| Error::BadRequest(format!("missing attribute {key}")))?;

        let ok = match kind {
            "s" => value.is_string(),
            "b" => value.is_boolean(),
            "n" => value.is_number(),
            "a" => value.is_array(),
            "i" => true,
            _ => return Err(Error::BadRequest("unknown validation kind".into())),
        };

        if !ok {
            return Err(Error::BadRequest(format!(
                "invalid attribute {key} ({kind})"
            )));
        }
    }

    Ok(())
}

/// Parse and validate in one step.
pub fn parse_validated(body: &[u8], attrs: &[&str]) -> Result<Request> {
    let req = parse(body)?;
    validate(&req, attrs)?;
    Ok(req)
}

pub fn str_field<'a>(req: &'a Request, key: &str) -> &'a str {
    req.get(key).and_then(Value::as_str).unwrap_or_default()
}

pub fn bool_field(req: &Request, key: &str) -> bool {
    req.get(key).and_then(Value::as_bool).unwrap_or_default()
}

pub fn i64_field(req: &Request, key: &str) -> Result<i64> {
    req.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::BadRequest(format!("invalid attribute {key} (n)")))
}

/// A validated `a` field holding strings only.
pub fn str_array(req: &Request, key: &str) -> Result<Vec<String>> {
    req.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::BadRequest(format!("missing attribute {key}")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::BadRequest(format!("invalid attribute {key} (a)")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> Request {
        parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse(b"[1,2,3]").is_err());
        assert!(parse(b"\"string\"").is_err());
        assert!(parse(b"not json").is_err());
        assert!(parse(b"{}").is_ok());
    }

    #[test]
    fn test_validate_kinds() {
        let req = request(r#"{"volume":"storage","dispose":false,"epoch":12,"src":["a"],"key":{}}"#);

        assert!(validate(
            &req,
            &["volume:s", "dispose:b", "epoch:n", "src:a", "key:i"]
        )
        .is_ok());

        assert!(validate(&req, &["volume:b"]).is_err());
        assert!(validate(&req, &["missing:s"]).is_err());
        assert!(validate(&req, &["volume:z"]).is_err());
        assert!(validate(&req, &["volume"]).is_err());
    }

    #[test]
    fn test_validation_error_messages() {
        let req = request(r#"{"password": 42}"#);

        let err = validate(&req, &["password:s"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid attribute password (s)");

        let err = validate(&req, &["volume:s"]).unwrap_err();
        assert_eq!(err.to_string(), "missing attribute volume");
    }

    #[test]
    fn test_str_array() {
        let req = request(r#"{"src":["a","b"],"bad":[1]}"#);

        assert_eq!(str_array(&req, "src").unwrap(), vec!["a", "b"]);
        assert!(str_array(&req, "bad").is_err());
        assert!(str_array(&req, "missing").is_err());
    }
}
