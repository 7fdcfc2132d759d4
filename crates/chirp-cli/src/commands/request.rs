use anyhow::{Context, Result};

use chirp_core::api::header::{HeaderMap, HeaderName, HeaderValue};
use chirp_core::api::Method;
use chirp_core::{RequestBody, SessionController};

/// Parse a `key=value` form field.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Header must look like 'Name: value', got '{}'", line))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{}'", line))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in '{}'", line))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn build_body(data: Option<String>, form: Vec<(String, String)>) -> Result<Option<RequestBody>> {
    if let Some(raw) = data {
        let value = serde_json::from_str(&raw).context("--data must be valid JSON")?;
        return Ok(Some(RequestBody::Json(value)));
    }
    if form.is_empty() {
        Ok(None)
    } else {
        Ok(Some(RequestBody::Form(form)))
    }
}

/// Send one authenticated request and print the response body.
pub async fn run(
    controller: &SessionController,
    method: &str,
    path: &str,
    data: Option<String>,
    form: Vec<(String, String)>,
    headers: &[String],
) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method '{}'", method))?;
    let body = build_body(data, form)?;
    let headers = parse_headers(headers)?;

    let result = controller
        .client()
        .request(method, path, body, Some(headers))
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_auth_failure() => {
            anyhow::bail!("{} - run `chirp login`", e);
        }
        Err(e) => return Err(e).with_context(|| format!("Request to {} failed", path)),
    };

    match response.json::<serde_json::Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => {
            let text = response.text();
            if !text.is_empty() {
                println!("{}", text);
            }
        }
    }
    Ok(())
}
