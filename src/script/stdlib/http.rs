//! The `http` module. Requests go through the host so a session can decide
//! where they run; the transfer itself uses `reqwest`.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use super::{arg_str, define, wrong_type};
use crate::script::error::{ErrorKind, ScriptError};
use crate::script::interp::{timeout_arg, Interpreter};
use crate::script::object::{Args, Dict, ModuleObject, Object, Record};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub fn install(module: &ModuleObject) {
    define(module, "get", |interp, args| send(interp, "GET", args));
    define(module, "post", |interp, args| send(interp, "POST", args));
    define(module, "put", |interp, args| send(interp, "PUT", args));
    define(module, "delete", |interp, args| send(interp, "DELETE", args));
    define(module, "request", |interp, mut args| {
        if args.positional.is_empty() {
            return Err(ScriptError::type_error("request() missing required argument 'method'"));
        }
        let method = match args.positional.remove(0) {
            Object::Str(m) => m.to_ascii_uppercase(),
            other => return Err(wrong_type("request", "method", "str", &other)),
        };
        send(interp, &method, args)
    });
}

/// `http.<method>(url, body=None, json=None, headers=None, timeout=None)`
fn send(interp: &mut Interpreter, method: &str, args: Args) -> Result<Object, ScriptError> {
    let func = method.to_ascii_lowercase();
    let url = arg_str(&args, 0, "url", &func)?.to_string();

    let mut headers = Vec::new();
    if let Some(given) = args.keyword("headers") {
        match given {
            Object::Dict(dict) => {
                for (k, v) in dict.borrow().iter() {
                    headers.push((k.to_display(), v.to_display()));
                }
            }
            Object::None => {}
            other => return Err(wrong_type(&func, "headers", "dict", other)),
        }
    }

    let body = match (args.get(1, "body"), args.keyword("json")) {
        (Some(_), Some(_)) => {
            return Err(ScriptError::usage(format!(
                "{func}(): pass either body or json, not both"
            )))
        }
        (Some(Object::Str(s)), None) => Some(s.as_bytes().to_vec()),
        (Some(Object::Bytes(b)), None) => Some(b.to_vec()),
        (Some(Object::None), None) | (None, None) => None,
        (Some(other), None) => return Err(wrong_type(&func, "body", "str or bytes", other)),
        (None, Some(document)) => {
            let wrapped = crate::value::wrap(document, &crate::value::Strict)
                .map_err(|e| ScriptError::type_error(e.to_string()))?;
            let text = serde_json::to_vec(&crate::value::json::to_json(&wrapped))
                .map_err(|e| ScriptError::value_error(e.to_string()))?;
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push(("content-type".into(), "application/json".into()));
            }
            Some(text)
        }
    };

    let request = HttpRequest {
        method: method.to_string(),
        url,
        headers,
        body,
        timeout: timeout_arg(args.keyword("timeout"), &func)?,
    };
    let response = interp.host().http_request(request)?;
    Ok(response_record(response))
}

fn response_record(response: HttpResponse) -> Object {
    let mut fields = BTreeMap::new();
    let headers: Dict = response
        .headers
        .into_iter()
        .map(|(k, v)| (Object::from(k), Object::from(v)))
        .collect();
    fields.insert("status".into(), Object::Int(i64::from(response.status)));
    fields.insert("ok".into(), Object::Bool((200..300).contains(&response.status)));
    fields.insert("headers".into(), Object::dict(headers));
    fields.insert(
        "text".into(),
        Object::from(String::from_utf8_lossy(&response.body).into_owned()),
    );
    fields.insert("content".into(), Object::bytes(&response.body));
    fields.insert("url".into(), Object::from(response.url));
    Object::Record(Rc::new(Record {
        type_name: "Response".into(),
        fields,
    }))
}

/// Perform `request` with a fresh client.
pub async fn perform(request: HttpRequest) -> Result<HttpResponse, ScriptError> {
    let failed = |e: reqwest::Error| {
        ScriptError::new(ErrorKind::RuntimeError, format!("HTTP request failed: {e}"))
    };
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| ScriptError::value_error(format!("invalid HTTP method '{}'", request.method)))?;
    let client = reqwest::Client::builder()
        .timeout(request.timeout.unwrap_or(DEFAULT_TIMEOUT))
        .build()
        .map_err(failed)?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }
    tracing::debug!(method = %request.method, url = %request.url, "Sending HTTP request");

    let response = builder.send().await.map_err(failed)?;
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = response.bytes().await.map_err(failed)?.to_vec();
    Ok(HttpResponse {
        url,
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_records_expose_status_and_text() {
        let record = response_record(HttpResponse {
            url: "http://localhost/".into(),
            status: 201,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: b"created".to_vec(),
        });
        let Object::Record(record) = record else {
            panic!("expected record");
        };
        assert_eq!(record.fields["ok"], Object::Bool(true));
        assert_eq!(record.fields["text"], Object::from("created"));
    }

    #[tokio::test]
    async fn invalid_methods_are_rejected_before_sending() {
        let err = perform(HttpRequest {
            method: "NOT A METHOD".into(),
            url: "http://127.0.0.1:9/".into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }
}
