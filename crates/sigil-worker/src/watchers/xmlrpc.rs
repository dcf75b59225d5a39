//! Minimal XML-RPC client encoding for PyPI's changelog API.
//!
//! Responses are decoded into [`serde_json::Value`] so callers can reuse
//! the same accessors as for the JSON endpoints.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;

/// Body of a `methodCall` with integer parameters.
pub(crate) fn method_call(method: &str, params: &[i64]) -> String {
    let params: String = params
        .iter()
        .map(|p| format!("<param><value><int>{p}</int></value></param>"))
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<methodCall><methodName>{method}</methodName><params>{params}</params></methodCall>"#
    )
}

enum Frame {
    Array(Vec<Value>),
    Struct(Map<String, Value>, String),
}

/// Decode a `methodResponse` into its single return value. A `fault`
/// response becomes an external-service error.
pub(crate) fn parse_response(xml: &str) -> AppResult<Value> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut results: Vec<Value> = Vec::new();
    let mut scalar: Option<String> = None;
    let mut text = String::new();
    let mut typed = false;
    let mut in_name = false;
    let mut fault = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::with_source(ErrorKind::Serialization, "Invalid XML-RPC response", e)
        })?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"value" => {
                    text.clear();
                    typed = false;
                }
                b"array" => {
                    stack.push(Frame::Array(Vec::new()));
                    typed = true;
                }
                b"struct" => {
                    stack.push(Frame::Struct(Map::new(), String::new()));
                    typed = true;
                }
                b"name" => in_name = true,
                b"fault" => fault = true,
                b"data" | b"member" | b"params" | b"param" | b"methodResponse" => {}
                tag => {
                    scalar = Some(String::from_utf8_lossy(tag).into_owned());
                    text.clear();
                }
            },
            Event::Empty(e) => {
                let value = match e.local_name().as_ref() {
                    b"nil" => Value::Null,
                    b"array" => Value::Array(Vec::new()),
                    b"struct" => Value::Object(Map::new()),
                    _ => Value::String(String::new()),
                };
                push_value(&mut stack, &mut results, value);
                typed = true;
            }
            Event::Text(t) => {
                let decoded = t.unescape().map_err(|e| {
                    AppError::with_source(ErrorKind::Serialization, "Invalid XML-RPC text", e)
                })?;
                if in_name {
                    if let Some(Frame::Struct(_, name)) = stack.last_mut() {
                        *name = decoded.into_owned();
                    }
                } else {
                    text.push_str(&decoded);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"name" => in_name = false,
                b"value" => {
                    if !typed {
                        let value = Value::String(std::mem::take(&mut text));
                        push_value(&mut stack, &mut results, value);
                    }
                    typed = true;
                }
                b"array" | b"struct" => {
                    let value = match stack.pop() {
                        Some(Frame::Array(items)) => Value::Array(items),
                        Some(Frame::Struct(map, _)) => Value::Object(map),
                        None => Value::Null,
                    };
                    push_value(&mut stack, &mut results, value);
                    typed = true;
                }
                tag if scalar.as_deref().map(str::as_bytes) == Some(tag) => {
                    let kind = scalar.take().unwrap_or_default();
                    let value = scalar_value(&kind, std::mem::take(&mut text));
                    push_value(&mut stack, &mut results, value);
                    typed = true;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let value = results.into_iter().next().unwrap_or(Value::Null);
    if fault {
        let reason = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or("unknown fault");
        return Err(AppError::external(format!("XML-RPC fault: {reason}")));
    }
    Ok(value)
}

fn push_value(stack: &mut [Frame], results: &mut Vec<Value>, value: Value) {
    match stack.last_mut() {
        Some(Frame::Array(items)) => items.push(value),
        Some(Frame::Struct(map, name)) => {
            map.insert(std::mem::take(name), value);
        }
        None => results.push(value),
    }
}

fn scalar_value(kind: &str, text: String) -> Value {
    match kind {
        "int" | "i4" | "i8" => text.trim().parse::<i64>().map_or(Value::String(text), Value::from),
        "double" => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::String(text), Value::Number),
        "boolean" => Value::Bool(text.trim() == "1"),
        _ => Value::String(text),
    }
}
