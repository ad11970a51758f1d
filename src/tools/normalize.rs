//! Provider 信封归一化
//!
//! Provider 的原始响应可能包在各自的信封里：`{"content":[{"type":"text","text":"..."}]}`、
//! `{"structuredContent":{"result":...}}`、`{"result":...}`、`{"error":...}`、`{"isError":true,...}` 或裸值。
//! 统一拆成普通结果值或显式错误；空响应/无法解析的响应转为 MalformedResponse，而不是原样抛出解析异常。

use serde_json::Value;

use crate::core::ToolError;

/// 将原始信封拆解为结果值
pub fn normalize_response(provider: &str, tool: &str, raw: Value) -> Result<Value, ToolError> {
    let malformed = |detail: &str| ToolError::MalformedResponse {
        tool: tool.to_string(),
        detail: detail.to_string(),
    };

    match raw {
        Value::Null => Err(malformed("empty response")),
        Value::String(s) => {
            if s.trim().is_empty() {
                Err(malformed("empty text"))
            } else {
                Ok(parse_text_payload(&s))
            }
        }
        Value::Object(map) => {
            let is_error = map.get("isError").and_then(Value::as_bool).unwrap_or(false);

            if let Some(err) = map.get("error").filter(|e| !e.is_null()) {
                return Err(provider_error(provider, tool, err));
            }

            if let Some(structured) = map.get("structuredContent").filter(|v| !v.is_null()) {
                if is_error {
                    return Err(provider_error(provider, tool, structured));
                }
                return Ok(unwrap_result(structured.clone()));
            }

            if let Some(content) = map.get("content") {
                let text = content
                    .as_array()
                    .and_then(|items| items.first())
                    .and_then(|first| first.get("text"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("");
                if is_error {
                    return Err(ToolError::ProviderError {
                        provider: provider.to_string(),
                        tool: tool.to_string(),
                        raw: text.to_string(),
                    });
                }
                if !text.is_empty() {
                    return Ok(parse_text_payload(text));
                }
                return match map.get("result") {
                    Some(r) if !r.is_null() => Ok(r.clone()),
                    _ => Err(malformed("empty content")),
                };
            }

            if is_error {
                return Err(provider_error(provider, tool, &Value::Object(map)));
            }

            match map.get("result") {
                Some(Value::Null) => Err(malformed("null result")),
                Some(r) => Ok(r.clone()),
                None if map.is_empty() => Err(malformed("empty object")),
                None => Ok(Value::Object(map)),
            }
        }
        other => Ok(other),
    }
}

/// 文本载荷：是 JSON 则解析并拆 `result`，否则按纯文本返回
fn parse_text_payload(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => unwrap_result(parsed),
        Err(_) => Value::String(text.to_string()),
    }
}

fn unwrap_result(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn provider_error(provider: &str, tool: &str, err: &Value) -> ToolError {
    let raw = match err {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ToolError::ProviderError {
        provider: provider.to_string(),
        tool: tool.to_string(),
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_envelope_with_json_result() {
        let raw = json!({"content": [{"type": "text", "text": "{\"result\": 12.0}"}]});
        assert_eq!(normalize_response("math", "power", raw).unwrap(), json!(12.0));
    }

    #[test]
    fn test_text_envelope_plain_text() {
        let raw = json!({"content": [{"type": "text", "text": "hello world"}]});
        assert_eq!(
            normalize_response("p", "t", raw).unwrap(),
            json!("hello world")
        );
    }

    #[test]
    fn test_structured_content() {
        let raw = json!({"content": [], "structuredContent": {"result": [1, 2]}});
        assert_eq!(normalize_response("p", "t", raw).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_error_envelopes() {
        let err = normalize_response("p", "t", json!({"error": "boom"})).unwrap_err();
        assert_eq!(
            err,
            ToolError::ProviderError {
                provider: "p".to_string(),
                tool: "t".to_string(),
                raw: "boom".to_string()
            }
        );

        let err = normalize_response(
            "p",
            "t",
            json!({"isError": true, "content": [{"type": "text", "text": "bad input"}]}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::ProviderError { raw, .. } if raw == "bad input"));
    }

    #[test]
    fn test_empty_responses_are_malformed() {
        for raw in [json!(null), json!(""), json!({}), json!({"content": []}), json!({"result": null})] {
            let err = normalize_response("p", "t", raw).unwrap_err();
            assert!(matches!(err, ToolError::MalformedResponse { .. }));
        }
    }

    #[test]
    fn test_bare_values_pass_through() {
        assert_eq!(normalize_response("p", "t", json!(6)).unwrap(), json!(6));
        assert_eq!(
            normalize_response("p", "t", json!({"result": "ok"})).unwrap(),
            json!("ok")
        );
        assert_eq!(
            normalize_response("p", "t", json!({"items": [1]})).unwrap(),
            json!({"items": [1]})
        );
    }
}
