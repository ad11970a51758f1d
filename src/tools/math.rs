//! 内置数学 Provider（演示与测试用）
//!
//! 以 MCP 风格的文本信封返回结果：`{"content":[{"type":"text","text":"{\"result\": 12.0}"}]}`，
//! 错误用 `isError: true` 标记，交给 ToolRouter 归一化。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ToolProvider, ToolSpec};

/// 数学工具集：add / subtract / multiply / divide / power / sqrt / factorial
pub struct MathProvider {
    id: String,
}

impl MathProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

fn binary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        },
        "required": ["a", "b"]
    })
}

fn number_output() -> Value {
    json!({"type": "number"})
}

fn text_envelope(result: Value) -> Value {
    json!({
        "content": [{"type": "text", "text": json!({"result": result}).to_string()}]
    })
}

fn error_envelope(message: &str) -> Value {
    json!({
        "isError": true,
        "content": [{"type": "text", "text": message}]
    })
}

fn number_arg(args: &Value, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing numeric argument '{}'", key))
}

#[async_trait]
impl ToolProvider for MathProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        let binary = |name: &str, desc: &str| {
            ToolSpec::new(name, desc)
                .with_input_schema(binary_schema())
                .with_output_schema(number_output())
        };
        vec![
            binary("add", "Add two numbers. Args: {\"a\": number, \"b\": number}"),
            binary("subtract", "Subtract b from a. Args: {\"a\": number, \"b\": number}"),
            binary("multiply", "Multiply two numbers. Args: {\"a\": number, \"b\": number}"),
            binary("divide", "Divide a by b. Args: {\"a\": number, \"b\": number}"),
            binary(
                "power",
                "Raise a to the power b (use b = 0.5 for a square root). Args: {\"a\": number, \"b\": number}",
            ),
            ToolSpec::new("sqrt", "Square root of a number. Args: {\"a\": number}")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}},
                    "required": ["a"]
                }))
                .with_output_schema(number_output()),
            ToolSpec::new("factorial", "Factorial of a non-negative integer. Args: {\"n\": integer}")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"n": {"type": "integer"}},
                    "required": ["n"]
                }))
                .with_output_schema(json!({"type": "integer"})),
        ]
    }

    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, String> {
        let outcome: Result<Value, String> = match tool_name {
            "add" => Ok(json!(number_arg(&args, "a")? + number_arg(&args, "b")?)),
            "subtract" => Ok(json!(number_arg(&args, "a")? - number_arg(&args, "b")?)),
            "multiply" => Ok(json!(number_arg(&args, "a")? * number_arg(&args, "b")?)),
            "divide" => {
                let b = number_arg(&args, "b")?;
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(json!(number_arg(&args, "a")? / b))
                }
            }
            "power" => Ok(json!(number_arg(&args, "a")?.powf(number_arg(&args, "b")?))),
            "sqrt" => {
                let a = number_arg(&args, "a")?;
                if a < 0.0 {
                    Err("square root of a negative number".to_string())
                } else {
                    Ok(json!(a.sqrt()))
                }
            }
            "factorial" => match args.get("n").and_then(Value::as_u64) {
                Some(n) if n <= 20 => Ok(json!((1..=n).product::<u64>())),
                Some(n) => Err(format!("factorial({}) overflows", n)),
                None => Err("missing non-negative integer argument 'n'".to_string()),
            },
            other => return Err(format!("math provider has no tool '{}'", other)),
        };

        Ok(match outcome {
            Ok(v) => text_envelope(v),
            Err(e) => error_envelope(&e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_math_envelopes() {
        let p = MathProvider::new("math");
        let raw = p.invoke("factorial", json!({"n": 3})).await.unwrap();
        assert_eq!(raw["content"][0]["text"], json!("{\"result\":6}"));

        let raw = p.invoke("divide", json!({"a": 1, "b": 0})).await.unwrap();
        assert_eq!(raw["isError"], json!(true));

        assert!(p.invoke("nope", json!({})).await.is_err());
    }

    #[test]
    fn test_math_tools_declared() {
        let names: Vec<String> = MathProvider::new("m")
            .list_tools()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert!(names.contains(&"power".to_string()));
        assert!(names.contains(&"factorial".to_string()));
        assert_eq!(names.len(), 7);
    }
}
