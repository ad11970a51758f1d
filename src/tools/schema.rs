//! 计划 JSON Schema 生成（schemars 自动生成）
//!
//! 用于将「合法计划」的 JSON 结构注入 Planner prompt，减少 LLM 输出格式错误。

use schemars::schema_for;

use crate::plan::Plan;

/// 返回计划的 JSON Schema 字符串，可拼入 Planner prompt
pub fn plan_schema_json() -> String {
    let schema = schema_for!(Plan);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
