//! 工具层：ToolSpec 与 Provider 注册、按 provider_id 路由、响应信封归一化、计划 Schema、内置演示 Provider

pub mod echo;
pub mod math;
pub mod normalize;
pub mod registry;
pub mod router;
pub mod schema;

pub use echo::EchoProvider;
pub use math::MathProvider;
pub use normalize::normalize_response;
pub use registry::{ProviderRegistry, ToolProvider, ToolSpec};
pub use router::ToolRouter;
pub use schema::plan_schema_json;
