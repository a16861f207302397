pub mod gateway;
pub mod http_retry;

pub use gateway::{GatewayError, HttpToolGateway, ToolCall, ToolGateway};
pub use http_retry::{call_with_retry, RetryOutcome, RetryPolicy};
