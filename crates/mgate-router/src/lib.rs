//! HTTP surface of the gateway: the OpenAI-compatible relay endpoint and
//! the model catalog, wired over the core relay engine.

mod relay;

pub use relay::{GatewayState, gateway_router};
