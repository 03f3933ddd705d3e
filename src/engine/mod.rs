//! Settlement engine: routing, dispatch, bounded fan-out and the batch pass.
//!
//! - `router` — market type → handler kind
//! - `orchestrator` — calculator registry and dispatch
//! - `pool` — order-preserving bounded worker pool
//! - `pipeline` — discover → prefetch → calculate → write

pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod router;
