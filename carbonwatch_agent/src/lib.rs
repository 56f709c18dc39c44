//! carbonwatch agent: estimates host carbon emissions from CPU load and network traffic.

pub mod api;
pub mod calculator;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod optimizer;
pub mod sampler;
pub mod state;
pub mod types;
pub mod ws;
