pub mod commands;
pub mod controller;
pub mod coordinator;
pub mod hardware;
pub mod host;
pub mod http;
pub mod identity;
pub mod link;
pub mod sampler;
pub mod storage;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod testing;
