//! Background tasks started alongside the listener

mod balancer;
mod stats;

pub use balancer::{registration_request, run_registrar};
pub use stats::{format_stats, run_stats_writer, write_stats};
