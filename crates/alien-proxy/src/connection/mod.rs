//! Connection plumbing shared by the control, rendezvous and relay paths

mod control;
mod endpoint;
mod reader;

pub use control::ControlChannel;
pub use endpoint::{BoxedReader, BoxedWriter, Endpoint};
pub use reader::LineReader;
