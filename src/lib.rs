pub mod core;
pub use core::{Dictionary, Message, Middleware, OutputStream, Publisher, Topic, TypeName, Value};
pub mod cli;
pub mod harness;
pub use harness::{Outcome, TestCase, TestFailure, TestReport, run_case};
pub mod io;
pub mod msg;
pub use msg::{MessageConverter, TypeRegistry};
pub mod params;
pub use params::{ParamError, Params};
pub mod stream_utils;
pub mod utils;

pub use smol_macros::test as async_test;
