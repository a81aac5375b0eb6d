pub mod command;
pub mod io_executor;
pub mod merge;
pub mod order_engine;

pub use command::{Command, EngineStats, Gen, QueryKind, StateSnapshot};
pub use io_executor::{DryRunIoExecutor, IoExecutorPort, LiveBookView, RealIoExecutor};
pub use order_engine::{spawn, OrderEngineConfig, OrderEngineHandle};
