//! 工具集
//!
//! Tool trait 与注册表（registry）、带超时与审计的执行器（executor），
//! 以及内置能力：天气、搜索、计算、时间、受限命令执行、沙箱文件操作。

pub mod calculator;
pub mod executor;
pub mod registry;
pub mod search;
pub mod shell;
pub mod time;
pub mod weather;
pub mod workspace;

pub use calculator::CalculatorTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use search::SearchTool;
pub use shell::ShellTool;
pub use time::TimeTool;
pub use weather::WeatherTool;
pub use workspace::{WorkspaceGuard, WorkspaceListTool, WorkspaceReadTool, WorkspaceWriteTool};
