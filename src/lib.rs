//! 门诊分诊排队调度系统
//!
//! 汇总导出领域类型和调度核心，演示程序通过这里使用。

pub use opd_core as core;
pub use opd_queue as queue;
