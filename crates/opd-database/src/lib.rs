//! # 门诊排队数据库模块
//!
//! 提供PostgreSQL连接池，以及排队分配存储和就诊目录的数据库实现。

pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::{DatabasePool, DatabaseSettings};
pub use models::DbQueueAssignment;
pub use queries::{create_tables, PgAssignmentStore, PgEncounterDirectory};
