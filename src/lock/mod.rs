//! 文件锁模块
//!
//! 进程内的锁由 [`manager::LockManager`] 的两个命名空间（写锁、轮转锁）仲裁；
//! 跨进程的协调通过 [`lockfile`] 的磁盘 `<path>.lock` 协议完成。

pub mod lockfile;
pub mod manager;

pub use lockfile::{lockfile_path, with_lockfile, LockfileConfig};
pub use manager::{global, new_owner_id, LockManager, LockManagerConfig};
