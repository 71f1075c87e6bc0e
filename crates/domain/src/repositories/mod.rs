//! Repository接口定义
//!
//! 内层定义接口，外层实现接口。

pub mod account_repository;

pub use account_repository::AccountRepository;
#[cfg(any(test, feature = "testing"))]
pub use account_repository::MockAccountRepository;
