//! 账号Repository接口定义

use async_trait::async_trait;

use crate::entities::identity::Account;
use crate::errors::RepositoryError;
use crate::value_objects::UserId;

/// 账号查询接口，由外部关系存储实现
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// 根据ID查找账号
    async fn find_by_id(&self, id: &UserId) -> Result<Option<Account>, RepositoryError>;
}
