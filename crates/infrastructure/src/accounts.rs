//! 内存账号目录
//!
//! 账号数据的权威来源是外部关系存储，这里只提供一个可从 JSON 种子文件加载的
//! 内存实现，供单机部署和测试使用。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use domain::{Account, AccountRepository, RepositoryError, UserId};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    /// 从 JSON 数组文件加载账号
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RepositoryError::storage(format!("failed to read {}: {}", path.display(), err))
        })?;
        let accounts: Vec<Account> = serde_json::from_str(&raw).map_err(|err| {
            RepositoryError::storage(format!("failed to parse {}: {}", path.display(), err))
        })?;

        info!("Loaded {} accounts from {}", accounts.len(), path.display());
        Ok(Self::with_accounts(accounts))
    }

    /// 新增或覆盖账号
    pub async fn upsert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }

    /// 停用账号，账号不存在时返回 false
    pub async fn deactivate(&self, id: &UserId) -> bool {
        match self.accounts.write().await.get_mut(id) {
            Some(account) => {
                account.active = false;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<Account>, RepositoryError> {
        Ok(self.accounts.read().await.get(id).cloned())
    }
}
