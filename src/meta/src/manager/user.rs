// Copyright 2025 ChronoWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::sync::Arc;

use super::cache::MetaCache;
use super::env::MetaSrvEnv;
use crate::model::{Auth, MetadataModel, UserInfo, UserKind};
use crate::storage::MetaStore;
use crate::{MetaError, MetaResult};

/// [`UserManager`] manages the user info, including authentication and
/// privilege sets. Session-level authorization happens in the front
/// protocol layer before calls reach the metadata core.
pub struct UserManager<S: MetaStore> {
    env: MetaSrvEnv<S>,
    cache: Arc<MetaCache>,
}

impl<S: MetaStore> UserManager<S> {
    /// Load the persisted users and materialize the administrator from
    /// configuration if absent.
    pub async fn new(env: MetaSrvEnv<S>, cache: Arc<MetaCache>) -> MetaResult<Self> {
        for user in UserInfo::list(env.meta_store()).await? {
            cache.install_user(user);
        }
        let manager = Self { env, cache };
        manager.init().await?;
        Ok(manager)
    }

    async fn init(&self) -> MetaResult<()> {
        let opts = self.env.opts();
        if self.cache.get_user(&opts.admin_username).is_none() {
            let admin = UserInfo {
                username: opts.admin_username.clone(),
                password: opts.admin_password.clone(),
                kind: UserKind::Administrator,
                auths: Auth::all(),
            };
            admin.insert(self.env.meta_store()).await?;
            self.cache.install_user(admin);
        }
        Ok(())
    }

    pub async fn create_user(&self, user: UserInfo) -> MetaResult<()> {
        if self.cache.get_user(&user.username).is_some() {
            return Err(MetaError::duplicated("user", &user.username));
        }
        user.insert(self.env.meta_store()).await?;
        self.cache.install_user(user);
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> Option<UserInfo> {
        self.cache.get_user(username)
    }

    pub fn list_users(&self) -> Vec<UserInfo> {
        self.cache.list_users()
    }

    /// Update a user's password and/or auth set. A `None` field keeps the
    /// current value.
    pub async fn update_user(
        &self,
        username: &str,
        password: Option<String>,
        auths: Option<HashSet<Auth>>,
    ) -> MetaResult<()> {
        let mut user = self
            .cache
            .get_user(username)
            .ok_or_else(|| MetaError::not_found("user", username))?;
        if let Some(password) = password {
            user.password = password;
        }
        if let Some(auths) = auths {
            user.auths = auths;
        }
        user.insert(self.env.meta_store()).await?;
        self.cache.install_user(user);
        Ok(())
    }

    pub async fn drop_user(&self, username: &str) -> MetaResult<()> {
        if self.cache.get_user(username).is_none() {
            return Err(MetaError::not_found("user", username));
        }
        if username == self.env.opts().admin_username {
            return Err(MetaError::unsupported(
                "cannot drop the administrator user",
            ));
        }
        UserInfo::delete(self.env.meta_store(), &username.to_string()).await?;
        self.cache.remove_user(username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admin_seeding_and_update() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let manager = UserManager::new(env, cache).await.unwrap();

        let admin = manager.get_user("root").unwrap();
        assert_eq!(admin.kind, UserKind::Administrator);
        assert_eq!(admin.auths, Auth::all());
        assert_eq!(admin.password, "root");

        // A None password keeps the old one; the auth set is replaced.
        manager
            .update_user("root", None, Some(HashSet::from([Auth::Read])))
            .await
            .unwrap();
        let admin = manager.get_user("root").unwrap();
        assert_eq!(admin.password, "root");
        assert_eq!(admin.auths, HashSet::from([Auth::Read]));

        assert!(manager.drop_user("root").await.is_err());
    }

    #[tokio::test]
    async fn test_user_crud() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let manager = UserManager::new(env, cache).await.unwrap();

        let user = UserInfo {
            username: "analyst".to_string(),
            password: "secret".to_string(),
            kind: UserKind::Normal,
            auths: HashSet::from([Auth::Read]),
        };
        manager.create_user(user.clone()).await.unwrap();
        assert!(matches!(
            manager.create_user(user).await,
            Err(MetaError::Duplicated { .. })
        ));
        assert_eq!(manager.list_users().len(), 2);

        manager.drop_user("analyst").await.unwrap();
        assert!(manager.get_user("analyst").is_none());
        assert!(matches!(
            manager.drop_user("analyst").await,
            Err(MetaError::NotFound { .. })
        ));
    }
}
