// src/users.rs
// Identity-provider users and their console role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{ConsoleError, ConsoleResult};
use crate::state::StateStore;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    /// Groups checked in priority order; a user in neither is a guest.
    const RANKED_GROUPS: [Role; 2] = [Role::Admin, Role::User];

    pub fn for_groups(groups: &[String]) -> Role {
        let groups: BTreeSet<&str> = groups.iter().map(String::as_str).collect();
        Self::RANKED_GROUPS
            .into_iter()
            .find(|role| groups.contains(role.group_name()))
            .unwrap_or(Role::Guest)
    }

    pub fn group_name(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Guest => "Guest",
            Role::User => "User",
            Role::Admin => "Admin",
        }
    }

    /// Identity-provider groups that grant a role.
    pub fn managed_groups() -> [&'static str; 2] {
        [Role::Admin.group_name(), Role::User.group_name()]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

impl FromStr for Role {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(ConsoleError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::for_groups(&self.groups)
    }

    /// Rewrites the managed groups so that exactly `role` is granted;
    /// groups the console does not manage are left alone.
    pub fn assign_role(&mut self, role: Role) {
        self.groups.retain(|g| !Role::managed_groups().contains(&g.as_str()));
        if role != Role::Guest {
            self.groups.push(role.group_name().to_string());
        }
    }
}

/// The identity provider holding console users.
pub trait UserDirectory: Send + Sync {
    fn list_users(&self) -> impl Future<Output = ConsoleResult<Vec<User>>> + Send;

    fn set_user_role(&self, username: &str, role: Role) -> impl Future<Output = ConsoleResult<User>> + Send;
}

/// Users kept in a YAML file, for running the console without an identity provider.
pub struct FileDirectory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> ConsoleResult<Vec<User>> {
        if !self.path.exists() {
            warn!("Users file {} does not exist, treating it as empty", self.path.display());
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| ConsoleError::Directory(format!("{}: {}", self.path.display(), e)))
    }

    fn write(&self, users: &[User]) -> ConsoleResult<()> {
        std::fs::write(&self.path, serde_yaml::to_string(users)?)?;
        Ok(())
    }
}

impl UserDirectory for FileDirectory {
    async fn list_users(&self) -> ConsoleResult<Vec<User>> {
        let _guard = self.lock.lock().await;
        self.read()
    }

    async fn set_user_role(&self, username: &str, role: Role) -> ConsoleResult<User> {
        let _guard = self.lock.lock().await;
        let mut users = self.read()?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| ConsoleError::UserNotFound(username.to_string()))?;
        user.assign_role(role);
        let updated = user.clone();
        self.write(&users)?;
        Ok(updated)
    }
}

#[cfg(feature = "aws_integration")]
pub use cognito::CognitoDirectory;

#[cfg(feature = "aws_integration")]
mod cognito {
    use aws_config::{BehaviorVersion, Region};
    use aws_sdk_cognitoidentityprovider::Client;
    use chrono::{DateTime, Utc};
    use tracing::{debug, error};

    use super::{Role, User, UserDirectory};
    use crate::errors::{ConsoleError, ConsoleResult};

    /// Users of a Cognito user pool; roles map onto pool groups.
    pub struct CognitoDirectory {
        client: Client,
        user_pool_id: String,
    }

    fn directory_error(action: &str, err: impl std::fmt::Display) -> ConsoleError {
        error!("Cognito {} failed: {}", action, err);
        ConsoleError::Directory(format!("{}: {}", action, err))
    }

    impl CognitoDirectory {
        pub async fn new(user_pool_id: String, region: Option<String>) -> Self {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            let client = Client::new(&loader.load().await);
            Self { client, user_pool_id }
        }

        async fn groups_for(&self, username: &str) -> ConsoleResult<Vec<String>> {
            let response = self
                .client
                .admin_list_groups_for_user()
                .user_pool_id(&self.user_pool_id)
                .username(username)
                .send()
                .await
                .map_err(|e| directory_error("AdminListGroupsForUser", e))?;
            Ok(response
                .groups()
                .iter()
                .filter_map(|g| g.group_name().map(str::to_string))
                .collect())
        }

        async fn describe(&self, username: &str) -> ConsoleResult<User> {
            let response = self
                .client
                .admin_get_user()
                .user_pool_id(&self.user_pool_id)
                .username(username)
                .send()
                .await
                .map_err(|e| directory_error("AdminGetUser", e))?;
            let email = response
                .user_attributes()
                .iter()
                .find(|a| a.name() == "email")
                .and_then(|a| a.value().map(str::to_string));
            let created = response.user_create_date().and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), 0));
            Ok(User {
                username: response.username().to_string(),
                email,
                groups: self.groups_for(username).await?,
                created,
            })
        }
    }

    impl UserDirectory for CognitoDirectory {
        async fn list_users(&self) -> ConsoleResult<Vec<User>> {
            let mut users = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let response = self
                    .client
                    .list_users()
                    .user_pool_id(&self.user_pool_id)
                    .set_pagination_token(token.take())
                    .send()
                    .await
                    .map_err(|e| directory_error("ListUsers", e))?;
                for u in response.users() {
                    let Some(username) = u.username() else { continue };
                    let email = u
                        .attributes()
                        .iter()
                        .find(|a| a.name() == "email")
                        .and_then(|a| a.value().map(str::to_string));
                    let created = u.user_create_date().and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), 0));
                    users.push(User {
                        username: username.to_string(),
                        email,
                        groups: self.groups_for(username).await?,
                        created,
                    });
                }
                match response.pagination_token() {
                    Some(next) => token = Some(next.to_string()),
                    None => break,
                }
            }
            debug!("Listed {} users from pool {}", users.len(), self.user_pool_id);
            Ok(users)
        }

        async fn set_user_role(&self, username: &str, role: Role) -> ConsoleResult<User> {
            for group in Role::managed_groups() {
                if group == role.group_name() {
                    continue;
                }
                self.client
                    .admin_remove_user_from_group()
                    .user_pool_id(&self.user_pool_id)
                    .username(username)
                    .group_name(group)
                    .send()
                    .await
                    .map_err(|e| directory_error("AdminRemoveUserFromGroup", e))?;
            }
            if role != Role::Guest {
                self.client
                    .admin_add_user_to_group()
                    .user_pool_id(&self.user_pool_id)
                    .username(username)
                    .group_name(role.group_name())
                    .send()
                    .await
                    .map_err(|e| directory_error("AdminAddUserToGroup", e))?;
            }
            self.describe(username).await
        }
    }
}

/// Keeps the users page in the state store in sync with a directory.
pub struct UserRoster<D> {
    store: StateStore,
    directory: D,
}

impl<D: UserDirectory> UserRoster<D> {
    pub fn new(store: StateStore, directory: D) -> Self {
        Self { store, directory }
    }

    pub async fn refresh(&self) -> ConsoleResult<()> {
        let users = self.directory.list_users().await?;
        info!("Fetched {} users", users.len());
        let index: BTreeMap<String, User> = users.into_iter().map(|u| (u.username.clone(), u)).collect();
        self.store.set_users_index(index);
        Ok(())
    }

    /// Changes a user's role. The user is marked pending for the duration of
    /// the call, whether or not it succeeds.
    pub async fn change_role(&self, username: &str, role: Role) -> ConsoleResult<User> {
        debug!("Changing role of {} to {}", username, role);
        self.store.set_user_pending(username, true);
        let result = self.directory.set_user_role(username, role).await;
        if let Ok(user) = &result {
            self.store.upsert_user(user.clone());
        }
        self.store.set_user_pending(username, false);
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Username,
    Email,
    Role,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub filter: String,
    pub sort: SortField,
    pub descending: bool,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            filter: String::new(),
            sort: SortField::default(),
            descending: false,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPage {
    pub items: Vec<User>,
    pub filtered_count: usize,
    pub page: usize,
    pub pages_count: usize,
}

impl UserQuery {
    fn matches(&self, user: &User) -> bool {
        let needle = self.filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        user.username.to_lowercase().contains(&needle)
            || user.email.as_deref().map_or(false, |e| e.to_lowercase().contains(&needle))
            || user.role().label().to_lowercase().contains(&needle)
    }

    pub fn apply(&self, index: &BTreeMap<String, User>) -> UserPage {
        let mut items: Vec<&User> = index.values().filter(|u| self.matches(u)).collect();
        match self.sort {
            // The index is already ordered by username.
            SortField::Username => {}
            SortField::Email => items.sort_by(|a, b| a.email.cmp(&b.email)),
            SortField::Role => items.sort_by_key(|u| u.role()),
            SortField::Created => items.sort_by_key(|u| u.created),
        }
        if self.descending {
            items.reverse();
        }

        let page_size = self.page_size.max(1);
        let filtered_count = items.len();
        let pages_count = filtered_count.div_ceil(page_size).max(1);
        let page = self.page.clamp(1, pages_count);
        let items = items
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();

        UserPage {
            items,
            filtered_count,
            page,
            pages_count,
        }
    }
}
