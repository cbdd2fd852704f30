// src/state.rs
// Application state shared by the wizard and the users page. A single store is
// the source of truth; observers subscribe to it instead of polling.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::aws::RegionData;
use crate::template::ClusterConfig;
use crate::users::User;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPair {
    pub key_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WizardPage {
    Cluster,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsState {
    /// Region the console itself runs against.
    pub region: Option<String>,
    /// Region the cached reference data below belongs to.
    pub loaded_region: Option<String>,
    pub subnets: Vec<Subnet>,
    pub keypairs: Vec<KeyPair>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardState {
    pub loaded: bool,
    pub config: Option<ClusterConfig>,
    pub page: Option<WizardPage>,
    pub custom_ami_enabled: bool,
    pub vpc: Option<String>,
    pub error: Option<String>,
    pub load_token: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsersState {
    /// `None` until the first listing arrives.
    pub index: Option<BTreeMap<String, User>>,
    /// Usernames with a role change in flight.
    pub pending: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub aws: AwsState,
    pub selected_region: Option<String>,
    pub wizard: WizardState,
    pub users: UsersState,
}

impl AppState {
    /// The console's own region, or empty when unknown.
    pub fn default_region(&self) -> String {
        self.aws.region.clone().unwrap_or_default()
    }

    /// The region the operator selected, falling back to the console's region.
    pub fn active_region(&self) -> String {
        self.selected_region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_region())
    }
}

#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<AppState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl StateStore {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Applies a write and notifies every subscriber.
    pub fn update(&self, f: impl FnOnce(&mut AppState)) {
        self.tx.send_modify(f);
    }

    // Typed writers used across the crate.

    pub fn set_aws_region(&self, region: impl Into<String>) {
        let region = region.into();
        self.update(|s| s.aws.region = Some(region));
    }

    pub fn set_selected_region(&self, region: impl Into<String>) {
        let region = region.into();
        self.update(|s| s.selected_region = Some(region));
    }

    pub fn apply_region_data(&self, region: &str, data: RegionData) {
        self.update(|s| {
            s.aws.loaded_region = Some(region.to_string());
            s.aws.subnets = data.subnets;
            s.aws.keypairs = data.keypairs;
        });
    }

    pub fn set_custom_ami_enabled(&self, enabled: bool) {
        self.update(|s| s.wizard.custom_ami_enabled = enabled);
    }

    pub fn set_wizard_vpc(&self, vpc: Option<String>) {
        self.update(|s| s.wizard.vpc = vpc);
    }

    pub fn set_wizard_page(&self, page: WizardPage) {
        self.update(|s| s.wizard.page = Some(page));
    }

    pub fn set_wizard_error(&self, error: Option<String>) {
        self.update(|s| s.wizard.error = error);
    }

    pub fn commit_wizard_config(&self, config: ClusterConfig) {
        self.update(|s| {
            s.wizard.loaded = true;
            s.wizard.config = Some(config);
        });
    }

    /// Writes `Region` into the wizard's config, creating the config if needed.
    pub fn set_wizard_config_region(&self, region: impl Into<String>) {
        let region = region.into();
        self.update(|s| {
            s.wizard.config.get_or_insert_with(ClusterConfig::default).region = Some(region);
        });
    }

    pub fn set_wizard_key_name(&self, key_name: impl Into<String>) {
        let key_name = key_name.into();
        self.update(|s| {
            s.wizard
                .config
                .get_or_insert_with(ClusterConfig::default)
                .set_head_node_key_name(key_name);
        });
    }

    /// Clears the previous load from the wizard, stamps a fresh load token
    /// and returns it.
    pub fn begin_load(&self) -> Uuid {
        let token = Uuid::new_v4();
        self.update(|s| {
            s.wizard = WizardState {
                load_token: Some(token),
                ..WizardState::default()
            };
        });
        token
    }

    pub fn is_current_load(&self, token: Uuid) -> bool {
        self.read(|s| s.wizard.load_token == Some(token))
    }

    pub fn set_users_index(&self, index: BTreeMap<String, User>) {
        self.update(|s| s.users.index = Some(index));
    }

    pub fn upsert_user(&self, user: User) {
        self.update(|s| {
            s.users
                .index
                .get_or_insert_with(BTreeMap::new)
                .insert(user.username.clone(), user);
        });
    }

    pub fn set_user_pending(&self, username: &str, pending: bool) {
        self.update(|s| {
            if pending {
                s.users.pending.insert(username.to_string());
            } else {
                s.users.pending.remove(username);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_region_falls_back_to_console_region() {
        let mut state = AppState::default();
        assert_eq!(state.active_region(), "");

        state.aws.region = Some("us-west-2".into());
        assert_eq!(state.active_region(), "us-west-2");

        state.selected_region = Some("eu-central-1".into());
        assert_eq!(state.active_region(), "eu-central-1");
        assert_eq!(state.default_region(), "us-west-2");
    }

    #[test]
    fn writes_notify_subscribers() {
        let store = StateStore::default();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_wizard_page(WizardPage::Cluster);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().wizard.page, Some(WizardPage::Cluster));
    }

    #[test]
    fn key_name_write_creates_missing_config() {
        let store = StateStore::default();
        store.set_wizard_key_name("kp-a");
        let key = store.read(|s| {
            s.wizard
                .config
                .as_ref()
                .and_then(|c| c.head_node_key_name())
                .map(str::to_string)
        });
        assert_eq!(key.as_deref(), Some("kp-a"));
    }

    #[test]
    fn load_tokens_are_latest_wins() {
        let store = StateStore::default();
        let first = store.begin_load();
        assert!(store.is_current_load(first));
        let second = store.begin_load();
        assert!(!store.is_current_load(first));
        assert!(store.is_current_load(second));
    }

    #[test]
    fn begin_load_clears_previous_wizard() {
        let store = StateStore::default();
        store.commit_wizard_config(ClusterConfig::default());
        store.set_wizard_page(WizardPage::Cluster);
        store.set_wizard_vpc(Some("vpc-9".into()));
        store.set_custom_ami_enabled(true);
        store.set_wizard_error(Some("boom".into()));

        let token = store.begin_load();
        let wizard = store.snapshot().wizard;
        assert_eq!(
            wizard,
            WizardState {
                load_token: Some(token),
                ..WizardState::default()
            }
        );
    }

    #[test]
    fn region_data_replaces_cached_lists() {
        let store = StateStore::default();
        store.apply_region_data(
            "us-east-1",
            RegionData {
                subnets: vec![Subnet { subnet_id: "subnet-1".into(), vpc_id: "vpc-9".into() }],
                keypairs: vec![KeyPair { key_name: "kp-a".into() }],
            },
        );
        store.apply_region_data("eu-west-1", RegionData::default());
        let aws = store.snapshot().aws;
        assert_eq!(aws.loaded_region.as_deref(), Some("eu-west-1"));
        assert!(aws.subnets.is_empty());
        assert!(aws.keypairs.is_empty());
    }

    #[test]
    fn pending_users_are_tracked() {
        let store = StateStore::default();
        store.set_user_pending("alice", true);
        assert!(store.read(|s| s.users.pending.contains("alice")));
        store.set_user_pending("alice", false);
        assert!(store.read(|s| s.users.pending.is_empty()));
    }
}
