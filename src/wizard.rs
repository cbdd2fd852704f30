// src/wizard.rs
// Hydrates the cluster wizard from a template: resolves the template's region,
// refreshes region-scoped reference data when needed, then fills in defaults.

use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::aws::RegionDataLoader;
use crate::errors::{ConsoleError, ConsoleResult};
use crate::state::{StateStore, WizardPage};
use crate::template::{is_set, ClusterConfig, Flag};

pub const DEFAULT_OS: &str = "alinux2";
pub const DEFAULT_SCHEDULER: &str = "slurm";
pub const DEFAULT_HEAD_NODE_INSTANCE_TYPE: &str = "t2.micro";
pub const LANDING_PAGE: WizardPage = WizardPage::Cluster;

pub struct TemplateLoader<L> {
    store: StateStore,
    loader: L,
}

impl<L: RegionDataLoader> TemplateLoader<L> {
    pub fn new(store: StateStore, loader: L) -> Self {
        Self { store, loader }
    }

    /// Loads reference data for the active region so templates without an
    /// explicit region can be defaulted against it.
    pub async fn preload_active_region(&self) -> ConsoleResult<()> {
        let region = self.store.read(|s| s.active_region());
        if region.is_empty() {
            warn!("No active region; skipping reference data preload");
            return Ok(());
        }
        let data = self.reload(&region).await?;
        self.store.apply_region_data(&region, data);
        Ok(())
    }

    /// Loads a template into the wizard.
    ///
    /// A template without `Region` takes the active region and is normalized
    /// straight away against the cached reference data. A template naming its
    /// own region has that region published to the wizard first, then the
    /// region's reference data reloaded, and only then is it normalized.
    ///
    /// Overlapping loads are latest-wins: a load whose reload finishes after a
    /// newer load started returns `LoadSuperseded` without touching the wizard.
    pub async fn resolve_and_load(&self, mut config: ClusterConfig) -> ConsoleResult<()> {
        let token = self.store.begin_load();
        let active_region = self.store.read(|s| s.active_region());

        let chosen_region = config.region.clone().filter(|r| !r.is_empty());
        let Some(chosen_region) = chosen_region else {
            debug!("Template has no region, using active region '{}'", active_region);
            config.region = Some(active_region);
            self.normalize(config);
            return Ok(());
        };

        info!("Template selects region {}, reloading reference data", chosen_region);
        self.store.set_wizard_config_region(chosen_region.clone());

        let reloaded = self.reload(&chosen_region).await;
        if !self.store.is_current_load(token) {
            warn!("Dropping template load for {}: a newer load is in progress", chosen_region);
            return Err(ConsoleError::LoadSuperseded);
        }
        match reloaded {
            Ok(data) => {
                self.store.apply_region_data(&chosen_region, data);
                self.normalize(config);
                Ok(())
            }
            Err(e) => {
                error!("Reference data reload for {} failed: {}", chosen_region, e);
                self.store.set_wizard_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn reload(&self, region: &str) -> ConsoleResult<crate::aws::RegionData> {
        self.loader.load_region_data(region).await.map_err(|e| match e {
            ConsoleError::RegionData { .. } => e,
            other => ConsoleError::RegionData {
                region: region.to_string(),
                message: other.to_string(),
            },
        })
    }

    /// Fills in wizard defaults and commits the template to the wizard.
    /// Explicit values are kept, except a non-boolean `GdrSupport` on an EFA
    /// resource and a key pair that does not exist in the current region.
    /// The custom-AMI flag and the VPC are rewritten from this template alone.
    pub fn normalize(&self, mut config: ClusterConfig) {
        let (subnets, keypairs) = self.store.read(|s| (s.aws.subnets.clone(), s.aws.keypairs.clone()));

        self.store
            .set_custom_ami_enabled(config.custom_ami().map_or(false, |ami| !ami.is_empty()));

        {
            let image = config.image_mut();
            if !is_set(&image.os) && !is_set(&image.custom_ami) {
                image.os = Some(DEFAULT_OS.to_string());
            }
        }

        let scheduling = config.scheduling_mut();
        if !is_set(&scheduling.scheduler) {
            scheduling.scheduler = Some(DEFAULT_SCHEDULER.to_string());
        }

        let head_node = config.head_node_mut();
        if !is_set(&head_node.instance_type) {
            head_node.instance_type = Some(DEFAULT_HEAD_NODE_INSTANCE_TYPE.to_string());
        }

        let vpc_by_subnet: HashMap<&str, &str> = subnets
            .iter()
            .map(|s| (s.subnet_id.as_str(), s.vpc_id.as_str()))
            .collect();
        let vpc = config
            .head_node_subnet_id()
            .filter(|s| !s.is_empty())
            .and_then(|subnet_id| {
                let vpc = vpc_by_subnet.get(subnet_id).map(|v| v.to_string());
                if vpc.is_none() {
                    debug!("Subnet {} is not in the cached subnets, leaving VPC unset", subnet_id);
                }
                vpc
            });
        self.store.set_wizard_vpc(vpc);

        for resource in config.compute_resources_mut() {
            let Some(efa) = resource.efa.as_mut() else { continue };
            if efa.enabled.as_ref().map_or(false, Flag::is_truthy)
                && !efa.gdr_support.as_ref().map_or(false, Flag::is_bool)
            {
                efa.gdr_support = Some(Flag::Bool(true));
            }
        }

        let key_name = config.head_node_key_name().map(str::to_string);
        self.store.commit_wizard_config(config);

        let known_keys: HashSet<&str> = keypairs.iter().map(|k| k.key_name.as_str()).collect();
        if let Some(first) = keypairs.first() {
            if !key_name.as_deref().map_or(false, |k| known_keys.contains(k)) {
                info!(
                    "Key pair {:?} not found in region, using {}",
                    key_name, first.key_name
                );
                self.store.set_wizard_key_name(first.key_name.clone());
            }
        }

        self.store.set_wizard_page(LANDING_PAGE);
        debug!("Wizard loaded: {:?}", self.store.read(|s| s.wizard.config.clone()));
    }
}
