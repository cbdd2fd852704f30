// src/cli.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::aws::{FixtureRegionLoader, RegionData, RegionDataLoader};
use crate::config::Config;
use crate::errors::ConsoleResult;
use crate::state::StateStore;
use crate::template::ClusterConfig;
use crate::users::{FileDirectory, Role, SortField, User, UserDirectory, UserQuery, UserRoster};
use crate::wizard::TemplateLoader;

/// clusterwiz: cluster configuration wizard and user administration console
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional path to the clusterwiz configuration file
    #[clap(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Set log level (RUST_LOG takes precedence)
    #[clap(long, value_name = "LEVEL", value_enum, global = true)]
    pub log_level: Option<LogLevelCli>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load cluster templates into the wizard
    #[clap(subcommand)]
    Template(TemplateCommands),

    /// Manage console users
    #[clap(subcommand)]
    Users(UserCommands),
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Apply wizard defaults to a template and print the result
    Load {
        /// Template file (YAML, or JSON with a .json extension)
        file: PathBuf,
        /// Region selected in the console; defaults to the console's own region
        #[clap(long)]
        region: Option<String>,
        #[clap(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List users with their roles
    List {
        /// Case-insensitive match on username, email or role
        #[clap(long, default_value = "")]
        filter: String,
        #[clap(long, value_enum, default_value_t = SortColumn::Username)]
        sort: SortColumn,
        /// Sort descending
        #[clap(long)]
        desc: bool,
        #[clap(long, default_value_t = 1)]
        page: usize,
    },
    /// Change a user's role (guest, user or admin)
    SetRole {
        username: String,
        role: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogLevelCli {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevelCli {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevelCli::Trace => "trace",
            LogLevelCli::Debug => "debug",
            LogLevelCli::Info => "info",
            LogLevelCli::Warn => "warn",
            LogLevelCli::Error => "error",
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum SortColumn {
    Username,
    Email,
    Role,
    Created,
}

impl From<SortColumn> for SortField {
    fn from(column: SortColumn) -> Self {
        match column {
            SortColumn::Username => SortField::Username,
            SortColumn::Email => SortField::Email,
            SortColumn::Role => SortField::Role,
            SortColumn::Created => SortField::Created,
        }
    }
}

/// Reference data source picked from config: a fixture file, else EC2.
enum ConfiguredLoader {
    Fixture(FixtureRegionLoader),
    #[cfg(feature = "aws_integration")]
    Ec2(crate::aws::Ec2RegionLoader),
}

impl RegionDataLoader for ConfiguredLoader {
    async fn load_region_data(&self, region: &str) -> ConsoleResult<RegionData> {
        match self {
            ConfiguredLoader::Fixture(loader) => loader.load_region_data(region).await,
            #[cfg(feature = "aws_integration")]
            ConfiguredLoader::Ec2(loader) => loader.load_region_data(region).await,
        }
    }
}

fn region_loader(config: &Config) -> Result<ConfiguredLoader> {
    if let Some(path) = config.reference_data_path() {
        let loader = FixtureRegionLoader::from_path(&path)
            .with_context(|| format!("Failed to read reference data at {}", path.display()))?;
        return Ok(ConfiguredLoader::Fixture(loader));
    }
    #[cfg(feature = "aws_integration")]
    {
        Ok(ConfiguredLoader::Ec2(crate::aws::Ec2RegionLoader::new(config.aws.profile.clone())))
    }
    #[cfg(not(feature = "aws_integration"))]
    {
        warn!("No reference data configured and AWS integration is not enabled; subnets and key pairs will be empty");
        Ok(ConfiguredLoader::Fixture(FixtureRegionLoader::default()))
    }
}

/// User directory picked from config: a users file, else the Cognito user pool.
enum ConfiguredDirectory {
    File(FileDirectory),
    #[cfg(feature = "aws_integration")]
    Cognito(crate::users::CognitoDirectory),
}

impl UserDirectory for ConfiguredDirectory {
    async fn list_users(&self) -> ConsoleResult<Vec<User>> {
        match self {
            ConfiguredDirectory::File(d) => d.list_users().await,
            #[cfg(feature = "aws_integration")]
            ConfiguredDirectory::Cognito(d) => d.list_users().await,
        }
    }

    async fn set_user_role(&self, username: &str, role: Role) -> ConsoleResult<User> {
        match self {
            ConfiguredDirectory::File(d) => d.set_user_role(username, role).await,
            #[cfg(feature = "aws_integration")]
            ConfiguredDirectory::Cognito(d) => d.set_user_role(username, role).await,
        }
    }
}

async fn user_directory(config: &Config, store: &StateStore) -> Result<ConfiguredDirectory> {
    if let Some(path) = config.users_file_path() {
        info!("Using users file {}", path.display());
        return Ok(ConfiguredDirectory::File(FileDirectory::new(path)));
    }
    match cognito_directory(config, store).await {
        Some(directory) => Ok(directory),
        None => anyhow::bail!("No user directory configured: set users.users_file or users.user_pool_id in config.toml"),
    }
}

#[cfg(feature = "aws_integration")]
async fn cognito_directory(config: &Config, store: &StateStore) -> Option<ConfiguredDirectory> {
    let pool = config.users.user_pool_id.clone()?;
    let region = store.read(|s| s.aws.region.clone());
    Some(ConfiguredDirectory::Cognito(crate::users::CognitoDirectory::new(pool, region).await))
}

#[cfg(not(feature = "aws_integration"))]
async fn cognito_directory(config: &Config, _store: &StateStore) -> Option<ConfiguredDirectory> {
    if config.users.user_pool_id.is_some() {
        warn!("users.user_pool_id is set but AWS integration is not enabled");
    }
    None
}

#[cfg(feature = "aws_integration")]
async fn provider_region(config: &Config) -> Option<String> {
    crate::aws::default_aws_region(config.aws.profile.as_deref()).await
}

#[cfg(not(feature = "aws_integration"))]
async fn provider_region(_config: &Config) -> Option<String> {
    None
}

/// Seeds the console region: config first, then the AWS provider chain.
pub async fn bootstrap_state(config: &Config) -> StateStore {
    let store = StateStore::default();
    let region = match config.aws.region.clone() {
        Some(region) => Some(region),
        None => provider_region(config).await,
    };
    match region {
        Some(region) => store.set_aws_region(region),
        None => warn!("Console region is unknown; set aws.region in config.toml"),
    }
    store
}

pub async fn handle_command(command: Commands, config: &Config, store: StateStore) -> Result<()> {
    match command {
        Commands::Template(cmd) => handle_template_command(cmd, config, store).await,
        Commands::Users(cmd) => handle_user_command(cmd, config, store).await,
    }
}

async fn handle_template_command(command: TemplateCommands, config: &Config, store: StateStore) -> Result<()> {
    match command {
        TemplateCommands::Load { file, region, format } => {
            let template = ClusterConfig::from_path(&file)
                .with_context(|| format!("Failed to load template {}", file.display()))?;
            if let Some(region) = region {
                store.set_selected_region(region);
            }

            let loader = TemplateLoader::new(store.clone(), region_loader(config)?);
            if let Err(e) = loader.preload_active_region().await {
                warn!("Could not preload reference data for the active region: {}", e);
            }
            loader.resolve_and_load(template).await?;

            let wizard = store.snapshot().wizard;
            let normalized = wizard.config.unwrap_or_default();
            info!(
                page = ?wizard.page,
                vpc = ?wizard.vpc,
                custom_ami = wizard.custom_ami_enabled,
                os = ?normalized.os(),
                scheduler = ?normalized.scheduler(),
                head_node = ?normalized.head_node_instance_type(),
                "Template loaded into wizard"
            );
            let rendered = match format {
                OutputFormat::Yaml => normalized.to_yaml_string()?,
                OutputFormat::Json => normalized.to_json_string()?,
            };
            println!("{}", rendered.trim_end());
            Ok(())
        }
    }
}

async fn handle_user_command(command: UserCommands, config: &Config, store: StateStore) -> Result<()> {
    let roster = UserRoster::new(store.clone(), user_directory(config, &store).await?);
    match command {
        UserCommands::List { filter, sort, desc, page } => {
            roster.refresh().await?;
            let query = UserQuery {
                filter,
                sort: sort.into(),
                descending: desc,
                page,
                page_size: config.users.page_size,
            };
            let index = store.read(|s| s.users.index.clone()).unwrap_or_default();
            print!("{}", render_user_table(&query, &index));
            Ok(())
        }
        UserCommands::SetRole { username, role } => {
            let role: Role = role.parse()?;
            let user = roster.change_role(&username, role).await?;
            println!("{} is now {}", user.username, user.role().label());
            Ok(())
        }
    }
}

fn render_user_table(query: &UserQuery, index: &std::collections::BTreeMap<String, User>) -> String {
    if index.is_empty() {
        return "No users to display.\n".to_string();
    }
    let page = query.apply(index);
    if page.filtered_count == 0 {
        return "No users match the filters.\n".to_string();
    }

    let mut out = format!("{:<24} {:<32} {:<6} {}\n", "Username", "Email", "Role", "Created");
    for user in &page.items {
        let created = user
            .created
            .map(|c| c.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<24} {:<32} {:<6} {}\n",
            user.username,
            user.email.as_deref().unwrap_or("-"),
            user.role().label(),
            created
        ));
    }
    out.push_str(&format!(
        "Results: {} (page {}/{})\n",
        page.filtered_count, page.page, page.pages_count
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_template_load() {
        let cli = Cli::parse_from(["clusterwiz", "template", "load", "cluster.yaml", "--region", "eu-west-1", "--format", "json"]);
        match cli.command {
            Commands::Template(TemplateCommands::Load { file, region, format }) => {
                assert_eq!(file, PathBuf::from("cluster.yaml"));
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_users_commands_with_global_flags() {
        let cli = Cli::parse_from(["clusterwiz", "users", "list", "--filter", "adm", "--desc", "--log-level", "debug"]);
        assert!(matches!(cli.log_level, Some(LogLevelCli::Debug)));
        assert!(matches!(
            cli.command,
            Commands::Users(UserCommands::List { ref filter, desc: true, page: 1, .. }) if filter == "adm"
        ));

        let cli = Cli::parse_from(["clusterwiz", "users", "set-role", "alice", "admin"]);
        assert!(matches!(cli.command, Commands::Users(UserCommands::SetRole { .. })));
    }

    #[test]
    fn sort_column_maps_to_sort_field() {
        let cli = Cli::parse_from(["clusterwiz", "users", "list", "--sort", "created"]);
        let Commands::Users(UserCommands::List { sort, .. }) = cli.command else {
            panic!("expected users list");
        };
        assert_eq!(SortField::from(sort), SortField::Created);

        assert!(Cli::try_parse_from(["clusterwiz", "users", "list", "--sort", "shoe-size"]).is_err());
    }

    #[test]
    fn user_table_handles_empty_and_unmatched() {
        let mut index = std::collections::BTreeMap::new();
        assert_eq!(render_user_table(&UserQuery::default(), &index), "No users to display.\n");

        index.insert(
            "alice".to_string(),
            User { username: "alice".into(), email: None, groups: vec!["admin".into()], created: None },
        );
        let table = render_user_table(&UserQuery::default(), &index);
        assert!(table.contains("alice"));
        assert!(table.contains("Admin"));
        assert!(table.ends_with("Results: 1 (page 1/1)\n"));

        let query = UserQuery { filter: "bob".into(), ..Default::default() };
        assert_eq!(render_user_table(&query, &index), "No users match the filters.\n");
    }

    #[tokio::test]
    async fn template_load_uses_fixture_reference_data() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("reference.yaml");
        std::fs::write(&reference, "us-east-1:\n  KeyPairs:\n    - KeyName: kp-a\n").unwrap();
        let template = dir.path().join("cluster.yaml");
        std::fs::write(&template, "HeadNode: {Ssh: {KeyName: missing}}\n").unwrap();

        let mut config = Config::default();
        config.aws.region = Some("us-east-1".into());
        config.aws.reference_data = Some(reference.display().to_string());

        let store = bootstrap_state(&config).await;
        handle_command(
            Commands::Template(TemplateCommands::Load { file: template, region: None, format: OutputFormat::Yaml }),
            &config,
            store.clone(),
        )
        .await
        .unwrap();

        let wizard = store.snapshot().wizard;
        let normalized = wizard.config.unwrap();
        assert_eq!(normalized.region.as_deref(), Some("us-east-1"));
        assert_eq!(normalized.head_node_key_name(), Some("kp-a"));
    }

    #[tokio::test]
    async fn set_role_updates_users_file() {
        let dir = tempfile::tempdir().unwrap();
        let users = dir.path().join("users.yaml");
        std::fs::write(&users, "- username: alice\n  groups: [user]\n").unwrap();

        let mut config = Config::default();
        config.users.users_file = Some(users.display().to_string());
        let store = StateStore::default();

        handle_command(
            Commands::Users(UserCommands::SetRole { username: "alice".into(), role: "admin".into() }),
            &config,
            store.clone(),
        )
        .await
        .unwrap();

        let listed = FileDirectory::new(&users).list_users().await.unwrap();
        assert_eq!(listed[0].role(), Role::Admin);
        assert!(handle_command(
            Commands::Users(UserCommands::SetRole { username: "alice".into(), role: "root".into() }),
            &config,
            store,
        )
        .await
        .is_err());
    }
}
