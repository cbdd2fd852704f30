// src/aws.rs
// Region-scoped reference data (subnets, key pairs) used while defaulting templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{ConsoleError, ConsoleResult};
use crate::state::{KeyPair, Subnet};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RegionData {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default, rename = "KeyPairs")]
    pub keypairs: Vec<KeyPair>,
}

/// Loads the reference data for one region.
pub trait RegionDataLoader: Send + Sync {
    fn load_region_data(&self, region: &str) -> impl Future<Output = ConsoleResult<RegionData>> + Send;
}

/// Reference data read from a file, keyed by region:
///
/// ```yaml
/// us-east-1:
///   Subnets:
///     - SubnetId: subnet-1
///       VpcId: vpc-9
///   KeyPairs:
///     - KeyName: kp-a
/// ```
#[derive(Debug, Clone, Default)]
pub struct FixtureRegionLoader {
    regions: BTreeMap<String, RegionData>,
}

impl FixtureRegionLoader {
    pub fn new(regions: BTreeMap<String, RegionData>) -> Self {
        Self { regions }
    }

    pub fn from_path(path: &Path) -> ConsoleResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let regions: BTreeMap<String, RegionData> = serde_yaml::from_str(&content)?;
        info!("Loaded reference data for {} region(s) from {}", regions.len(), path.display());
        Ok(Self::new(regions))
    }
}

impl RegionDataLoader for FixtureRegionLoader {
    async fn load_region_data(&self, region: &str) -> ConsoleResult<RegionData> {
        debug!("Reading fixture reference data for {}", region);
        self.regions
            .get(region)
            .cloned()
            .ok_or_else(|| ConsoleError::UnknownRegion(region.to_string()))
    }
}

/// Region from the AWS provider chain (env, profile, IMDS).
#[cfg(feature = "aws_integration")]
pub async fn default_aws_region(profile: Option<&str>) -> Option<String> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;
    sdk_config.region().map(|r| r.to_string())
}

#[cfg(feature = "aws_integration")]
pub use ec2::Ec2RegionLoader;

#[cfg(feature = "aws_integration")]
mod ec2 {
    use aws_config::{BehaviorVersion, Region};
    use tracing::{debug, error};

    use super::{RegionData, RegionDataLoader};
    use crate::errors::{ConsoleError, ConsoleResult};
    use crate::state::{KeyPair, Subnet};

    /// Describes subnets and key pairs through EC2. A client is built per
    /// region since the wizard may switch regions between loads.
    #[derive(Debug, Clone, Default)]
    pub struct Ec2RegionLoader {
        profile: Option<String>,
    }

    impl Ec2RegionLoader {
        pub fn new(profile: Option<String>) -> Self {
            Self { profile }
        }

        async fn client(&self, region: &str) -> aws_sdk_ec2::Client {
            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()));
            if let Some(profile) = &self.profile {
                loader = loader.profile_name(profile);
            }
            aws_sdk_ec2::Client::new(&loader.load().await)
        }
    }

    fn region_error(region: &str, err: impl std::fmt::Display) -> ConsoleError {
        ConsoleError::RegionData {
            region: region.to_string(),
            message: err.to_string(),
        }
    }

    impl RegionDataLoader for Ec2RegionLoader {
        async fn load_region_data(&self, region: &str) -> ConsoleResult<RegionData> {
            let client = self.client(region).await;

            let subnets = client.describe_subnets().send().await.map_err(|e| {
                error!("DescribeSubnets failed in {}: {}", region, e);
                region_error(region, e)
            })?;
            let subnets: Vec<Subnet> = subnets
                .subnets()
                .iter()
                .filter_map(|s| {
                    Some(Subnet {
                        subnet_id: s.subnet_id()?.to_string(),
                        vpc_id: s.vpc_id()?.to_string(),
                    })
                })
                .collect();

            let keypairs = client.describe_key_pairs().send().await.map_err(|e| {
                error!("DescribeKeyPairs failed in {}: {}", region, e);
                region_error(region, e)
            })?;
            let keypairs: Vec<KeyPair> = keypairs
                .key_pairs()
                .iter()
                .filter_map(|k| k.key_name().map(|name| KeyPair { key_name: name.to_string() }))
                .collect();

            debug!(region = %region, subnets = subnets.len(), keypairs = keypairs.len(), "Loaded EC2 reference data");
            Ok(RegionData { subnets, keypairs })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_loader_reads_regions_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.yaml");
        std::fs::write(
            &path,
            r#"
us-east-1:
  Subnets:
    - SubnetId: subnet-1
      VpcId: vpc-9
  KeyPairs:
    - KeyName: kp-a
    - KeyName: kp-b
eu-west-1: {}
"#,
        )
        .unwrap();

        let loader = FixtureRegionLoader::from_path(&path).unwrap();
        let data = loader.load_region_data("us-east-1").await.unwrap();
        assert_eq!(data.subnets, vec![Subnet { subnet_id: "subnet-1".into(), vpc_id: "vpc-9".into() }]);
        assert_eq!(data.keypairs.len(), 2);

        let empty = loader.load_region_data("eu-west-1").await.unwrap();
        assert_eq!(empty, RegionData::default());
    }

    #[tokio::test]
    async fn fixture_loader_rejects_unknown_regions() {
        let loader = FixtureRegionLoader::default();
        let err = loader.load_region_data("ap-south-1").await.unwrap_err();
        assert!(matches!(err, ConsoleError::UnknownRegion(r) if r == "ap-south-1"));
    }
}
