use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::BoxId;
use crate::error::HelixError;

const DEFAULT_RESERVED_FLOOR_BYTES: u64 = 100 * 1024 * 1024 * 1024;
const DEFAULT_STAGING_CEILING_BYTES: u64 = 10 * 1024 * 1024 * 1024 * 1024;
const DEFAULT_UPLOAD_WORKERS: usize = 10;
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 40;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub store_root: String,
    pub scratch_root: String,
    #[serde(default)]
    pub reserved_floor_bytes: Option<u64>,
    #[serde(default)]
    pub staging_ceiling_bytes: Option<u64>,
    #[serde(default)]
    pub upload_workers: Option<usize>,
    #[serde(default)]
    pub max_concurrent_uploads: Option<usize>,
    pub encryption_recipients: Vec<String>,
    #[serde(default)]
    pub scheduler: Option<SchedulerEntry>,
    #[serde(default)]
    pub transfer: Option<TransferEntry>,
    pub enum_service_url: String,
    #[serde(default)]
    pub boxes: Vec<BoxEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SchedulerEntry {
    #[serde(default)]
    pub submit_binary: Option<String>,
    #[serde(default)]
    pub accounting_binary: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransferEntry {
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub remote_host: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BoxEntry {
    pub id: String,
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub staging_path: String,
}

#[derive(Debug, Clone)]
pub struct BoxConfig {
    pub id: BoxId,
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub staging_path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct Quotas {
    pub reserved_floor_bytes: u64,
    pub staging_ceiling_bytes: u64,
    pub upload_workers: usize,
    pub max_concurrent_uploads: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store_root: Utf8PathBuf,
    pub scratch_root: Utf8PathBuf,
    pub quotas: Quotas,
    pub encryption_recipients: Vec<String>,
    pub scheduler_submit_binary: String,
    pub scheduler_accounting_binary: String,
    pub transfer_binary: String,
    pub transfer_remote_host: Option<String>,
    pub enum_service_url: String,
    pub boxes: BTreeMap<BoxId, BoxConfig>,
}

impl ResolvedConfig {
    pub fn box_config(&self, id: &BoxId) -> Result<&BoxConfig, HelixError> {
        self.boxes
            .get(id)
            .ok_or_else(|| HelixError::UnknownBox(id.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HelixError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from("helix-sub.json"),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(HelixError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| HelixError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HelixError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HelixError> {
        let schema_version = config.schema_version.unwrap_or(1);

        if config.encryption_recipients.is_empty() {
            return Err(HelixError::ConfigParse(
                "encryption_recipients must not be empty".to_string(),
            ));
        }

        let mut boxes = BTreeMap::new();
        for entry in config.boxes {
            let id: BoxId = entry.id.parse()?;
            let resolved = BoxConfig {
                id: id.clone(),
                api_url: entry.api_url.trim_end_matches('/').to_string(),
                username: entry.username,
                password: entry.password,
                staging_path: Utf8PathBuf::from(entry.staging_path),
            };
            if boxes.insert(id.clone(), resolved).is_some() {
                return Err(HelixError::ConfigParse(format!("duplicate box id {id}")));
            }
        }
        if boxes.is_empty() {
            return Err(HelixError::ConfigParse(
                "at least one box must be configured".to_string(),
            ));
        }

        let scheduler = config.scheduler.unwrap_or(SchedulerEntry {
            submit_binary: None,
            accounting_binary: None,
        });
        let transfer = config.transfer.unwrap_or(TransferEntry {
            binary: None,
            remote_host: None,
        });

        Ok(ResolvedConfig {
            schema_version,
            store_root: Utf8PathBuf::from(config.store_root),
            scratch_root: Utf8PathBuf::from(config.scratch_root),
            quotas: Quotas {
                reserved_floor_bytes: config
                    .reserved_floor_bytes
                    .unwrap_or(DEFAULT_RESERVED_FLOOR_BYTES),
                staging_ceiling_bytes: config
                    .staging_ceiling_bytes
                    .unwrap_or(DEFAULT_STAGING_CEILING_BYTES),
                upload_workers: config.upload_workers.unwrap_or(DEFAULT_UPLOAD_WORKERS),
                max_concurrent_uploads: config
                    .max_concurrent_uploads
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS),
            },
            encryption_recipients: config.encryption_recipients,
            scheduler_submit_binary: scheduler
                .submit_binary
                .unwrap_or_else(|| "sbatch".to_string()),
            scheduler_accounting_binary: scheduler
                .accounting_binary
                .unwrap_or_else(|| "sacct".to_string()),
            transfer_binary: transfer.binary.unwrap_or_else(|| "ascp".to_string()),
            transfer_remote_host: transfer.remote_host,
            enum_service_url: config.enum_service_url.trim_end_matches('/').to_string(),
            boxes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            schema_version: None,
            store_root: "/var/lib/helix/store".to_string(),
            scratch_root: "/scratch/helix".to_string(),
            reserved_floor_bytes: None,
            staging_ceiling_bytes: None,
            upload_workers: None,
            max_concurrent_uploads: None,
            encryption_recipients: vec!["archive-key-1".to_string()],
            scheduler: None,
            transfer: None,
            enum_service_url: "https://archive.example.org/enums/".to_string(),
            boxes: vec![BoxEntry {
                id: "box-001".to_string(),
                api_url: "https://archive.example.org/api/".to_string(),
                username: "submitter".to_string(),
                password: "secret".to_string(),
                staging_path: "/staging/box-001".to_string(),
            }],
        }
    }

    #[test]
    fn resolve_applies_defaults() {
        let resolved = ConfigLoader::resolve_config(minimal_config()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.quotas.upload_workers, DEFAULT_UPLOAD_WORKERS);
        assert_eq!(resolved.scheduler_submit_binary, "sbatch");
        assert_eq!(resolved.enum_service_url, "https://archive.example.org/enums");
        let box_id: BoxId = "box-001".parse().unwrap();
        let box_config = resolved.box_config(&box_id).unwrap();
        assert_eq!(box_config.api_url, "https://archive.example.org/api");
    }

    #[test]
    fn resolve_rejects_empty_recipients() {
        let mut config = minimal_config();
        config.encryption_recipients.clear();
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert!(matches!(err, HelixError::ConfigParse(_)));
    }

    #[test]
    fn resolve_rejects_duplicate_boxes() {
        let mut config = minimal_config();
        config.boxes.push(BoxEntry {
            id: "box-001".to_string(),
            api_url: "https://other.example.org".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            staging_path: "/staging/dup".to_string(),
        });
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert!(matches!(err, HelixError::ConfigParse(_)));
    }
}
