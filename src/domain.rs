use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::HelixError;

/// Legacy job names encoded `alias__filename`; aliases and destination
/// names containing the delimiter are rejected outright.
pub const RESERVED_DELIMITER: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Sample,
    Experiment,
    Run,
    Analysis,
    Dataset,
    Study,
    Policy,
    Dac,
}

impl ObjectType {
    pub fn is_file_bearing(&self) -> bool {
        matches!(self, ObjectType::Run | ObjectType::Analysis)
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            ObjectType::Sample => "samples",
            ObjectType::Experiment => "experiments",
            ObjectType::Run => "runs",
            ObjectType::Analysis => "analyses",
            ObjectType::Dataset => "datasets",
            ObjectType::Study => "studies",
            ObjectType::Policy => "policies",
            ObjectType::Dac => "dacs",
        }
    }

    /// Path segment used by the registry REST API.
    pub fn api_segment(&self) -> &'static str {
        match self {
            ObjectType::Sample => "samples",
            ObjectType::Experiment => "experiments",
            ObjectType::Run => "runs",
            ObjectType::Analysis => "analyses",
            ObjectType::Dataset => "datasets",
            ObjectType::Study => "studies",
            ObjectType::Policy => "policies",
            ObjectType::Dac => "dacs",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Sample => "sample",
            ObjectType::Experiment => "experiment",
            ObjectType::Run => "run",
            ObjectType::Analysis => "analysis",
            ObjectType::Dataset => "dataset",
            ObjectType::Study => "study",
            ObjectType::Policy => "policy",
            ObjectType::Dac => "dac",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ObjectType {
    type Err = HelixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sample" => Ok(ObjectType::Sample),
            "experiment" => Ok(ObjectType::Experiment),
            "run" => Ok(ObjectType::Run),
            "analysis" => Ok(ObjectType::Analysis),
            "dataset" => Ok(ObjectType::Dataset),
            "study" => Ok(ObjectType::Study),
            "policy" => Ok(ObjectType::Policy),
            "dac" => Ok(ObjectType::Dac),
            _ => Err(HelixError::InvalidObjectType(value.to_string())),
        }
    }
}

/// Per-object lifecycle. File-bearing types walk every state; metadata-only
/// types jump from `Valid` straight to `Submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Start,
    Clean,
    Ready,
    Valid,
    Encrypt,
    Encrypting,
    Upload,
    Uploading,
    Uploaded,
    Submit,
    Submitted,
}

impl Status {
    pub fn sequence_index(&self) -> u8 {
        match self {
            Status::Start => 0,
            Status::Clean => 1,
            Status::Ready => 2,
            Status::Valid => 3,
            Status::Encrypt => 4,
            Status::Encrypting => 5,
            Status::Upload => 6,
            Status::Uploading => 7,
            Status::Uploaded => 8,
            Status::Submit => 9,
            Status::Submitted => 10,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Submitted)
    }

    pub fn is_file_pipeline(&self) -> bool {
        matches!(
            self,
            Status::Encrypt
                | Status::Encrypting
                | Status::Upload
                | Status::Uploading
                | Status::Uploaded
        )
    }

    /// The next state for an object of the given type, or `None` from the
    /// terminal state.
    pub fn next(&self, object_type: ObjectType) -> Option<Status> {
        let next = match self {
            Status::Start => Status::Clean,
            Status::Clean => Status::Ready,
            Status::Ready => Status::Valid,
            Status::Valid if object_type.is_file_bearing() => Status::Encrypt,
            Status::Valid => Status::Submit,
            Status::Encrypt => Status::Encrypting,
            Status::Encrypting => Status::Upload,
            Status::Upload => Status::Uploading,
            Status::Uploading => Status::Uploaded,
            Status::Uploaded => Status::Submit,
            Status::Submit => Status::Submitted,
            Status::Submitted => return None,
        };
        Some(next)
    }

    /// In-flight pipeline states may fall back exactly one step on verified
    /// failure. Every other state holds in place.
    pub fn rollback(&self) -> Option<Status> {
        match self {
            Status::Encrypting => Some(Status::Encrypt),
            Status::Uploading => Some(Status::Upload),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Start => "START",
            Status::Clean => "CLEAN",
            Status::Ready => "READY",
            Status::Valid => "VALID",
            Status::Encrypt => "ENCRYPT",
            Status::Encrypting => "ENCRYPTING",
            Status::Upload => "UPLOAD",
            Status::Uploading => "UPLOADING",
            Status::Uploaded => "UPLOADED",
            Status::Submit => "SUBMIT",
            Status::Submitted => "SUBMITTED",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Status {
    type Err = HelixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "START" => Ok(Status::Start),
            "CLEAN" => Ok(Status::Clean),
            "READY" => Ok(Status::Ready),
            "VALID" => Ok(Status::Valid),
            "ENCRYPT" => Ok(Status::Encrypt),
            "ENCRYPTING" => Ok(Status::Encrypting),
            "UPLOAD" => Ok(Status::Upload),
            "UPLOADING" => Ok(Status::Uploading),
            "UPLOADED" => Ok(Status::Uploaded),
            "SUBMIT" => Ok(Status::Submit),
            "SUBMITTED" => Ok(Status::Submitted),
            _ => Err(HelixError::InvalidStatus(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alias(String);

impl Alias {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Alias {
    type Err = HelixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains(RESERVED_DELIMITER)
            && trimmed.chars().all(|ch| !ch.is_whitespace());
        if !is_valid {
            return Err(HelixError::InvalidAlias(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoxId(String);

impl BoxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BoxId {
    type Err = HelixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(HelixError::InvalidBoxId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Vcf,
    Bam,
    Cram,
    Fastq,
    Tabix,
    Bai,
    Other,
}

impl FileType {
    /// Controlled-vocabulary display value sent to the enum service.
    pub fn display_value(&self) -> &'static str {
        match self {
            FileType::Vcf => "vcf",
            FileType::Bam => "bam",
            FileType::Cram => "cram",
            FileType::Fastq => "fastq",
            FileType::Tabix => "tabix",
            FileType::Bai => "bai",
            FileType::Other => "other",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_value())
    }
}

impl FromStr for FileType {
    type Err = HelixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vcf" => Ok(FileType::Vcf),
            "bam" => Ok(FileType::Bam),
            "cram" => Ok(FileType::Cram),
            "fastq" => Ok(FileType::Fastq),
            "tabix" => Ok(FileType::Tabix),
            "bai" => Ok(FileType::Bai),
            "other" => Ok(FileType::Other),
            _ => Err(HelixError::InvalidFileType(value.to_string())),
        }
    }
}

/// One declared file of a file-bearing object. Checksum and artifact fields
/// stay empty until encryption verification merges them in as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub destination_name: String,
    pub file_type: FileType,
    #[serde(default)]
    pub unencrypted_checksum: Option<String>,
    #[serde(default)]
    pub encrypted_checksum: Option<String>,
    #[serde(default)]
    pub encrypted_name: Option<String>,
}

impl FileEntry {
    pub fn declared(destination_name: &str, file_type: FileType) -> Result<Self, HelixError> {
        if destination_name.is_empty() || destination_name.contains(RESERVED_DELIMITER) {
            return Err(HelixError::InvalidDestinationName(
                destination_name.to_string(),
            ));
        }
        Ok(Self {
            destination_name: destination_name.to_string(),
            file_type,
            unencrypted_checksum: None,
            encrypted_checksum: None,
            encrypted_name: None,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.unencrypted_checksum.is_some()
            && self.encrypted_checksum.is_some()
            && self.encrypted_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLink {
    pub study_alias: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Verified checksums and artifact name for one file, produced by the
/// encryption verification step and merged into the record atomically.
#[derive(Debug, Clone)]
pub struct EncryptedArtifact {
    pub source_path: String,
    pub unencrypted_checksum: String,
    pub encrypted_checksum: String,
    pub encrypted_name: String,
}

/// One submission object, keyed by (object-type table, box, alias). The
/// store serializes the whole struct as an opaque blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub alias: Alias,
    pub box_id: BoxId,
    pub object_type: ObjectType,
    pub status: Status,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default)]
    pub project: Option<ProjectLink>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error_messages: Option<String>,
    #[serde(default)]
    pub accession_id: Option<String>,
    #[serde(default)]
    pub submission_status: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl SubmissionRecord {
    pub fn new(alias: Alias, box_id: BoxId, object_type: ObjectType) -> Self {
        Self {
            alias,
            box_id,
            object_type,
            status: Status::Start,
            files: BTreeMap::new(),
            working_directory: None,
            attributes: Vec::new(),
            project: None,
            references: Vec::new(),
            payload: None,
            error_messages: None,
            accession_id: None,
            submission_status: None,
            submitted_at: None,
            version: 0,
        }
    }

    /// Assigned once; artifacts on disk and in the staging area reference
    /// it, so it is never regenerated for an existing record.
    pub fn ensure_working_directory(&mut self) -> &str {
        if self.working_directory.is_none() {
            self.working_directory = Some(generate_working_directory());
        }
        self.working_directory.as_deref().unwrap_or_default()
    }

    pub fn merge_encrypted_artifacts(&mut self, artifacts: &[EncryptedArtifact]) {
        for artifact in artifacts {
            if let Some(entry) = self.files.get_mut(&artifact.source_path) {
                entry.unencrypted_checksum = Some(artifact.unencrypted_checksum.clone());
                entry.encrypted_checksum = Some(artifact.encrypted_checksum.clone());
                entry.encrypted_name = Some(artifact.encrypted_name.clone());
            }
        }
    }
}

pub fn generate_working_directory() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("wd_{}", suffix.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceBuild {
    Grch37,
    Grch38,
}

impl ReferenceBuild {
    pub fn accession(&self) -> &'static str {
        match self {
            ReferenceBuild::Grch37 => "GCA_000001405.1",
            ReferenceBuild::Grch38 => "GCA_000001405.15",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReferenceBuild::Grch37 => "GRCh37",
            ReferenceBuild::Grch38 => "GRCh38",
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_alias_valid() {
        let alias: Alias = " sample_001 ".parse().unwrap();
        assert_eq!(alias.as_str(), "sample_001");
    }

    #[test]
    fn parse_alias_rejects_reserved_delimiter() {
        let err = "sample__001".parse::<Alias>().unwrap_err();
        assert_matches!(err, HelixError::InvalidAlias(_));
    }

    #[test]
    fn parse_alias_rejects_empty_and_whitespace() {
        assert_matches!("".parse::<Alias>(), Err(HelixError::InvalidAlias(_)));
        assert_matches!("a b".parse::<Alias>(), Err(HelixError::InvalidAlias(_)));
    }

    #[test]
    fn status_order_is_total() {
        let mut status = Status::Start;
        let mut seen = vec![status];
        while let Some(next) = status.next(ObjectType::Analysis) {
            assert_eq!(
                next.sequence_index(),
                status.sequence_index() + 1,
                "file-bearing pipeline must advance one step at a time"
            );
            status = next;
            seen.push(status);
        }
        assert_eq!(seen.len(), 11);
        assert!(status.is_terminal());
    }

    #[test]
    fn metadata_types_skip_file_states() {
        assert_eq!(Status::Valid.next(ObjectType::Sample), Some(Status::Submit));
        assert_eq!(
            Status::Valid.next(ObjectType::Analysis),
            Some(Status::Encrypt)
        );
    }

    #[test]
    fn rollback_only_from_in_flight_states() {
        assert_eq!(Status::Encrypting.rollback(), Some(Status::Encrypt));
        assert_eq!(Status::Uploading.rollback(), Some(Status::Upload));
        assert_eq!(Status::Clean.rollback(), None);
        assert_eq!(Status::Submitted.rollback(), None);
    }

    #[test]
    fn file_entry_rejects_delimiter_in_destination() {
        let err = FileEntry::declared("a__b.vcf.gz", FileType::Vcf).unwrap_err();
        assert_matches!(err, HelixError::InvalidDestinationName(_));
    }

    #[test]
    fn working_directory_assigned_once() {
        let alias: Alias = "an_001".parse().unwrap();
        let box_id: BoxId = "box-42".parse().unwrap();
        let mut record = SubmissionRecord::new(alias, box_id, ObjectType::Analysis);
        let first = record.ensure_working_directory().to_string();
        let second = record.ensure_working_directory().to_string();
        assert_eq!(first, second);
        assert!(first.starts_with("wd_"));
    }
}
