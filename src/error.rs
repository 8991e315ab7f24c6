use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HelixError {
    #[error("invalid alias: {0}")]
    InvalidAlias(String),

    #[error("invalid box id: {0}")]
    InvalidBoxId(String),

    #[error("invalid object type: {0}")]
    InvalidObjectType(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid file type tag: {0}")]
    InvalidFileType(String),

    #[error("invalid destination name: {0}")]
    InvalidDestinationName(String),

    #[error("missing config file helix-sub.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown box: {0}")]
    UnknownBox(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record changed underneath this cycle: {0}")]
    StaleRecord(String),

    #[error("missing required field {field} for {alias}")]
    MissingField { alias: String, field: String },

    #[error("unresolved references for {alias}: {missing}")]
    UnresolvedReferences { alias: String, missing: String },

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("job launch failed for {job}: {message}")]
    JobLaunch { job: String, message: String },

    #[error("could not check job outcome: {0}")]
    JobLookup(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("upload aborted for {alias}: missing local artifact {artifact}")]
    MissingArtifact { alias: String, artifact: String },

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("registry authentication failed for box {box_id}: {message}")]
    RegistryAuth { box_id: String, message: String },

    #[error("enum service request failed: {0}")]
    EnumHttp(String),

    #[error("enum service returned status {status}: {message}")]
    EnumStatus { status: u16, message: String },

    #[error("unknown enumeration value {value} in category {category}")]
    UnknownEnumValue { category: String, value: String },

    #[error("cannot assemble payload for {0}")]
    PayloadIncomplete(String),

    #[error("no supported reference build for contigs of {0}")]
    UnsupportedReferenceBuild(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("refusing to delete outside working directory: {0}")]
    CleanupOutsideWorkdir(Utf8PathBuf),
}
