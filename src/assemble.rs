use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::domain::{ObjectType, ReferenceBuild, SubmissionRecord};
use crate::enums::EnumClient;
use crate::error::HelixError;

pub const FILE_TYPE_CATEGORY: &str = "file_types";

/// Minimal payload the orchestrator recognizes as "could not form json".
pub fn sentinel_payload(alias: &str) -> Value {
    json!({ "alias": alias })
}

pub fn is_sentinel(payload: &Value) -> bool {
    payload
        .as_object()
        .map(|object| object.len() == 1 && object.contains_key("alias"))
        .unwrap_or(false)
}

/// Required-field and tag validation applied at the clean stage, before any
/// remote interaction.
pub fn validate_record(record: &SubmissionRecord) -> Result<(), HelixError> {
    for (key, _) in &record.attributes {
        if key.trim().is_empty() {
            return Err(HelixError::MissingField {
                alias: record.alias.to_string(),
                field: "attribute key".to_string(),
            });
        }
    }
    if needs_project(record.object_type) && record.project.is_none() {
        return Err(HelixError::MissingField {
            alias: record.alias.to_string(),
            field: "project".to_string(),
        });
    }
    if record.object_type.is_file_bearing() && record.files.is_empty() {
        return Err(HelixError::MissingField {
            alias: record.alias.to_string(),
            field: "files".to_string(),
        });
    }
    Ok(())
}

fn needs_project(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::Experiment | ObjectType::Run | ObjectType::Analysis | ObjectType::Dataset
    )
}

pub struct Assembler<'a> {
    enums: &'a dyn EnumClient,
}

impl<'a> Assembler<'a> {
    pub fn new(enums: &'a dyn EnumClient) -> Self {
        Self { enums }
    }

    /// Builds the registration payload for a record whose files (if any)
    /// have verified checksums. An `Err` is the sentinel case: the caller
    /// records the diagnostic and leaves the record's state unchanged.
    pub fn assemble(&self, record: &SubmissionRecord) -> Result<Value, HelixError> {
        validate_record(record)?;

        let mut object = Map::new();
        object.insert("alias".to_string(), json!(record.alias.as_str()));
        object.insert(
            "objectType".to_string(),
            json!(record.object_type.to_string()),
        );
        object.insert(
            "attributes".to_string(),
            Value::Array(
                record
                    .attributes
                    .iter()
                    .map(|(key, value)| json!({ "tag": key, "value": value }))
                    .collect(),
            ),
        );

        if let Some(project) = &record.project {
            object.insert("studyRef".to_string(), json!(project.study_alias));
            object.insert(
                "title".to_string(),
                json!(project.title.clone().unwrap_or_default()),
            );
            object.insert(
                "description".to_string(),
                json!(project.description.clone().unwrap_or_default()),
            );
        }

        object.insert(
            "references".to_string(),
            json!(record.references.clone()),
        );

        if record.object_type.is_file_bearing() {
            let file_type_tags = self.enums.lookup(FILE_TYPE_CATEGORY)?;
            let mut files = Vec::new();
            for (source_path, entry) in &record.files {
                if !entry.is_encrypted() {
                    return Err(HelixError::PayloadIncomplete(format!(
                        "{}: {} has no verified checksums",
                        record.alias, source_path
                    )));
                }
                let tag = file_type_tags
                    .get(entry.file_type.display_value())
                    .ok_or_else(|| HelixError::UnknownEnumValue {
                        category: FILE_TYPE_CATEGORY.to_string(),
                        value: entry.file_type.display_value().to_string(),
                    })?;
                files.push(json!({
                    "fileName": entry.encrypted_name,
                    "fileTypeId": tag,
                    "checksum": entry.encrypted_checksum,
                    "unencryptedChecksum": entry.unencrypted_checksum,
                }));
            }
            object.insert("files".to_string(), json!(files));

            let contigs = sniff_contigs(record)?;
            if !contigs.is_empty() {
                let build = match_reference_build(&contigs).ok_or_else(|| {
                    HelixError::UnsupportedReferenceBuild(record.alias.to_string())
                })?;
                object.insert("referenceBuild".to_string(), json!(build.accession()));
                object.insert(
                    "contigs".to_string(),
                    json!(contigs.into_iter().collect::<Vec<_>>()),
                );
            }
        }

        Ok(Value::Object(object))
    }
}

/// Deduplicated contig names across every alignment/variant file of the
/// record. Files of other types contribute nothing.
fn sniff_contigs(record: &SubmissionRecord) -> Result<BTreeSet<String>, HelixError> {
    let mut contigs = BTreeSet::new();
    for (source_path, entry) in &record.files {
        let path = Path::new(source_path);
        if !path.exists() {
            continue;
        }
        match entry.file_type {
            crate::domain::FileType::Vcf => {
                contigs.extend(read_vcf_contigs(path)?);
            }
            crate::domain::FileType::Bam => {
                contigs.extend(read_bam_contigs(path)?);
            }
            _ => {}
        }
    }
    Ok(contigs)
}

pub fn read_vcf_contigs(path: &Path) -> Result<BTreeSet<String>, HelixError> {
    let file =
        File::open(path).map_err(|err| HelixError::Filesystem(format!("{}: {err}", path.display())))?;
    let reader: Box<dyn Read> = if path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
    {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_vcf_header(BufReader::new(reader))
}

fn parse_vcf_header<R: BufRead>(reader: R) -> Result<BTreeSet<String>, HelixError> {
    let contig_line = Regex::new(r"^##contig=<ID=([^,>]+)").unwrap();
    let mut contigs = BTreeSet::new();
    for line in reader.lines() {
        let line = line.map_err(|err| HelixError::Filesystem(err.to_string()))?;
        if !line.starts_with('#') {
            break;
        }
        if let Some(captures) = contig_line.captures(&line) {
            contigs.insert(captures[1].to_string());
        }
    }
    Ok(contigs)
}

/// Reads the SAM-text header of a BAM (BGZF is plain multi-member gzip) and
/// collects `@SQ SN:` names.
pub fn read_bam_contigs(path: &Path) -> Result<BTreeSet<String>, HelixError> {
    let file =
        File::open(path).map_err(|err| HelixError::Filesystem(format!("{}: {err}", path.display())))?;
    let mut decoder = MultiGzDecoder::new(file);

    let mut magic = [0u8; 4];
    decoder
        .read_exact(&mut magic)
        .map_err(|err| HelixError::Filesystem(format!("{}: {err}", path.display())))?;
    if &magic != b"BAM\x01" {
        return Err(HelixError::Filesystem(format!(
            "{}: not a BAM file",
            path.display()
        )));
    }
    let mut len_buf = [0u8; 4];
    decoder
        .read_exact(&mut len_buf)
        .map_err(|err| HelixError::Filesystem(err.to_string()))?;
    let text_len = i32::from_le_bytes(len_buf).max(0) as usize;
    let mut text = vec![0u8; text_len];
    decoder
        .read_exact(&mut text)
        .map_err(|err| HelixError::Filesystem(err.to_string()))?;
    let header = String::from_utf8_lossy(&text);

    let mut contigs = BTreeSet::new();
    for line in header.lines() {
        if !line.starts_with("@SQ") {
            continue;
        }
        for field in line.split('\t') {
            if let Some(name) = field.strip_prefix("SN:") {
                contigs.insert(name.to_string());
            }
        }
    }
    Ok(contigs)
}

/// Maps a deduplicated contig set against the two supported builds. The set
/// must be fully covered by one build's naming table.
pub fn match_reference_build(contigs: &BTreeSet<String>) -> Option<ReferenceBuild> {
    if contigs.iter().all(|name| grch38_contig(name)) {
        return Some(ReferenceBuild::Grch38);
    }
    if contigs.iter().all(|name| grch37_contig(name)) {
        return Some(ReferenceBuild::Grch37);
    }
    None
}

fn grch37_contig(name: &str) -> bool {
    match name {
        "X" | "Y" | "MT" => true,
        _ => name
            .parse::<u8>()
            .map(|number| (1..=22).contains(&number))
            .unwrap_or(false),
    }
}

fn grch38_contig(name: &str) -> bool {
    match name {
        "chrX" | "chrY" | "chrM" => true,
        _ => name
            .strip_prefix("chr")
            .and_then(|rest| rest.parse::<u8>().ok())
            .map(|number| (1..=22).contains(&number))
            .unwrap_or(false),
    }
}
