//! Zone-file parsing, serialization, and record edits.
//!
//! The format is positional and line-based: one record per line, fields
//! separated by whitespace. The parser keeps only what it can place:
//!
//! - `name` is the first field, `type` the second-to-last, `rdata` the last.
//! - With more than three fields, a numeric second field is the TTL and the
//!   third is the class; otherwise the second field is the class.
//! - `;` lines attach to the next record as its comment (first one wins).
//! - `$` lines (`$ORIGIN`, `$TTL`, ...) are kept verbatim and written first.
//! - Lines with fewer than three fields are skipped.
//!
//! Records are matched by `(name, type)`, ASCII case-insensitively. The
//! pair is not unique; mutators document which matches they touch.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use ubctl_macros::Validate;

/// Errors reading or writing a zone file. Always names the file involved.
#[derive(Debug, thiserror::Error)]
pub enum ZoneFileError {
    #[error("failed to read zone file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write zone file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_class() -> String {
    "IN".to_string()
}

/// One resource record line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Record {
    #[validate(non_empty, no_whitespace)]
    pub name: String,

    /// Zero means "no explicit TTL" and is omitted on write.
    #[serde(default)]
    pub ttl: u32,

    #[serde(default = "default_class")]
    #[validate(no_whitespace)]
    pub class: String,

    #[serde(rename = "type")]
    #[validate(non_empty, no_whitespace)]
    pub rtype: String,

    #[validate(non_empty, no_whitespace)]
    pub rdata: String,

    #[serde(rename = "comments", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Record {
    pub fn new(name: &str, ttl: u32, class: &str, rtype: &str, rdata: &str) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            class: class.to_string(),
            rtype: rtype.to_string(),
            rdata: rdata.to_string(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Field constraints plus the rules that keep the record readable after
    /// a write: the comment fits on one line, no field starts a comment or a
    /// directive, and the class cannot be mistaken for a TTL or a type.
    pub fn check(&self) -> Result<(), Vec<String>> {
        let mut errors = self.validate().err().unwrap_or_default();
        if self.comment.as_deref().is_some_and(|c| c.contains(['\n', '\r'])) {
            errors.push("comments: must not contain line breaks".to_string());
        }
        for (field, value) in [("name", &self.name), ("class", &self.class), ("type", &self.rtype)] {
            if value.starts_with(['$', ';']) {
                errors.push(format!("{field}: must not start with '$' or ';'"));
            }
        }
        if self.ttl > 0 && self.class.is_empty() {
            errors.push("class: must not be empty when ttl is set".to_string());
        }
        if !self.class.is_empty() && self.class.bytes().all(|b| b.is_ascii_digit()) {
            errors.push("class: must not be numeric".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn matches(&self, name: &str, rtype: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) && self.rtype.eq_ignore_ascii_case(rtype)
    }

    pub fn is_soa(&self) -> bool {
        self.rtype.eq_ignore_ascii_case("SOA")
    }

    fn write_to(&self, out: &mut String) {
        if let Some(comment) = &self.comment {
            let _ = writeln!(out, "; {comment}");
        }
        if self.ttl > 0 {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                self.name, self.ttl, self.class, self.rtype, self.rdata
            );
        } else {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                self.name, self.class, self.rtype, self.rdata
            );
        }
    }
}

/// An in-memory zone file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneFile {
    /// File name the zone was loaded from.
    pub name: String,

    /// `$`-directives in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,

    #[serde(default)]
    pub records: Vec<Record>,
}

impl ZoneFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse zone-file text. Never fails; unusable lines are skipped.
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut zone = ZoneFile::new(name);
        let mut pending_comment: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix(';') {
                let comment = comment.trim();
                if pending_comment.is_none() && !comment.is_empty() {
                    pending_comment = Some(comment.to_string());
                }
                continue;
            }

            if line.starts_with('$') {
                zone.directives.push(line.to_string());
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            let n = fields.len();
            if n < 3 {
                trace!(line = lineno + 1, "skipping zone file line with fewer than 3 fields");
                pending_comment = None;
                continue;
            }

            let mut record = Record {
                name: fields[0].to_string(),
                ttl: 0,
                class: String::new(),
                rtype: fields[n - 2].to_string(),
                rdata: fields[n - 1].to_string(),
                comment: pending_comment.take(),
            };
            if n > 3 {
                match fields[1].parse::<u32>() {
                    Ok(ttl) => {
                        record.ttl = ttl;
                        record.class = fields[2].to_string();
                    }
                    Err(_) => record.class = fields[1].to_string(),
                }
            }
            zone.records.push(record);
        }

        zone
    }

    /// Render as zone-file text: directives, then the first SOA record, then
    /// every other record in order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for directive in &self.directives {
            out.push_str(directive);
            out.push('\n');
        }

        let soa = self.records.iter().position(Record::is_soa);
        if let Some(i) = soa {
            self.records[i].write_to(&mut out);
        }
        for (i, record) in self.records.iter().enumerate() {
            if Some(i) != soa {
                record.write_to(&mut out);
            }
        }
        out
    }

    /// Read and parse the file at `path`. The zone is named after the file.
    pub async fn load(path: &Path) -> Result<Self, ZoneFileError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ZoneFileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let zone = Self::parse(name, &text);
        debug!(path = %path.display(), records = zone.records.len(), "zone file loaded");
        Ok(zone)
    }

    /// Write to `path`, creating parent directories as needed.
    ///
    /// The text goes to a temporary sibling first and is renamed over the
    /// target, so readers see either the old file or the new one. An
    /// existing file's permissions carry over.
    pub async fn save(&self, path: &Path) -> Result<(), ZoneFileError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ZoneFileError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "zone".to_string());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));
        let write_err = |source| ZoneFileError::Write {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::write(&tmp, self.render()).await.map_err(write_err)?;
        if let Ok(meta) = tokio::fs::metadata(path).await
            && let Err(e) = tokio::fs::set_permissions(&tmp, meta.permissions()).await
        {
            warn!(path = %path.display(), error = %e, "could not carry over zone file permissions");
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(path = %path.display(), records = self.records.len(), "zone file saved");
        Ok(())
    }

    /// Append a record.
    pub fn add_record(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Remove every record matching `(name, rtype)`; returns how many went.
    pub fn remove_record(&mut self, name: &str, rtype: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.matches(name, rtype));
        before - self.records.len()
    }

    /// Replace the first record matching the new record's `(name, type)`.
    /// Later matches are left alone. Returns whether anything was replaced.
    pub fn update_record(&mut self, record: Record) -> bool {
        match self
            .records
            .iter_mut()
            .find(|r| r.matches(&record.name, &record.rtype))
        {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// First record matching `(name, rtype)`.
    pub fn get_record(&self, name: &str, rtype: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.matches(name, rtype))
    }
}
