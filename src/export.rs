//! Export units from a store as zipped TMX.
//!
//! Each export gets a fresh id and is written under
//! `<export root>/<username>/.<id>/`; the directory is renamed to
//! `<export root>/<username>/<id>/` only once the archive is complete, so a
//! listed export is never half-written. The archive is named after the
//! language pair (`EN_ES.zip`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::config::TmxConfig;
use crate::models::LangPair;
use crate::progress::{JobProgressEvent, ProgressReporter};
use crate::store::{CandidateStore, SearchFilters};
use crate::tmx::{TmxWriter, WriterOptions};

const COMBINED_MEMBER: &str = "combined.tmx";
const REPORT_EVERY: u64 = 1000;

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub lang_pair: LangPair,
    pub username: String,
    /// Tags to export. Several tags go into one `combined.tmx` member.
    pub domains: Vec<String>,
    pub file_names: Vec<String>,
    pub duplicates_only: bool,
    pub limit: Option<usize>,
}

impl ExportRequest {
    pub fn new(lang_pair: LangPair, username: impl Into<String>) -> Self {
        Self {
            lang_pair,
            username: username.into(),
            domains: Vec::new(),
            file_names: Vec::new(),
            duplicates_only: false,
            limit: None,
        }
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            domains: self.domains.clone(),
            file_names: self.file_names.clone(),
            duplicates_only: self.duplicates_only,
            exact_length: false,
        }
    }

    fn member_name(&self, default_member: &str) -> String {
        match self.domains.as_slice() {
            [] => default_member.to_string(),
            [tag] => format!("{}.tmx", tag.replace(['/', '\\'], "_")),
            _ => COMBINED_MEMBER.to_string(),
        }
    }

    /// `EN_ES.zip` for an en→es export.
    pub fn archive_name(&self) -> String {
        format!(
            "{}_{}.zip",
            self.lang_pair.source.to_uppercase(),
            self.lang_pair.target.to_uppercase()
        )
    }
}

/// A finished export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub id: String,
    pub path: PathBuf,
    pub member: String,
    pub units: u64,
}

/// One file of a finished export, as listed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub filepath: PathBuf,
    pub id: String,
    pub export_time: DateTime<Utc>,
    pub size: u64,
}

/// Export job bound to a store and an export root.
pub struct TmExport {
    store: Arc<dyn CandidateStore>,
    root: PathBuf,
    tmx: TmxConfig,
}

impl TmExport {
    pub fn new(store: Arc<dyn CandidateStore>, config: &Config) -> Self {
        Self {
            store,
            root: config.export.path.clone(),
            tmx: config.tmx.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one export and return where it landed.
    pub fn run(
        &self,
        request: &ExportRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ExportRecord> {
        let id = Uuid::new_v4().to_string();
        let user_dir = self.root.join(&request.username);
        let staging = user_dir.join(format!(".{id}"));
        let done = user_dir.join(&id);
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create export dir: {}", staging.display()))?;

        let job = format!("export {} {}", request.lang_pair, id);
        progress.report(JobProgressEvent::Scanning { job: job.clone() });

        let archive_name = request.archive_name();
        let member = request.member_name(&self.tmx.default_member);
        let result = self.write_archive(request, &staging.join(&archive_name), &member, &job, progress);
        let units = match result {
            Ok(units) => units,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        std::fs::rename(&staging, &done)
            .with_context(|| format!("Failed to finalize export dir: {}", done.display()))?;

        tracing::info!(id = %id, units, member = %member, "export finished");
        Ok(ExportRecord {
            path: done.join(&archive_name),
            id,
            member,
            units,
        })
    }

    fn write_archive(
        &self,
        request: &ExportRequest,
        path: &Path,
        member: &str,
        job: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<u64> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create archive: {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let units = self
            .store
            .scan(&request.lang_pair, &request.filters())
            .context("Failed to scan units for export")?;
        let units = units.take(request.limit.unwrap_or(usize::MAX));

        let mut count = 0u64;
        let counted = units.inspect(|_| {
            count += 1;
            if count % REPORT_EVERY == 0 {
                progress.report(JobProgressEvent::Processing {
                    job: job.to_string(),
                    n: count,
                    total: None,
                });
            }
        });

        let options = WriterOptions::from_config(request.lang_pair.source.clone(), &self.tmx);
        let mut writer = TmxWriter::new(options);
        for chunk in writer.write_iter(counted, Some(member)) {
            out.write_all(&chunk?)?;
        }
        for chunk in writer.write_close() {
            out.write_all(&chunk?)?;
        }
        out.flush()?;

        progress.report(JobProgressEvent::Processing {
            job: job.to_string(),
            n: count,
            total: Some(count),
        });
        Ok(count)
    }

    /// Finished exports of `username`, optionally restricted to one id.
    /// In-progress exports are not listed.
    pub fn list(&self, username: &str, export_id: Option<&str>) -> Result<Vec<ExportFile>> {
        let user_dir = self.root.join(username);
        if !user_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let entries = std::fs::read_dir(&user_dir)
            .with_context(|| format!("Failed to read export dir: {}", user_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if export_id.is_some_and(|wanted| wanted != id) {
                continue;
            }
            for file in std::fs::read_dir(entry.path())? {
                let file = file?;
                let meta = file.metadata()?;
                if !meta.is_file() {
                    continue;
                }
                let export_time = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                files.push(ExportFile {
                    filename: file.file_name().to_string_lossy().into_owned(),
                    filepath: file.path(),
                    id: id.clone(),
                    export_time,
                    size: meta.len(),
                });
            }
        }
        files.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.filename.cmp(&b.filename)));
        Ok(files)
    }

    /// Remove a finished export. A missing export is not an error.
    pub fn delete(&self, username: &str, export_id: &str) -> Result<()> {
        let dir = self.root.join(username).join(export_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "export already gone");
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete export: {}", dir.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TranslationUnit;
    use crate::progress::NoProgress;
    use crate::store::InMemoryStore;
    use std::io::Read;

    fn pair() -> LangPair {
        LangPair::new("en", "es")
    }

    fn unit(src: &str, tgt: &str, domain: &str) -> TranslationUnit {
        let mut u = TranslationUnit::new(src, tgt, &pair());
        u.domain = vec![domain.to_string()];
        u
    }

    async fn setup(dir: &tempfile::TempDir) -> TmExport {
        let store = InMemoryStore::new();
        store
            .insert_batch(vec![
                unit("One", "Uno", "General"),
                unit("Two", "Dos", "General"),
                unit("One", "Uno", "General"),
                unit("Heart", "Corazón", "Medical"),
            ])
            .await
            .unwrap();
        let mut config = Config::default();
        config.export.path = dir.path().to_path_buf();
        TmExport::new(Arc::new(store), &config)
    }

    fn members(path: &Path) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut f = archive.by_index(i).unwrap();
                let mut text = String::new();
                f.read_to_string(&mut text).unwrap();
                (f.name().to_string(), text)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_tag_export_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let export = setup(&dir).await;
        let mut request = ExportRequest::new(pair(), "alice");
        request.domains = vec!["General".into()];

        let record = export.run(&request, &NoProgress).unwrap();
        assert_eq!(record.units, 3);
        assert_eq!(
            record.path,
            dir.path().join("alice").join(&record.id).join("EN_ES.zip")
        );
        assert!(!dir.path().join("alice").join(format!(".{}", record.id)).exists());

        let members = members(&record.path);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "General.tmx");
        assert_eq!(members[0].1.matches("<tu>").count(), 3);
    }

    #[tokio::test]
    async fn test_combined_duplicates_and_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let export = setup(&dir).await;

        let mut request = ExportRequest::new(pair(), "bob");
        request.domains = vec!["General".into(), "Medical".into()];
        let record = export.run(&request, &NoProgress).unwrap();
        assert_eq!(record.member, "combined.tmx");
        assert_eq!(record.units, 4);

        request.duplicates_only = true;
        let record = export.run(&request, &NoProgress).unwrap();
        assert_eq!(record.units, 2);

        request.duplicates_only = false;
        request.limit = Some(1);
        let record = export.run(&request, &NoProgress).unwrap();
        assert_eq!(record.units, 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::TempDir::new().unwrap();
        let export = setup(&dir).await;
        let request = ExportRequest::new(pair(), "carol");
        let first = export.run(&request, &NoProgress).unwrap();
        let second = export.run(&request, &NoProgress).unwrap();
        std::fs::create_dir_all(dir.path().join("carol").join(".pending")).unwrap();

        let all = export.list("carol", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|f| f.filename == "EN_ES.zip" && f.size > 0));

        let one = export.list("carol", Some(&first.id)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, first.id);
        assert_eq!(one[0].filepath, first.path);

        export.delete("carol", &first.id).unwrap();
        export.delete("carol", &first.id).unwrap();
        let left = export.list("carol", None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, second.id);

        assert!(export.list("nobody", None).unwrap().is_empty());
    }

    #[test]
    fn test_member_and_archive_names() {
        let mut request = ExportRequest::new(LangPair::new("de", "fr"), "u");
        assert_eq!(request.archive_name(), "DE_FR.zip");
        assert_eq!(request.member_name("pangeatm.tmx"), "pangeatm.tmx");
        request.domains = vec!["a/b".into()];
        assert_eq!(request.member_name("pangeatm.tmx"), "a_b.tmx");
    }
}
