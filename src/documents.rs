//! Requirement documents handed to the oracle. Everything is staged as PDF;
//! Word documents go through an office converter first.

use std::path::{Path, PathBuf};

use futures::future::try_join_all;

use crate::config::DocumentsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDocument {
    /// PDF that gets uploaded.
    pub path: PathBuf,
    /// File the caller supplied.
    pub source: PathBuf,
}

impl StagedDocument {
    pub fn mime_type(&self) -> &'static str {
        "application/pdf"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("at least one document is required")]
    Empty,
    #[error("at most {max} documents are allowed, got {count}")]
    TooMany { count: usize, max: usize },
    #[error("unsupported file type for {}: only .pdf and .docx are accepted", .0.display())]
    Unsupported(PathBuf),
    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("failed to run {converter}: {source}")]
    Spawn {
        converter: String,
        #[source]
        source: std::io::Error,
    },
    #[error("converting {} to PDF failed: {reason}", .path.display())]
    Conversion { path: PathBuf, reason: String },
    #[error("cannot prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Docx,
}

fn document_kind(path: &Path) -> Option<DocumentKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(DocumentKind::Pdf),
        "docx" => Some(DocumentKind::Docx),
        _ => None,
    }
}

pub struct Stager {
    converter: String,
    max_files: usize,
    out_dir: PathBuf,
}

impl Stager {
    pub fn new(converter: impl Into<String>, max_files: usize, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            converter: converter.into(),
            max_files,
            out_dir: out_dir.into(),
        }
    }

    pub fn from_config(config: &DocumentsConfig, out_dir: impl Into<PathBuf>) -> Self {
        Self::new(config.converter.clone(), config.max_files, out_dir)
    }

    /// Check every input up front, then convert Word files concurrently.
    pub async fn stage(&self, paths: &[PathBuf]) -> Result<Vec<StagedDocument>, DocumentError> {
        if paths.is_empty() {
            return Err(DocumentError::Empty);
        }
        if paths.len() > self.max_files {
            return Err(DocumentError::TooMany {
                count: paths.len(),
                max: self.max_files,
            });
        }

        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            let kind =
                document_kind(path).ok_or_else(|| DocumentError::Unsupported(path.clone()))?;
            if !path.exists() {
                return Err(DocumentError::Missing(path.clone()));
            }
            inputs.push((path, kind));
        }

        let staged = try_join_all(
            inputs
                .into_iter()
                .enumerate()
                .map(|(slot, (path, kind))| self.stage_one(slot, path, kind)),
        )
        .await?;
        tracing::info!(count = staged.len(), "documents staged");
        Ok(staged)
    }

    async fn stage_one(
        &self,
        slot: usize,
        path: &Path,
        kind: DocumentKind,
    ) -> Result<StagedDocument, DocumentError> {
        let pdf = match kind {
            DocumentKind::Pdf => path.to_path_buf(),
            // One directory per input so equal file names cannot collide.
            DocumentKind::Docx => self.convert(path, &self.out_dir.join(slot.to_string())).await?,
        };
        Ok(StagedDocument {
            path: pdf,
            source: path.to_path_buf(),
        })
    }

    async fn convert(&self, docx: &Path, out_dir: &Path) -> Result<PathBuf, DocumentError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|source| DocumentError::Io {
                path: out_dir.to_path_buf(),
                source,
            })?;

        let output = tokio::process::Command::new(&self.converter)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg(docx)
            .arg("--outdir")
            .arg(out_dir)
            .output()
            .await
            .map_err(|source| DocumentError::Spawn {
                converter: self.converter.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(file = %docx.display(), stderr = %stderr.trim(), "document conversion failed");
            return Err(DocumentError::Conversion {
                path: docx.to_path_buf(),
                reason: format!("{} exited with {}: {}", self.converter, output.status, stderr.trim()),
            });
        }

        let mut name = docx.file_stem().unwrap_or_default().to_os_string();
        name.push(".pdf");
        let pdf = out_dir.join(name);
        if !pdf.exists() {
            return Err(DocumentError::Conversion {
                path: docx.to_path_buf(),
                reason: format!("no PDF produced at {}", pdf.display()),
            });
        }
        tracing::info!(file = %docx.display(), pdf = %pdf.display(), "converted to PDF");
        Ok(pdf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        path
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_batches() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new("libreoffice", 5, dir.path().join("out"));
        assert!(matches!(stager.stage(&[]).await, Err(DocumentError::Empty)));

        let many: Vec<PathBuf> = (0..6).map(|i| touch(dir.path(), &format!("{i}.pdf"))).collect();
        assert!(matches!(
            stager.stage(&many).await,
            Err(DocumentError::TooMany { count: 6, max: 5 })
        ));
    }

    #[tokio::test]
    async fn rejects_unsupported_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new("libreoffice", 5, dir.path().join("out"));
        let txt = touch(dir.path(), "notes.txt");
        assert!(matches!(
            stager.stage(&[txt]).await,
            Err(DocumentError::Unsupported(_))
        ));
        assert!(matches!(
            stager.stage(&[dir.path().join("gone.pdf")]).await,
            Err(DocumentError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn pdfs_pass_through_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new("libreoffice", 5, dir.path().join("out"));
        let upper = touch(dir.path(), "FRS.PDF");
        let staged = stager.stage(std::slice::from_ref(&upper)).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].path, upper);
        assert_eq!(staged[0].mime_type(), "application/pdf");
    }

    #[tokio::test]
    async fn missing_converter_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new("breakdown-no-such-converter", 5, dir.path().join("out"));
        let docx = touch(dir.path(), "frs.docx");
        assert!(matches!(
            stager.stage(&[docx]).await,
            Err(DocumentError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converts_docx_through_converter() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-office");
        std::fs::write(
            &script,
            "#!/bin/sh\n# args: --headless --convert-to pdf <file> --outdir <dir>\nstem=$(basename \"$4\" .docx)\necho converted > \"$6/$stem.pdf\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let stager = Stager::new(script.to_string_lossy(), 5, dir.path().join("out"));
        let docx = touch(dir.path(), "frs.docx");
        let pdf = touch(dir.path(), "appendix.pdf");
        let staged = stager.stage(&[docx.clone(), pdf.clone()]).await.unwrap();

        assert_eq!(staged[0].source, docx);
        assert_eq!(staged[0].path, dir.path().join("out").join("0").join("frs.pdf"));
        assert!(staged[0].path.exists());
        assert_eq!(staged[1].path, pdf);
    }
}
