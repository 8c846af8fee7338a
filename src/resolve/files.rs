use crate::error::{Error, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Where manifests are read from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameOptions {
    /// Files, directories, `http(s)://` URLs, or `-` for stdin
    pub filenames: Vec<String>,
    /// Descend into subdirectories of directory entries
    pub recursive: bool,
}

/// One input document stream and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub origin: String,
    pub content: String,
}

fn manifest_error(origin: &str, reason: impl Into<String>) -> Error {
    Error::Manifest {
        origin: origin.to_string(),
        reason: reason.into(),
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expands a directory into its manifest files, sorted by path
pub fn expand_directory(dir: &Path, recursive: bool) -> Result<Vec<std::path::PathBuf>> {
    let walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    let walker = if recursive { walker } else { walker.max_depth(1) };
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && is_manifest_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

async fn fetch_url(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| manifest_error(url, e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(manifest_error(url, format!("unexpected status {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| manifest_error(url, e.to_string()))
}

async fn read_stdin() -> Result<String> {
    let mut content = String::new();
    tokio::io::stdin().read_to_string(&mut content).await?;
    Ok(content)
}

/// Reads every input named by `options`, in order
pub async fn read_sources(options: &FilenameOptions) -> Result<Vec<Source>> {
    if options.filenames.is_empty() {
        return Err(Error::Config("must specify at least one filename".to_string()));
    }
    let mut sources = Vec::new();
    for filename in &options.filenames {
        if filename == "-" {
            sources.push(Source {
                origin: "stdin".to_string(),
                content: read_stdin().await?,
            });
            continue;
        }
        if filename.starts_with("http://") || filename.starts_with("https://") {
            sources.push(Source {
                origin: filename.clone(),
                content: fetch_url(filename).await?,
            });
            continue;
        }
        let path = Path::new(filename);
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| manifest_error(filename, e.to_string()))?;
        let files = if metadata.is_dir() {
            expand_directory(path, options.recursive)?
        } else {
            vec![path.to_path_buf()]
        };
        for file in files {
            let origin = file.display().to_string();
            let content = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| manifest_error(&origin, e.to_string()))?;
            sources.push(Source { origin, content });
        }
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_expansion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "b: 1\n").unwrap();
        std::fs::write(dir.path().join("a.yml"), "a: 1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.json"), "{\"c\": 1}").unwrap();

        let flat = FilenameOptions {
            filenames: vec![dir.path().display().to_string()],
            recursive: false,
        };
        let sources = read_sources(&flat).await.unwrap();
        let contents: Vec<&str> = sources.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["a: 1\n", "b: 1\n"]);

        let recursive = FilenameOptions {
            recursive: true,
            ..flat
        };
        assert_eq!(read_sources(&recursive).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let options = FilenameOptions {
            filenames: vec!["/definitely/not/here.yaml".to_string()],
            recursive: false,
        };
        let err = read_sources(&options).await.unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }

    #[tokio::test]
    async fn test_no_filenames_is_a_configuration_error() {
        let err = read_sources(&FilenameOptions::default()).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
