//! Toolchain invocation: locating main packages and compiling them.

use crate::build::strip_scheme;
use crate::constants::KO_DATA_DIR;
use crate::error::{Error, Result};
use crate::oci::layer::DataFile;
use crate::oci::Platform;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use walkdir::WalkDir;

/// A located main package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Fully qualified import path
    pub import_path: String,
    pub dir: PathBuf,
    /// Binary name, the last import path element
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub platform: &'a Platform,
    pub working_dir: &'a Path,
    pub ldflags: &'a [String],
    pub env: &'a [String],
    pub trimpath: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledBinary {
    pub name: String,
    pub data: Vec<u8>,
    /// `go version -m` output, when the toolchain can produce it
    pub build_info: Option<String>,
    pub data_files: Vec<DataFile>,
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn locate(&self, working_dir: &Path, import_path: &str) -> Result<PackageInfo>;

    async fn compile(&self, package: &PackageInfo, request: &CompileRequest<'_>) -> Result<CompiledBinary>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GoListPackage {
    import_path: String,
    dir: PathBuf,
    name: String,
}

/// Compiles with the `go` toolchain
#[derive(Debug, Clone)]
pub struct GoCompiler {
    go: PathBuf,
}

impl GoCompiler {
    pub fn new(go: Option<PathBuf>) -> Self {
        Self {
            go: go.unwrap_or_else(|| PathBuf::from("go")),
        }
    }

    fn command(&self, working_dir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.go);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn build_info(&self, working_dir: &Path, binary: &Path) -> Option<String> {
        let output = self
            .command(working_dir)
            .arg("version")
            .arg("-m")
            .arg(binary)
            .output()
            .await
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for GoCompiler {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Environment for cross-compiling to `platform`; entries in `extra` win
pub fn build_env(platform: &Platform, extra: &[String]) -> Vec<(String, String)> {
    let mut env = vec![
        ("GOOS".to_string(), platform.os.clone()),
        ("GOARCH".to_string(), platform.architecture.clone()),
        ("CGO_ENABLED".to_string(), "0".to_string()),
    ];
    if platform.architecture == "arm" {
        if let Some(variant) = &platform.variant {
            env.push(("GOARM".to_string(), variant.trim_start_matches('v').to_string()));
        }
    }
    for entry in extra {
        if let Some((key, value)) = entry.split_once('=') {
            env.retain(|(k, _)| k != key);
            env.push((key.to_string(), value.to_string()));
        }
    }
    env
}

/// Files under the package's `kodata` directory, sorted by path
pub fn collect_data_files(package_dir: &Path) -> Result<Vec<DataFile>> {
    let root = package_dir.join(KO_DATA_DIR);
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        files.push(DataFile {
            path: relative,
            data: std::fs::read(entry.path())?,
            executable: is_executable(entry.path()),
        });
    }
    Ok(files)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[async_trait]
impl Compiler for GoCompiler {
    async fn locate(&self, working_dir: &Path, import_path: &str) -> Result<PackageInfo> {
        let import_path = strip_scheme(import_path);
        let output = self
            .command(working_dir)
            .args(["list", "-json", import_path])
            .output()
            .await
            .map_err(|e| Error::PackageNotFound {
                import_path: import_path.to_string(),
                reason: format!("running {}: {}", self.go.display(), e),
            })?;
        if !output.status.success() {
            return Err(Error::PackageNotFound {
                import_path: import_path.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let package: GoListPackage = serde_json::from_slice(&output.stdout).map_err(|e| Error::PackageNotFound {
            import_path: import_path.to_string(),
            reason: format!("decoding go list output: {}", e),
        })?;
        if package.name != "main" {
            return Err(Error::PackageNotFound {
                import_path: import_path.to_string(),
                reason: format!("package {} is not a main package", package.import_path),
            });
        }
        let name = package
            .import_path
            .rsplit('/')
            .next()
            .unwrap_or(&package.import_path)
            .to_string();
        Ok(PackageInfo {
            import_path: package.import_path,
            dir: package.dir,
            name,
        })
    }

    async fn compile(&self, package: &PackageInfo, request: &CompileRequest<'_>) -> Result<CompiledBinary> {
        // Removed when dropped, including on early return
        let scratch = tempfile::Builder::new().prefix("ocipress-").tempdir()?;
        let output_path = scratch.path().join(&package.name);

        let mut cmd = self.command(request.working_dir);
        cmd.arg("build");
        if request.trimpath {
            cmd.arg("-trimpath");
        }
        if !request.ldflags.is_empty() {
            cmd.arg(format!("-ldflags={}", request.ldflags.join(" ")));
        }
        cmd.arg("-o").arg(&output_path).arg(&package.import_path);
        cmd.envs(build_env(request.platform, request.env));

        tracing::debug!(
            importpath = %package.import_path,
            platform = %request.platform,
            "Compiling"
        );
        let output = cmd.output().await.map_err(|e| Error::CompilationFailed {
            import_path: package.import_path.clone(),
            platform: request.platform.to_string(),
            reason: format!("running {}: {}", self.go.display(), e),
        })?;
        if !output.status.success() {
            return Err(Error::CompilationFailed {
                import_path: package.import_path.clone(),
                platform: request.platform.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let data = tokio::fs::read(&output_path).await?;
        let build_info = self.build_info(request.working_dir, &output_path).await;
        drop(scratch);

        Ok(CompiledBinary {
            name: package.name.clone(),
            data,
            build_info,
            data_files: collect_data_files(&package.dir)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_env_for_arm() {
        let env = build_env(&Platform::new("linux", "arm", Some("v7")), &[]);
        assert!(env.contains(&("GOARCH".to_string(), "arm".to_string())));
        assert!(env.contains(&("GOARM".to_string(), "7".to_string())));
        assert!(env.contains(&("CGO_ENABLED".to_string(), "0".to_string())));
    }

    #[test]
    fn test_build_env_overrides() {
        let env = build_env(
            &Platform::new("linux", "amd64", None),
            &["CGO_ENABLED=1".to_string(), "GOFLAGS=-mod=vendor".to_string()],
        );
        let cgo: Vec<_> = env.iter().filter(|(k, _)| k == "CGO_ENABLED").collect();
        assert_eq!(cgo.len(), 1);
        assert_eq!(cgo[0].1, "1");
        assert!(env.iter().any(|(k, v)| k == "GOFLAGS" && v == "-mod=vendor"));
    }

    // Run as `sh build <args>` from the working directory, standing in for
    // `go build`
    const FAKE_BUILD: &str = r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "$out" >> "$SCRATCH_LOG"
sleep 0.2
printf '%s' "$GOARCH" > "$out"
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_compiles_use_separate_scratch_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("build"), FAKE_BUILD).unwrap();
        let log = dir.path().join("outputs.log");

        let compiler = GoCompiler::new(Some(PathBuf::from("/bin/sh")));
        let package = PackageInfo {
            import_path: "example.com/cmd/app".to_string(),
            dir: dir.path().to_path_buf(),
            name: "app".to_string(),
        };
        let platform = Platform::new("linux", "amd64", None);
        let env = vec![format!("SCRATCH_LOG={}", log.display())];
        let request = CompileRequest {
            platform: &platform,
            working_dir: dir.path(),
            ldflags: &[],
            env: &env,
            trimpath: true,
        };

        let (a, b) = tokio::join!(compiler.compile(&package, &request), compiler.compile(&package, &request));
        assert_eq!(a.unwrap().data, b"amd64");
        assert_eq!(b.unwrap().data, b"amd64");

        let outputs = std::fs::read_to_string(&log).unwrap();
        let outputs: Vec<&str> = outputs.lines().collect();
        assert_eq!(outputs.len(), 2);
        assert_ne!(outputs[0], outputs[1]);
        assert!(outputs.iter().all(|o| !Path::new(o).exists()));
    }

    #[test]
    fn test_collect_data_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_data_files(dir.path()).unwrap().is_empty());

        let kodata = dir.path().join("kodata");
        std::fs::create_dir_all(kodata.join("static")).unwrap();
        std::fs::write(kodata.join("static/b.txt"), "b").unwrap();
        std::fs::write(kodata.join("a.txt"), "a").unwrap();

        let files = collect_data_files(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "static/b.txt"]);
        assert_eq!(files[0].data, b"a");
    }
}
