//! Build and publish options, assembled from layered partial sources.
//!
//! Sources are merged in order (provider, environment, resource); a value
//! set by a later source replaces the earlier one.

use crate::constants::{
    DEFAULT_BASE_IMAGE, DEFAULT_PLATFORM, DEFAULT_WORKING_DIR, ENV_DOCKER_REPO, ENV_GO_PATH,
    ENV_SOURCE_DATE_EPOCH, USER_AGENT,
};
use crate::error::{Error, Result};
use crate::namer::NamingPolicy;
use crate::oci::Platform;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which platforms to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSelection {
    /// Every platform the base image offers
    All,
    Only(Vec<Platform>),
}

impl PlatformSelection {
    /// Parses a platform list; empty means the default platform
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let entries: Vec<&str> = entries
            .iter()
            .map(|e| e.as_ref().trim())
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() {
            return Ok(Self::default());
        }
        if entries.contains(&"all") {
            if entries.len() > 1 {
                return Err(Error::Config(format!(
                    "platform \"all\" cannot be combined with other platforms: {}",
                    entries.join(",")
                )));
            }
            return Ok(PlatformSelection::All);
        }
        let mut platforms: Vec<Platform> = Vec::with_capacity(entries.len());
        for entry in entries {
            let platform: Platform = entry.parse()?;
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }
        Ok(PlatformSelection::Only(platforms))
    }
}

impl Default for PlatformSelection {
    fn default() -> Self {
        PlatformSelection::Only(vec![Platform::new("linux", "amd64", None)])
    }
}

impl fmt::Display for PlatformSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformSelection::All => write!(f, "all"),
            PlatformSelection::Only(platforms) => {
                let rendered: Vec<String> = platforms.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SbomMode {
    #[default]
    Spdx,
    CycloneDx,
    GoVersionM,
    None,
}

impl SbomMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SbomMode::Spdx => "spdx",
            SbomMode::CycloneDx => "cyclonedx",
            SbomMode::GoVersionM => "go.version-m",
            SbomMode::None => "none",
        }
    }

    pub fn media_type(&self) -> Option<&'static str> {
        match self {
            SbomMode::Spdx => Some("text/spdx+json"),
            SbomMode::CycloneDx => Some("application/vnd.cyclonedx+json"),
            SbomMode::GoVersionM => Some("application/vnd.go.version-m"),
            SbomMode::None => None,
        }
    }
}

impl FromStr for SbomMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "spdx" => Ok(SbomMode::Spdx),
            "cyclonedx" => Ok(SbomMode::CycloneDx),
            "go.version-m" | "go-version-m" => Ok(SbomMode::GoVersionM),
            "none" => Ok(SbomMode::None),
            other => Err(Error::InvalidSbom(other.to_string())),
        }
    }
}

impl fmt::Display for SbomMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a `SOURCE_DATE_EPOCH` value (seconds since the Unix epoch)
pub fn parse_epoch(value: &str) -> Result<DateTime<Utc>> {
    let seconds: i64 = value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidEpoch(value.to_string()))?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::InvalidEpoch(value.to_string()))
}

/// Registry credentials given as `user:password`
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Self {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(Error::Config(
                "basic_auth must be in the form \"username:password\"".to_string(),
            )),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One source's view of the options; `None` leaves the field to others
#[derive(Debug, Clone, Default)]
pub struct PartialOptions {
    pub working_dir: Option<PathBuf>,
    pub base_image: Option<String>,
    pub platforms: Option<Vec<String>>,
    pub sbom: Option<String>,
    pub ldflags: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub trimpath: Option<bool>,
    pub source_date_epoch: Option<String>,
    pub go_binary: Option<PathBuf>,
    pub repo: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    pub tags: Option<Vec<String>>,
    pub naming: Option<NamingPolicy>,
    pub tag_reference: Option<bool>,
}

impl PartialOptions {
    /// Options carried by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            repo: non_empty(ENV_DOCKER_REPO),
            source_date_epoch: non_empty(ENV_SOURCE_DATE_EPOCH),
            go_binary: non_empty(ENV_GO_PATH).map(PathBuf::from),
            ..Default::default()
        }
    }

    /// Options a resource sets; a resource-level repo is used verbatim
    pub fn for_resource(repo: Option<String>) -> Self {
        let repo = repo.filter(|r| !r.is_empty());
        Self {
            naming: repo.as_ref().map(|_| NamingPolicy::Bare),
            repo,
            ..Default::default()
        }
    }

    /// Later layers override earlier ones field by field
    pub fn merge(layers: &[PartialOptions]) -> PartialOptions {
        let mut merged = PartialOptions::default();
        for layer in layers {
            macro_rules! take {
                ($($field:ident),*) => {
                    $(if layer.$field.is_some() { merged.$field = layer.$field.clone(); })*
                };
            }
            take!(
                working_dir,
                base_image,
                platforms,
                sbom,
                ldflags,
                env,
                trimpath,
                source_date_epoch,
                go_binary,
                repo,
                basic_auth,
                tags,
                naming,
                tag_reference
            );
        }
        merged
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub working_dir: PathBuf,
    pub base_image: String,
    pub platforms: PlatformSelection,
    pub sbom: SbomMode,
    pub ldflags: Vec<String>,
    pub env: Vec<String>,
    pub trimpath: bool,
    pub creation_time: Option<DateTime<Utc>>,
    pub go_binary: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from(DEFAULT_WORKING_DIR),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            platforms: PlatformSelection::default(),
            sbom: SbomMode::default(),
            ldflags: Vec::new(),
            env: Vec::new(),
            trimpath: true,
            creation_time: None,
            go_binary: None,
        }
    }
}

impl BuildOptions {
    pub fn from_partial(partial: &PartialOptions) -> Result<Self> {
        let defaults = BuildOptions::default();
        let platforms = match &partial.platforms {
            Some(entries) => PlatformSelection::parse(entries)?,
            None => defaults.platforms,
        };
        let sbom = match &partial.sbom {
            Some(s) => s.parse()?,
            None => defaults.sbom,
        };
        let creation_time = partial
            .source_date_epoch
            .as_deref()
            .map(parse_epoch)
            .transpose()?;
        Ok(Self {
            working_dir: partial.working_dir.clone().unwrap_or(defaults.working_dir),
            base_image: partial
                .base_image
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or(defaults.base_image),
            platforms,
            sbom,
            ldflags: partial.ldflags.clone().unwrap_or_default(),
            env: partial.env.clone().unwrap_or_default(),
            trimpath: partial.trimpath.unwrap_or(defaults.trimpath),
            creation_time,
            go_binary: partial.go_binary.clone(),
        })
    }

    /// Layer and config timestamp, epoch zero unless configured
    pub fn created(&self) -> DateTime<Utc> {
        self.creation_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn platform_summary(&self) -> String {
        match &self.platforms {
            PlatformSelection::Only(p) if p.is_empty() => DEFAULT_PLATFORM.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub repository: String,
    pub auth: Option<BasicAuth>,
    pub tags: Vec<String>,
    pub naming: NamingPolicy,
    pub user_agent: String,
    pub tag_reference: bool,
}

impl PublishOptions {
    pub fn new(repository: impl Into<String>, naming: NamingPolicy) -> Self {
        Self {
            repository: repository.into(),
            auth: None,
            tags: Vec::new(),
            naming,
            user_agent: USER_AGENT.to_string(),
            tag_reference: false,
        }
    }

    /// `default_naming` applies when no layer picked a policy
    pub fn from_partial(partial: &PartialOptions, default_naming: NamingPolicy) -> Result<Self> {
        let repository = partial
            .repo
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or(Error::MissingRepository)?;
        Ok(Self {
            repository,
            auth: partial.basic_auth.clone(),
            tags: partial.tags.clone().unwrap_or_default(),
            naming: partial.naming.unwrap_or(default_naming),
            user_agent: USER_AGENT.to_string(),
            tag_reference: partial.tag_reference.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_selection_parsing() {
        assert_eq!(PlatformSelection::parse::<&str>(&[]).unwrap(), PlatformSelection::default());
        assert_eq!(PlatformSelection::parse(&["all"]).unwrap(), PlatformSelection::All);
        assert!(PlatformSelection::parse(&["all", "linux/amd64"]).is_err());
        assert!(PlatformSelection::parse(&["linux//"]).is_err());

        let selection = PlatformSelection::parse(&["linux/arm64", "linux/amd64", "linux/arm64"]).unwrap();
        assert_eq!(selection.to_string(), "linux/arm64,linux/amd64");
    }

    #[test]
    fn test_sbom_parsing() {
        assert_eq!("spdx".parse::<SbomMode>().unwrap(), SbomMode::Spdx);
        assert_eq!("go-version-m".parse::<SbomMode>().unwrap(), SbomMode::GoVersionM);
        assert_eq!("go.version-m".parse::<SbomMode>().unwrap(), SbomMode::GoVersionM);
        assert!(matches!("xml".parse::<SbomMode>(), Err(Error::InvalidSbom(_))));
        assert!(SbomMode::None.media_type().is_none());
    }

    #[test]
    fn test_epoch_parsing() {
        assert_eq!(parse_epoch("0").unwrap().timestamp(), 0);
        assert_eq!(parse_epoch("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert!(matches!(parse_epoch("yesterday"), Err(Error::InvalidEpoch(_))));
    }

    #[test]
    fn test_basic_auth_parsing() {
        let auth = BasicAuth::parse("user:pa:ss").unwrap();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.password, "pa:ss");
        assert!(BasicAuth::parse("nocolon").is_err());
        assert!(!format!("{:?}", auth).contains("pa:ss"));
    }

    #[test]
    fn test_merge_order_later_wins() {
        let provider = PartialOptions {
            repo: Some("provider.example.com/p".to_string()),
            base_image: Some("provider/base".to_string()),
            ..Default::default()
        };
        let env = PartialOptions::from_lookup(|k| match k {
            "KO_DOCKER_REPO" => Some("env.example.com/e".to_string()),
            _ => None,
        });
        let resource = PartialOptions::for_resource(None);

        let merged = PartialOptions::merge(&[provider.clone(), env.clone(), resource]);
        assert_eq!(merged.repo.as_deref(), Some("env.example.com/e"));
        assert_eq!(merged.base_image.as_deref(), Some("provider/base"));
        assert!(merged.naming.is_none());

        let resource = PartialOptions::for_resource(Some("res.example.com/r".to_string()));
        let merged = PartialOptions::merge(&[provider, env, resource]);
        assert_eq!(merged.repo.as_deref(), Some("res.example.com/r"));
        assert_eq!(merged.naming, Some(NamingPolicy::Bare));
    }

    #[test]
    fn test_build_options_defaults_and_epoch() {
        let opts = BuildOptions::from_partial(&PartialOptions::default()).unwrap();
        assert_eq!(opts.base_image, DEFAULT_BASE_IMAGE);
        assert_eq!(opts.platform_summary(), "linux/amd64");
        assert!(opts.trimpath);
        assert_eq!(opts.created().timestamp(), 0);

        let untrimmed = PartialOptions {
            trimpath: Some(false),
            ..Default::default()
        };
        assert!(!BuildOptions::from_partial(&untrimmed).unwrap().trimpath);

        let bad = PartialOptions {
            source_date_epoch: Some("not-a-number".to_string()),
            ..Default::default()
        };
        let err = BuildOptions::from_partial(&bad).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_publish_options_require_repo() {
        let err = PublishOptions::from_partial(&PartialOptions::default(), NamingPolicy::Hashed).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("KO_DOCKER_REPO"));
        assert!(msg.contains("provider `repo`"));
        assert!(msg.contains("resource `repo`"));
    }
}
