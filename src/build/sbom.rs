//! Software bills of materials for built binaries.
//!
//! Documents are derived from the binary's embedded build information
//! (`go version -m`). They travel next to the image and never affect its
//! digest.

use crate::build::compiler::CompiledBinary;
use crate::error::Result;
use crate::oci::digest::sha256_bytes;
use crate::options::SbomMode;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Sbom {
    pub mode: SbomMode,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub path: String,
    pub version: String,
    pub sum: Option<String>,
}

/// Parsed `go version -m` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub go_version: String,
    pub path: String,
    pub main: Option<Module>,
    pub deps: Vec<Module>,
    pub settings: Vec<(String, String)>,
}

pub fn parse_build_info(text: &str) -> BuildInfo {
    let mut info = BuildInfo::default();
    for line in text.lines() {
        if !line.starts_with('\t') {
            if let Some((_, version)) = line.rsplit_once(": ") {
                info.go_version = version.trim().to_string();
            }
            continue;
        }
        let fields: Vec<&str> = line.trim().split('\t').collect();
        match fields.as_slice() {
            ["path", path, ..] => info.path = path.to_string(),
            ["mod", path, version, rest @ ..] => {
                info.main = Some(Module {
                    path: path.to_string(),
                    version: version.to_string(),
                    sum: rest.first().filter(|s| !s.is_empty()).map(|s| s.to_string()),
                })
            }
            ["dep", path, version, rest @ ..] => info.deps.push(Module {
                path: path.to_string(),
                version: version.to_string(),
                sum: rest.first().filter(|s| !s.is_empty()).map(|s| s.to_string()),
            }),
            ["build", setting, ..] => {
                if let Some((k, v)) = setting.split_once('=') {
                    info.settings.push((k.to_string(), v.to_string()));
                }
            }
            _ => {}
        }
    }
    info
}

fn purl(module: &Module) -> String {
    format!("pkg:golang/{}@{}?type=module", module.path, module.version)
}

fn main_module(import_path: &str, info: &BuildInfo) -> Module {
    info.main.clone().unwrap_or_else(|| Module {
        path: if info.path.is_empty() {
            import_path.to_string()
        } else {
            info.path.clone()
        },
        version: "(devel)".to_string(),
        sum: None,
    })
}

fn spdx_id(prefix: &str, path: &str) -> String {
    let cleaned: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    format!("SPDXRef-{}-{}", prefix, cleaned)
}

fn spdx(import_path: &str, binary: &CompiledBinary, info: &BuildInfo, created: &str) -> Value {
    let main = main_module(import_path, info);
    let binary_sha = sha256_bytes(&binary.data);
    let main_id = spdx_id("Package", &main.path);

    let mut packages = vec![json!({
        "SPDXID": main_id,
        "name": main.path,
        "versionInfo": main.version,
        "downloadLocation": "NOASSERTION",
        "filesAnalyzed": false,
        "checksums": [{"algorithm": "SHA256", "checksumValue": binary_sha}],
        "externalRefs": [{
            "referenceCategory": "PACKAGE-MANAGER",
            "referenceType": "purl",
            "referenceLocator": purl(&main),
        }],
    })];
    let mut relationships = vec![json!({
        "spdxElementId": "SPDXRef-DOCUMENT",
        "relationshipType": "DESCRIBES",
        "relatedSpdxElement": main_id,
    })];
    for dep in &info.deps {
        let id = spdx_id("Package", &format!("{}-{}", dep.path, dep.version));
        packages.push(json!({
            "SPDXID": id,
            "name": dep.path,
            "versionInfo": dep.version,
            "downloadLocation": "NOASSERTION",
            "filesAnalyzed": false,
            "externalRefs": [{
                "referenceCategory": "PACKAGE-MANAGER",
                "referenceType": "purl",
                "referenceLocator": purl(dep),
            }],
        }));
        relationships.push(json!({
            "spdxElementId": main_id,
            "relationshipType": "DEPENDS_ON",
            "relatedSpdxElement": id,
        }));
    }

    json!({
        "spdxVersion": "SPDX-2.3",
        "dataLicense": "CC0-1.0",
        "SPDXID": "SPDXRef-DOCUMENT",
        "name": binary.name,
        "documentNamespace": format!("http://spdx.org/spdxdocs/ocipress/{}-{}", binary.name, binary_sha),
        "creationInfo": {
            "created": created,
            "creators": [format!("Tool: ocipress-{}", env!("CARGO_PKG_VERSION"))],
        },
        "packages": packages,
        "relationships": relationships,
    })
}

fn cyclonedx(import_path: &str, binary: &CompiledBinary, info: &BuildInfo, created: &str) -> Value {
    let main = main_module(import_path, info);
    let components: Vec<Value> = info
        .deps
        .iter()
        .map(|dep| {
            json!({
                "bom-ref": purl(dep),
                "type": "library",
                "name": dep.path,
                "version": dep.version,
                "purl": purl(dep),
            })
        })
        .collect();
    json!({
        "bomFormat": "CycloneDX",
        "specVersion": "1.4",
        "version": 1,
        "metadata": {
            "timestamp": created,
            "tools": [{"vendor": "ocipress", "name": "ocipress", "version": env!("CARGO_PKG_VERSION")}],
            "component": {
                "bom-ref": purl(&main),
                "type": "application",
                "name": main.path,
                "version": main.version,
                "purl": purl(&main),
                "hashes": [{"alg": "SHA-256", "content": sha256_bytes(&binary.data)}],
            },
        },
        "components": components,
    })
}

/// Generates the SBOM for `binary`, or `None` when disabled
pub fn generate(
    mode: SbomMode,
    import_path: &str,
    binary: &CompiledBinary,
    created: DateTime<Utc>,
) -> Result<Option<Sbom>> {
    let Some(media_type) = mode.media_type() else {
        return Ok(None);
    };
    let build_info = binary.build_info.as_deref().unwrap_or_default();
    let info = parse_build_info(build_info);
    let created = created.to_rfc3339_opts(SecondsFormat::Secs, true);
    let data = match mode {
        SbomMode::Spdx => serde_json::to_vec(&spdx(import_path, binary, &info, &created))?,
        SbomMode::CycloneDx => serde_json::to_vec(&cyclonedx(import_path, binary, &info, &created))?,
        SbomMode::GoVersionM => build_info.as_bytes().to_vec(),
        SbomMode::None => return Ok(None),
    };
    Ok(Some(Sbom {
        mode,
        media_type: media_type.to_string(),
        data,
    }))
}
