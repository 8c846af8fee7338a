use crate::constants::{APP_DIR, KO_DATA_PATH};
use crate::error::{Error, Result};
use crate::oci::platform::Platform;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// What the application layer adds on top of a base image config
#[derive(Debug, Clone)]
pub struct ConfigUpdate<'a> {
    pub platform: &'a Platform,
    pub binary_name: &'a str,
    pub diff_id: &'a str,
    pub created: DateTime<Utc>,
    pub created_by: &'a str,
}

/// The platform a base config describes
pub fn config_platform(config: &[u8]) -> Result<Platform> {
    let value: Value = serde_json::from_slice(config)?;
    let field = |name: &str| value.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
    let os = field("os");
    if os.is_empty() {
        return Err(Error::Config("base image config does not declare an os".to_string()));
    }
    let variant = field("variant");
    Ok(Platform {
        os,
        architecture: field("architecture"),
        variant: (!variant.is_empty()).then_some(variant),
    })
}

/// Derives the application image config from the base image config
pub fn derive_config(base: &[u8], update: &ConfigUpdate<'_>) -> Result<Vec<u8>> {
    let mut value: Value = if base.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(base)?
    };
    let root = value
        .as_object_mut()
        .ok_or_else(|| Error::Config("base image config is not a JSON object".to_string()))?;

    let created = update.created.to_rfc3339_opts(SecondsFormat::Secs, true);
    root.insert("created".to_string(), json!(created));
    root.insert("os".to_string(), json!(update.platform.os));
    root.insert("architecture".to_string(), json!(update.platform.architecture));
    match &update.platform.variant {
        Some(variant) => {
            root.insert("variant".to_string(), json!(variant));
        }
        None => {
            root.remove("variant");
        }
    }

    let rootfs = object_entry(root, "rootfs");
    rootfs.insert("type".to_string(), json!("layers"));
    array_entry(rootfs, "diff_ids").push(json!(update.diff_id));

    array_entry(root, "history").push(json!({
        "created": created,
        "created_by": update.created_by,
        "author": "ocipress",
        "comment": format!("{}/{}", APP_DIR, update.binary_name),
    }));

    let config = object_entry(root, "config");
    config.insert(
        "Entrypoint".to_string(),
        json!([format!("{}/{}", APP_DIR, update.binary_name)]),
    );
    config.remove("Cmd");

    let env = array_entry(config, "Env");
    let mut has_path = false;
    for entry in env.iter_mut() {
        if let Some(current) = entry.as_str() {
            if let Some(path) = current.strip_prefix("PATH=") {
                *entry = json!(format!("PATH={}:{}", path, APP_DIR));
                has_path = true;
            }
        }
    }
    if !has_path {
        env.push(json!(format!("PATH={}:{}", DEFAULT_PATH, APP_DIR)));
    }
    env.retain(|e| !e.as_str().is_some_and(|s| s.starts_with("KO_DATA_PATH=")));
    env.push(json!(format!("KO_DATA_PATH={}", KO_DATA_PATH)));

    Ok(serde_json::to_vec(&value)?)
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map.entry(key.to_string()).or_insert_with(|| json!({}));
    if !slot.is_object() {
        *slot = json!({});
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just set to an object"),
    }
}

fn array_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    let slot = map.entry(key.to_string()).or_insert_with(|| json!([]));
    if !slot.is_array() {
        *slot = json!([]);
    }
    match slot {
        Value::Array(inner) => inner,
        _ => unreachable!("slot was just set to an array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: &str = r#"{
        "architecture": "amd64",
        "os": "linux",
        "config": {"Env": ["PATH=/usr/bin:/bin", "SSL_CERT_FILE=/etc/ssl/certs/ca-certificates.crt"], "Cmd": ["/bin/sh"], "User": "65532"},
        "rootfs": {"type": "layers", "diff_ids": ["sha256:base"]},
        "history": [{"created": "2024-01-01T00:00:00Z"}]
    }"#;

    fn update<'a>(platform: &'a Platform) -> ConfigUpdate<'a> {
        ConfigUpdate {
            platform,
            binary_name: "app",
            diff_id: "sha256:app",
            created: Utc.timestamp_opt(0, 0).unwrap(),
            created_by: "ocipress build example.com/app",
        }
    }

    #[test]
    fn test_derive_config_layers_on_base() {
        let platform = Platform::new("linux", "arm64", Some("v8"));
        let out = derive_config(BASE.as_bytes(), &update(&platform)).unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(v["architecture"], "arm64");
        assert_eq!(v["variant"], "v8");
        assert_eq!(v["created"], "1970-01-01T00:00:00Z");
        assert_eq!(v["rootfs"]["diff_ids"], json!(["sha256:base", "sha256:app"]));
        assert_eq!(v["history"].as_array().unwrap().len(), 2);
        assert_eq!(v["config"]["Entrypoint"], json!(["/ko-app/app"]));
        assert!(v["config"].get("Cmd").is_none());
        assert_eq!(v["config"]["User"], "65532");

        let env: Vec<&str> = v["config"]["Env"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e.as_str().unwrap())
            .collect();
        assert!(env.contains(&"PATH=/usr/bin:/bin:/ko-app"));
        assert!(env.contains(&"KO_DATA_PATH=/var/run/ko"));
    }

    #[test]
    fn test_derive_config_is_deterministic() {
        let platform = Platform::new("linux", "amd64", None);
        let a = derive_config(BASE.as_bytes(), &update(&platform)).unwrap();
        let b = derive_config(BASE.as_bytes(), &update(&platform)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_base_gets_default_path() {
        let platform = Platform::new("linux", "amd64", None);
        let out = derive_config(b"", &update(&platform)).unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        let path = v["config"]["Env"][0].as_str().unwrap();
        assert!(path.starts_with("PATH=/usr/local/sbin"));
        assert!(path.ends_with(":/ko-app"));
    }

    #[test]
    fn test_config_platform() {
        let p = config_platform(BASE.as_bytes()).unwrap();
        assert_eq!(p.to_string(), "linux/amd64");
        assert!(config_platform(b"{}").is_err());
    }
}
