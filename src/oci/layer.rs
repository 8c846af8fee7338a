use crate::constants::{APP_DIR, KO_DATA_PATH};
use crate::error::Result;
use crate::oci::digest::digest_of;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use tar::{Builder, EntryType, Header};

#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Digest of the compressed blob
    pub digest: String,
    pub size: u64,
    /// Digest of the uncompressed tar
    pub diff_id: String,
    pub data: Vec<u8>,
}

/// A static data file shipped next to the binary, path relative to `kodata/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: String,
    pub data: Vec<u8>,
    pub executable: bool,
}

enum Entry<'a> {
    Dir,
    File { data: &'a [u8], mode: u32 },
}

/// Builds the application layer: the binary at `/ko-app/<name>` and any
/// data files under `/var/run/ko`. Output is byte-identical for identical
/// inputs and `mtime`.
pub fn build_app_layer(
    binary_name: &str,
    binary: &[u8],
    data_files: &[DataFile],
    mtime: u64,
) -> Result<LayerInfo> {
    let mut entries: BTreeMap<String, Entry<'_>> = BTreeMap::new();
    let app_dir = APP_DIR.trim_start_matches('/');
    add_parents(&mut entries, &format!("{}/{}", app_dir, binary_name));
    entries.insert(
        format!("{}/{}", app_dir, binary_name),
        Entry::File {
            data: binary,
            mode: 0o755,
        },
    );

    let data_dir = KO_DATA_PATH.trim_start_matches('/');
    add_parents(&mut entries, &format!("{}/", data_dir));
    entries.insert(data_dir.to_string(), Entry::Dir);
    for file in data_files {
        let path = format!("{}/{}", data_dir, file.path.trim_start_matches('/'));
        add_parents(&mut entries, &path);
        let mode = if file.executable { 0o755 } else { 0o644 };
        entries.insert(
            path,
            Entry::File {
                data: &file.data,
                mode,
            },
        );
    }

    let mut tar = Builder::new(Vec::new());
    for (path, entry) in &entries {
        let mut header = Header::new_gnu();
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);
        match entry {
            Entry::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                tar.append_data(&mut header, format!("{}/", path), std::io::empty())?;
            }
            Entry::File { data, mode } => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                header.set_cksum();
                tar.append_data(&mut header, path, *data)?;
            }
        }
    }
    let tar_bytes = tar.into_inner()?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &tar_bytes)?;
    let data = encoder.finish()?;

    Ok(LayerInfo {
        digest: digest_of(&data),
        size: data.len() as u64,
        diff_id: digest_of(&tar_bytes),
        data,
    })
}

fn add_parents<'a>(entries: &mut BTreeMap<String, Entry<'a>>, path: &str) {
    let mut prefix = String::new();
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let dirs = if path.ends_with('/') {
        components.len()
    } else {
        components.len().saturating_sub(1)
    };
    for component in &components[..dirs] {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(component);
        entries.entry(prefix.clone()).or_insert(Entry::Dir);
    }
}
