//! Portable workspace bundles.
//!
//! A bundle is a zip holding `manifest.json` plus one JSON document per
//! collection (`students.json`, `attendance.json`, ..., `files.json`). The
//! active session is never exported. Import checks the whole bundle before
//! anything in the store is replaced.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::SCHEMA_VERSION;
use crate::model::{
    Attendance, BlobRecord, HallTicket, Record, ResultSheet, ScheduledEvent, Student, UserAccount,
};
use crate::store::{keys, Collection, Store};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT: &str = "portal-collections-v1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    app_version: String,
    schema_version: i64,
    exported_at: String,
    /// Entry count per collection key.
    collections: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub bundle_format: &'static str,
    pub collections: BTreeMap<String, usize>,
    /// Entries carried over as-is because they do not decode as their type.
    pub unreadable: usize,
}

/// Collections read from a bundle, checked and ready to be written.
#[derive(Debug)]
pub struct BundleContents {
    pub lists: Vec<(&'static str, Vec<Value>)>,
    pub files: serde_json::Map<String, Value>,
    pub summary: BundleSummary,
}

fn entry_name(key: &str) -> String {
    format!("{}.json", key)
}

fn read_files_map(store: &Store) -> serde_json::Map<String, Value> {
    store
        .read_raw(keys::FILES)
        .and_then(|text| serde_json::from_str::<serde_json::Map<String, Value>>(&text).ok())
        .unwrap_or_default()
}

fn write_entry<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    value: &impl Serialize,
) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {}", name))?;
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", name))?;
    zip.write_all(text.as_bytes())
        .with_context(|| format!("failed to write {}", name))?;
    Ok(())
}

/// Writes every collection of `store` to a bundle at `out_path`. The zip is
/// built next to the target and renamed into place once complete.
pub fn export_bundle(store: &Store, out_path: &Path) -> anyhow::Result<BundleSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let partial = out_path.with_extension("partial");

    let mut collections = BTreeMap::new();
    {
        let file = File::create(&partial)
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let mut zip = ZipWriter::new(file);

        for key in keys::LIST_COLLECTIONS {
            let values = store.read_values(key);
            collections.insert(key.to_string(), values.len());
            write_entry(&mut zip, &entry_name(key), &values)?;
        }
        let files = read_files_map(store);
        collections.insert(keys::FILES.to_string(), files.len());
        write_entry(&mut zip, &entry_name(keys::FILES), &files)?;

        let manifest = Manifest {
            format: BUNDLE_FORMAT.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            collections: collections.clone(),
        };
        write_entry(&mut zip, MANIFEST_ENTRY, &manifest)?;
        zip.finish().context("failed to finalize zip bundle")?;
    }
    std::fs::rename(&partial, out_path)
        .with_context(|| format!("failed to move bundle to {}", out_path.display()))?;

    info!(path = %out_path.display(), "bundle written");
    Ok(BundleSummary {
        bundle_format: BUNDLE_FORMAT,
        collections,
        unreadable: 0,
    })
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> anyhow::Result<Value> {
    let mut text = String::new();
    archive
        .by_name(name)
        .with_context(|| format!("bundle missing {}", name))?
        .read_to_string(&mut text)
        .with_context(|| format!("failed to read {}", name))?;
    serde_json::from_str(&text).with_context(|| format!("{} is invalid JSON", name))
}

fn undecodable<T: Collection>(values: &[Value]) -> usize {
    values
        .iter()
        .filter(|v| serde_json::from_value::<Record<T>>((*v).clone()).is_err())
        .count()
}

fn undecodable_in(key: &str, values: &[Value]) -> usize {
    match key {
        keys::STUDENTS => undecodable::<Student>(values),
        keys::ATTENDANCE => undecodable::<Attendance>(values),
        keys::RESULTS => undecodable::<ResultSheet>(values),
        keys::HALL_TICKETS => undecodable::<HallTicket>(values),
        keys::EVENTS => undecodable::<ScheduledEvent>(values),
        keys::USERS => undecodable::<UserAccount>(values),
        _ => 0,
    }
}

/// Every entry must be an object with a unique, non-empty string `id`.
fn check_ids(key: &str, values: &[Value]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for (i, v) in values.iter().enumerate() {
        let id = v
            .get("id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("{} entry {} has no id", key, i))?;
        if !seen.insert(id) {
            bail!("{} has duplicate id {}", key, id);
        }
    }
    Ok(())
}

fn check_count(manifest: &Manifest, key: &str, actual: usize) -> anyhow::Result<()> {
    match manifest.collections.get(key) {
        Some(&expected) if expected == actual => Ok(()),
        Some(&expected) => bail!(
            "{} holds {} entries but the manifest lists {}",
            key,
            actual,
            expected
        ),
        None => bail!("manifest does not list {}", key),
    }
}

/// Reads and checks a bundle without touching any store.
pub fn read_bundle(in_path: &Path) -> anyhow::Result<BundleContents> {
    let file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;

    let manifest: Manifest = serde_json::from_value(read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is malformed")?;
    if manifest.format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", manifest.format);
    }
    if manifest.schema_version > SCHEMA_VERSION {
        bail!(
            "bundle schema {} is newer than supported schema {}",
            manifest.schema_version,
            SCHEMA_VERSION
        );
    }

    let mut lists = Vec::with_capacity(keys::LIST_COLLECTIONS.len());
    let mut unreadable = 0;
    for key in keys::LIST_COLLECTIONS {
        let name = entry_name(key);
        let Value::Array(values) = read_entry(&mut archive, &name)? else {
            bail!("{} is not a JSON array", name);
        };
        check_count(&manifest, key, values.len())?;
        check_ids(key, &values)?;
        let bad = undecodable_in(key, &values);
        if bad > 0 {
            warn!(key, count = bad, "bundle carries unreadable records");
        }
        unreadable += bad;
        lists.push((key, values));
    }

    let files_name = entry_name(keys::FILES);
    let Value::Object(files) = read_entry(&mut archive, &files_name)? else {
        bail!("{} is not a JSON object", files_name);
    };
    check_count(&manifest, keys::FILES, files.len())?;
    for (id, v) in &files {
        match serde_json::from_value::<BlobRecord>(v.clone()) {
            Ok(blob) if blob.id != *id => bail!("file {} is stored under {}", blob.id, id),
            Ok(_) => {}
            Err(_) => unreadable += 1,
        }
    }

    let mut collections: BTreeMap<String, usize> = lists
        .iter()
        .map(|(key, values)| (key.to_string(), values.len()))
        .collect();
    collections.insert(keys::FILES.to_string(), files.len());

    Ok(BundleContents {
        lists,
        files,
        summary: BundleSummary {
            bundle_format: BUNDLE_FORMAT,
            collections,
            unreadable,
        },
    })
}

/// Replaces every collection of `store` with the bundle's. Nothing is written
/// unless the whole bundle checks out. The active session is left alone.
pub fn import_bundle(store: &mut Store, in_path: &Path) -> anyhow::Result<BundleSummary> {
    let contents = read_bundle(in_path)?;
    store.restore_collections(&contents.lists, &contents.files)?;
    info!(path = %in_path.display(), "bundle restored");
    Ok(contents.summary)
}
