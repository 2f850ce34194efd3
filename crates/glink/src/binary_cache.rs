//! Linked-program binaries keyed by normalized source.
//!
//! Entries store the driver's format tag (`u32`, little endian) followed by
//! the raw binary. A tag the driver no longer accepts makes the load fail;
//! the caller drops the entry and relinks from source.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, ensure, Context as _, Result};
use glink_driver::{Driver, ProgramBinary};
use glink_core::ProgramHandle;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::preprocess::normalize;
use crate::stage::Stage;

const FILE_MAGIC: &[u8; 8] = b"GLNKBIN\0";
const FILE_VERSION: u32 = 1;

/// Identity of a cacheable unit: a stage (separable) or a stage set (monolithic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryKey(String);

impl BinaryKey {
    /// Key of one separable stage.
    pub fn for_stage(stage: &Stage) -> Result<Self, LinkError> {
        Ok(Self(format!("separable\n{}", stage_identity(stage)?)))
    }

    /// Key of a monolithic program linked from `stages`, in slot order.
    pub fn for_program<'a>(stages: impl IntoIterator<Item = &'a Stage>) -> Result<Self, LinkError> {
        let mut key = String::from("monolithic");
        for stage in stages {
            key.push('\n');
            key.push_str(&stage_identity(stage)?);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn stage_identity(stage: &Stage) -> Result<String, LinkError> {
    let source = normalize(stage.expanded_source()?);
    Ok(format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        stage.kind(),
        stage.defines().normalized(),
        source.len(),
        source
    ))
}

fn encode_entry(binary: &ProgramBinary) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + binary.bytes.len());
    value.extend_from_slice(&binary.format.to_le_bytes());
    value.extend_from_slice(&binary.bytes);
    value
}

fn decode_entry(value: &[u8]) -> Option<ProgramBinary> {
    let tag: [u8; 4] = value.get(..4)?.try_into().ok()?;
    Some(ProgramBinary {
        format: u32::from_le_bytes(tag),
        bytes: value[4..].to_vec(),
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BinaryCache {
    entries: FxHashMap<BinaryKey, Vec<u8>>,
}

impl BinaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BinaryKey) -> Option<ProgramBinary> {
        self.entries.get(key).and_then(|value| decode_entry(value))
    }

    pub fn insert(&mut self, key: BinaryKey, binary: &ProgramBinary) {
        self.entries.insert(key, encode_entry(binary));
    }

    pub fn remove(&mut self, key: &BinaryKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &BinaryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write every entry to `path`, replacing the file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut keys: Vec<&BinaryKey> = self.entries.keys().collect();
        keys.sort();

        let mut out = Vec::new();
        out.extend_from_slice(FILE_MAGIC);
        out.extend_from_slice(&FILE_VERSION.to_le_bytes());
        out.extend_from_slice(&(keys.len() as u32).to_le_bytes());
        for key in keys {
            let value = &self.entries[key];
            out.extend_from_slice(&(key.0.len() as u32).to_le_bytes());
            out.extend_from_slice(key.0.as_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }

        let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        file.write_all(&out)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), entries = self.entries.len(), "saved program binary cache");
        Ok(())
    }

    /// Read a cache written by [`BinaryCache::save_to`].
    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let cache = Self::parse(&bytes).with_context(|| format!("parsing {}", path.display()))?;
        debug!(path = %path.display(), entries = cache.len(), "loaded program binary cache");
        Ok(cache)
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader(bytes);
        ensure!(reader.take(FILE_MAGIC.len())? == FILE_MAGIC, "not a program binary cache");
        let version = reader.u32()?;
        if version != FILE_VERSION {
            bail!("unsupported cache version {version}");
        }

        let count = reader.u32()?;
        let mut entries = FxHashMap::default();
        for _ in 0..count {
            let key_len = reader.u32()? as usize;
            let key = std::str::from_utf8(reader.take(key_len)?).context("cache key is not UTF-8")?;
            let value_len = reader.u32()? as usize;
            let value = reader.take(value_len)?;
            ensure!(value.len() >= 4, "cache entry without a format tag");
            entries.insert(BinaryKey(key.to_owned()), value.to_vec());
        }
        ensure!(reader.0.is_empty(), "trailing bytes after {count} entries");
        Ok(Self { entries })
    }
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(self.0.len() >= len, "truncated cache file");
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Try the cached binary for `key` on `program`.
///
/// A rejected binary is dropped from the cache so the caller's source link
/// can store a fresh one.
pub(crate) fn try_load(
    driver: &mut dyn Driver,
    cache: &mut BinaryCache,
    key: &BinaryKey,
    program: ProgramHandle,
) -> bool {
    let Some(binary) = cache.get(key) else {
        return false;
    };
    if driver.load_program_binary(program, &binary) {
        debug!(?program, format = binary.format, "linked from cached binary");
        return true;
    }
    debug!(?program, format = binary.format, "cached binary rejected, recompiling");
    cache.remove(key);
    false
}

/// Store `program`'s binary under `key`, if the driver can produce one.
pub(crate) fn store(driver: &dyn Driver, cache: &mut BinaryCache, key: BinaryKey, program: ProgramHandle) {
    match driver.program_binary(program) {
        Some(binary) => {
            trace!(?program, format = binary.format, len = binary.bytes.len(), "caching program binary");
            cache.insert(key, &binary);
        }
        None => trace!(?program, "driver returned no program binary"),
    }
}

#[cfg(test)]
mod tests {
    use glink_core::StageKind;
    use pretty_assertions::assert_eq;

    use super::*;

    fn binary(format: u32, bytes: &[u8]) -> ProgramBinary {
        ProgramBinary {
            format,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn format_tag_leads_the_entry() {
        let entry = encode_entry(&binary(0x1234_5678, b"abc"));
        assert_eq!(entry, vec![0x78, 0x56, 0x34, 0x12, b'a', b'b', b'c']);
        assert_eq!(decode_entry(&entry), Some(binary(0x1234_5678, b"abc")));
        assert_eq!(decode_entry(&[1, 2, 3]), None);
    }

    #[test]
    fn keys_ignore_layout_and_define_order() {
        let a = Stage::new(StageKind::Fragment, "a", "uniform  vec4 tint;\n\nvoid main() {}\n").with_defines("B;A=2");
        let b = Stage::new(StageKind::Fragment, "b", "uniform vec4 tint;\nvoid main() {}").with_defines("A=2,B");
        let c = Stage::new(StageKind::Fragment, "c", "uniform vec4 tint;\nvoid main() {}").with_defines("A=3,B");
        assert_eq!(BinaryKey::for_stage(&a).unwrap(), BinaryKey::for_stage(&b).unwrap());
        assert_ne!(BinaryKey::for_stage(&a).unwrap(), BinaryKey::for_stage(&c).unwrap());
        assert_ne!(
            BinaryKey::for_stage(&a).unwrap(),
            BinaryKey::for_program([&a]).unwrap()
        );
    }

    #[test]
    fn disk_round_trip() {
        let mut cache = BinaryCache::new();
        cache.insert(BinaryKey("monolithic\nx".into()), &binary(7, b"first"));
        cache.insert(BinaryKey("separable\ny".into()), &binary(9, b""));

        let path = std::env::temp_dir().join(format!("glink-binary-cache-{}.bin", std::process::id()));
        cache.save_to(&path).unwrap();
        let loaded = BinaryCache::load_from(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, cache);
        assert_eq!(loaded.get(&BinaryKey("separable\ny".into())), Some(binary(9, b"")));
    }

    #[test]
    fn malformed_files_are_errors() {
        assert!(BinaryCache::parse(b"nope").is_err());

        let mut truncated = FILE_MAGIC.to_vec();
        truncated.extend_from_slice(&FILE_VERSION.to_le_bytes());
        truncated.extend_from_slice(&3u32.to_le_bytes());
        assert!(BinaryCache::parse(&truncated).is_err());

        let mut future = FILE_MAGIC.to_vec();
        future.extend_from_slice(&(FILE_VERSION + 1).to_le_bytes());
        future.extend_from_slice(&0u32.to_le_bytes());
        assert!(BinaryCache::parse(&future).is_err());
    }
}
