/// Durable state: dedup snapshot + position book, both JSON files under the
/// data directory, written via temp-file-then-rename.

pub mod positions;
pub mod seen;

pub use positions::PositionStore;
pub use seen::{buy_key, SeenCache};

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// Write a JSON snapshot atomically: serialize to `<path>.tmp`, then rename
/// over the target so a crash mid-write cannot corrupt prior records.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("serializing snapshot")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let path = std::env::temp_dir().join(format!("shadow-atomic-{}.json", std::process::id()));
        let mut map = HashMap::new();
        map.insert("k".to_string(), 1_i64);

        write_json_atomic(&path, &map).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: HashMap<String, i64> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.get("k"), Some(&1));
        let _ = std::fs::remove_file(path);
    }
}
