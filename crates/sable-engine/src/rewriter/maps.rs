//! Checkpoint index structures produced by the instrumenting rewriter.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Stable identifier of a checkpoint, assigned densely from 1 in source
/// order during the rewrite.
pub type CheckpointId = u32;

/// Original source position of the statement a checkpoint guards (not the
/// inserted call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// The two index maps the debugger consumes at runtime.
///
/// `checkpoints` is injective (one site per id); `methods` lists each
/// method's ids in lexical source order, which is also ascending id order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentationMaps {
    pub checkpoints: BTreeMap<CheckpointId, SourceLoc>,
    pub methods: FxHashMap<String, Vec<CheckpointId>>,
}

impl InstrumentationMaps {
    /// Qualified method owning a checkpoint id.
    pub fn method_of(&self, id: CheckpointId) -> Option<&str> {
        self.methods
            .iter()
            .find(|(_, ids)| ids.contains(&id))
            .map(|(name, _)| name.as_str())
    }

    /// Resolve `file:line` to the nearest checkpoint.
    ///
    /// Candidate sites are matched by exact file path first, then by file
    /// basename, then by substring containment; within the winning tier the
    /// site minimizing `|line − target|` is chosen, ties broken by the
    /// smallest id.
    pub fn resolve_line(&self, file: &str, line: u32) -> Option<CheckpointId> {
        let exact: Vec<_> = self.sites(|f| f == file);
        let tier = if !exact.is_empty() {
            exact
        } else {
            let by_basename = self.sites(|f| {
                Path::new(f)
                    .file_name()
                    .map(|b| b.to_string_lossy() == file)
                    .unwrap_or(false)
            });
            if !by_basename.is_empty() {
                by_basename
            } else {
                self.sites(|f| f.contains(file))
            }
        };
        tier.into_iter()
            .min_by_key(|(id, site_line)| (site_line.abs_diff(line), *id))
            .map(|(id, _)| id)
    }

    fn sites(&self, matches: impl Fn(&str) -> bool) -> Vec<(CheckpointId, u32)> {
        self.checkpoints
            .iter()
            .filter(|(_, loc)| matches(&loc.file))
            .map(|(&id, loc)| (id, loc.line))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> InstrumentationMaps {
        let mut m = InstrumentationMaps::default();
        for (id, file, line) in [
            (1, "scripts/demo.sbl", 3),
            (2, "scripts/demo.sbl", 7),
            (3, "lib/util.sbl", 5),
        ] {
            m.checkpoints.insert(
                id,
                SourceLoc {
                    file: file.to_string(),
                    line,
                    column: 1,
                },
            );
        }
        m.methods.insert("demo.main".into(), vec![1, 2]);
        m.methods.insert("demo.util".into(), vec![3]);
        m
    }

    #[test]
    fn test_method_of() {
        let m = maps();
        assert_eq!(m.method_of(2), Some("demo.main"));
        assert_eq!(m.method_of(9), None);
    }

    #[test]
    fn test_resolve_exact_path_wins() {
        let m = maps();
        assert_eq!(m.resolve_line("scripts/demo.sbl", 6), Some(2));
        // `util.sbl` only matches by basename.
        assert_eq!(m.resolve_line("util.sbl", 1), Some(3));
    }

    #[test]
    fn test_resolve_substring_fallback() {
        let m = maps();
        assert_eq!(m.resolve_line("demo", 100), Some(2));
        assert_eq!(m.resolve_line("nothing-matches", 1), None);
    }

    #[test]
    fn test_resolve_tie_prefers_smallest_id() {
        let m = maps();
        // line 5 is equidistant from 3 and 7 — id 1 wins.
        assert_eq!(m.resolve_line("scripts/demo.sbl", 5), Some(1));
    }

    #[test]
    fn test_serde_roundtrip() {
        let m = maps();
        let json = serde_json::to_string(&m).unwrap();
        let back: InstrumentationMaps = serde_json::from_str(&json).unwrap();
        assert_eq!(back.checkpoints, m.checkpoints);
        assert_eq!(back.methods.len(), 2);
    }
}
