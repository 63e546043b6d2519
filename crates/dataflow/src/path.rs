//! Relocating data-product paths under a root-in-store prefix.
//!
//! The same algorithm configuration can then run against another logical
//! branch of the store (say `Hlt/` or `Spillover/`) without touching each
//! handle by hand.

use tracing::debug;

use crate::holder::HandleRegistry;
use crate::id::DataObjID;
use crate::visitor::DependencyVisitor;

/// Canonical store root used by [`full_location`].
pub const DEFAULT_ROOT: &str = "/Event";

/// Resolve one location against a root-in-store prefix.
///
/// - empty prefix: location unchanged
/// - empty location, or the canonical root itself: the bare prefix
/// - under the canonical root: prefix substituted for it
/// - anything else, absolute or relative: prefixed
pub fn full_location(location: &str, root_in_store: &str) -> String {
    resolve(location, root_in_store, DEFAULT_ROOT)
}

fn resolve(location: &str, root_in_store: &str, root: &str) -> String {
    if root_in_store.is_empty() {
        return location.to_string();
    }
    let prefix = with_separator(root_in_store);
    if location.is_empty() || location == root {
        return prefix.trim_end_matches('/').to_string();
    }
    if let Some(rest) = location
        .strip_prefix(root)
        .and_then(|r| r.strip_prefix('/'))
    {
        return format!("{prefix}{rest}");
    }
    format!("{prefix}{}", location.trim_start_matches('/'))
}

fn with_separator(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Rewrites every key of every visited holder.
///
/// Each colon-separated token goes through [`full_location`]; a result that
/// is still relative is anchored under the root name.
#[derive(Debug, Clone)]
pub struct PathFixer {
    root_in_store: String,
    root_name: String,
}

impl PathFixer {
    pub fn new(root_in_store: impl Into<String>, root_name: impl Into<String>) -> Self {
        Self {
            root_in_store: root_in_store.into(),
            root_name: root_name.into(),
        }
    }

    pub fn root_in_store(&self) -> &str {
        &self.root_in_store
    }

    pub fn full_location(&self, location: &str) -> String {
        resolve(location, &self.root_in_store, &self.root_name)
    }

    /// Fix a possibly colon-separated list of locations.
    pub fn fix_path(&self, path: &str) -> String {
        path.split(':')
            .map(|tok| {
                let r = self.full_location(tok);
                if r.starts_with('/') {
                    r
                } else {
                    format!("{}/{}", self.root_name.trim_end_matches('/'), r)
                }
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn fix_id(&self, id: &DataObjID) -> DataObjID {
        id.with_key(self.fix_path(id.key()))
    }
}

impl DependencyVisitor for PathFixer {
    fn visit(&mut self, holder: &HandleRegistry) {
        holder.rewrite_keys(|id| {
            let fixed = self.fix_id(id);
            if &fixed != id {
                debug!(holder = %holder.holder(), from = %id, to = %fixed, "fixed data path");
            }
            fixed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::HandleRegistry;
    use crate::id::AccessMode;
    use crate::visitor::walk;

    #[test]
    fn full_location_rules() {
        let rit = "rit/";
        assert_eq!(full_location("", rit), "rit");
        assert_eq!(full_location("/Event", rit), "rit");
        assert_eq!(full_location("/Event/MyObj", rit), "rit/MyObj");
        assert_eq!(full_location("MyObj", rit), "rit/MyObj");
        assert_eq!(full_location("/Other/MyObj", rit), "rit/Other/MyObj");
    }

    #[test]
    fn empty_prefix_leaves_location_alone() {
        assert_eq!(full_location("MyObj", ""), "MyObj");
        assert_eq!(full_location("/Event/MyObj", ""), "/Event/MyObj");
    }

    #[test]
    fn prefix_without_separator_is_completed() {
        assert_eq!(full_location("MyObj", "rit"), "rit/MyObj");
        assert_eq!(full_location("", "rit"), "rit");
    }

    #[test]
    fn event_prefix_lookalike_is_not_the_root() {
        // "/EventX" is an unrelated absolute location.
        assert_eq!(full_location("/EventX/A", "rit/"), "rit/EventX/A");
    }

    #[test]
    fn fix_path_anchors_relative_results() {
        let fixer = PathFixer::new("rit/", "/Event");
        assert_eq!(fixer.fix_path("/Event/MyObj"), "/Event/rit/MyObj");
        assert_eq!(fixer.fix_path("MyObj"), "/Event/rit/MyObj");
        assert_eq!(fixer.fix_path("/Other/X"), "/Event/rit/Other/X");
        assert_eq!(
            fixer.fix_path("/Event/A:B:/Other/C"),
            "/Event/rit/A:/Event/rit/B:/Event/rit/Other/C"
        );
    }

    #[test]
    fn fix_path_without_prefix_only_anchors_relative() {
        let fixer = PathFixer::new("", "/Event");
        assert_eq!(fixer.fix_path("/Other/X"), "/Other/X");
        assert_eq!(fixer.fix_path("MyObj"), "/Event/MyObj");
    }

    #[test]
    fn visitor_rewrites_handles_and_extras() {
        let alg = HandleRegistry::new("A");
        let input = alg.declare_read::<u32>("/Event/Tracks").unwrap();
        alg.add_dependency("Vertices", AccessMode::Write);

        let mut fixer = PathFixer::new("Hlt", "/Event");
        walk(&alg, &mut fixer);

        assert_eq!(input.id().key(), "/Event/Hlt/Tracks");
        let outputs: Vec<String> = alg
            .output_data_objs()
            .iter()
            .map(|id| id.key().to_string())
            .collect();
        assert_eq!(outputs, vec!["/Event/Hlt/Vertices"]);
    }
}
