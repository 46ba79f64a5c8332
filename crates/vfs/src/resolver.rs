//! Mount tree and path resolution
//!
//! Nodes live in an arena indexed by `NodeId`; children are name-keyed
//! per node and the arena itself doubles as the flat index inverse
//! resolution scans. The tree is acyclic and only ever grows until the
//! runtime is torn down.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

use crate::path::{PathInfo, cleanse, lexically_normal};

/// File I/O result type
pub type Result<T> = std::result::Result<T, Error>;

/// File I/O errors
///
/// Resolution misses are not errors; they surface as `None` from the
/// lookup functions and higher layers turn them into diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

type NodeId = usize;

const ROOT: NodeId = 0;

/// One node of the virtual mount tree.
#[derive(Debug, Default)]
struct PathNode {
    /// Absolute logical path of this node from the root
    virtual_full: String,
    /// Physical directories overlaying this node, in mount order
    physical: Vec<PathBuf>,
    /// Child nodes by segment; keys are lowercased unless the tree is
    /// case sensitive
    children: IndexMap<String, NodeId>,
}

/// The virtual-to-physical resolver.
#[derive(Debug)]
pub struct FileIo {
    nodes: Vec<PathNode>,
    case_sensitive: bool,
}

impl Default for FileIo {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FileIo {
    /// Create an empty mount tree.
    ///
    /// `case_sensitive` governs virtual segment comparison; the default
    /// used throughout the runtime is insensitive.
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            nodes: vec![PathNode::default()],
            case_sensitive,
        }
    }

    fn key(&self, segment: &str) -> String {
        if self.case_sensitive {
            segment.to_string()
        } else {
            segment.to_lowercase()
        }
    }

    fn child(&self, node: NodeId, segment: &str) -> Option<NodeId> {
        self.nodes[node].children.get(&self.key(segment)).copied()
    }

    /// Mount `physical` (a directory on disk) at `virtual_path`.
    ///
    /// Intermediate virtual nodes are created as needed; the physical
    /// directory is appended to the terminal node's overlay list, so
    /// earlier mounts win ambiguous lookups.
    pub fn add_mapping(&mut self, physical: &str, virtual_path: &str) {
        let phys = lexically_normal(Path::new(&cleanse(physical)));
        let virt = cleanse(virtual_path);

        let mut cursor = ROOT;
        let mut walked = String::new();
        for segment in virt.split('/').filter(|s| !s.is_empty()) {
            walked.push('/');
            walked.push_str(segment);
            cursor = match self.child(cursor, segment) {
                Some(id) => id,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(PathNode {
                        virtual_full: walked.clone(),
                        ..PathNode::default()
                    });
                    let key = self.key(segment);
                    self.nodes[cursor].children.insert(key, id);
                    id
                }
            };
        }

        trace!(physical = %phys.display(), virtual_path = %virt, "mapping added");
        self.nodes[cursor].physical.push(phys);
    }

    /// Resolve a virtual path to an existing physical file.
    ///
    /// Relative queries are primed with `current.virtual_path`. Walking
    /// descends segment by segment; `..` pops (clamped at the root); the
    /// first unmatched segment starts the remainder tested against the
    /// cursor node's overlays in mount order.
    pub fn get_info_virtual(&self, query: &str, current: &PathInfo) -> Option<PathInfo> {
        let virt = cleanse(query);
        if virt.is_empty() {
            trace!("empty virtual path");
            return None;
        }
        let mut virt_full = virt.clone();

        // Cursor stack so `..` can pop back out
        let mut nodes: Vec<NodeId> = vec![ROOT];

        let absolute = virt.starts_with('/')
            || (cfg!(windows) && virt.len() >= 2 && virt.as_bytes()[1] == b':');
        if !absolute && !current.virtual_path.is_empty() {
            virt_full = format!("{}/{}", current.virtual_path, virt);
            for segment in current.virtual_path.split('/').filter(|s| !s.is_empty()) {
                match self.child(*nodes.last()?, segment) {
                    Some(id) => nodes.push(id),
                    None => {
                        trace!(segment, "dead end replaying current path");
                        return None;
                    }
                }
            }
        }

        // Descend until the tree runs out; what is left is the remainder
        let segments: Vec<&str> = virt.split('/').filter(|s| !s.is_empty()).collect();
        let mut index = 0;
        while index < segments.len() {
            let segment = segments[index];
            if segment == ".." {
                nodes.pop();
            } else {
                let Some(&cursor) = nodes.last() else { break };
                match self.child(cursor, segment) {
                    Some(id) => nodes.push(id),
                    None => break,
                }
            }
            index += 1;
        }

        let &cursor = nodes.last()?;

        // Remaining segments become the relative remainder; further
        // `..` cannot re-enter the tree and is elided
        let mut remainder = String::new();
        for segment in &segments[index..] {
            if *segment == ".." {
                continue;
            }
            remainder.push('/');
            remainder.push_str(segment);
        }

        for physical in &self.nodes[cursor].physical {
            let candidate = format!("{}{}", physical.display(), remainder);
            trace!(%candidate, "testing overlay");
            if Path::new(&candidate).is_file() {
                return Some(PathInfo::new(candidate, virt_full));
            }
        }
        trace!(query = %virt, "no overlay match");
        None
    }

    /// Resolve a physical path back to a `PathInfo`, if it lies under a
    /// mounted directory.
    pub fn get_info_physical(&self, query: &str, current: &PathInfo) -> Option<PathInfo> {
        let mut to_find = lexically_normal(Path::new(&cleanse(query)));
        if to_find.is_relative() {
            let current_phys = Path::new(&current.physical);
            let base = if current_phys.is_file() {
                current_phys.parent().unwrap_or(current_phys)
            } else {
                current_phys
            };
            to_find = lexically_normal(&base.join(to_find));
        }

        for node in &self.nodes {
            for physical in &node.physical {
                let Ok(tail) = to_find.strip_prefix(physical) else {
                    continue;
                };
                if tail.as_os_str().is_empty() {
                    continue;
                }
                let mut candidate = node.virtual_full.clone();
                for component in tail.components() {
                    candidate.push('/');
                    candidate.push_str(&component.as_os_str().to_string_lossy());
                }
                if let Some(info) = self.get_info_virtual(&candidate, current) {
                    return Some(info);
                }
            }
        }
        None
    }

    /// Read the resolved file's contents.
    pub fn read_file(&self, info: &PathInfo) -> Result<String> {
        std::fs::read_to_string(&info.physical).map_err(|source| Error::Read {
            path: info.physical.clone(),
            source,
        })
    }
}
