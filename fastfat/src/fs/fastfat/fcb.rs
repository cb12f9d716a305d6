//! File and Directory Control Blocks
//!
//! Each volume keeps its in-memory file (FCB) and directory (DCB) records
//! in a table keyed by [`FcbId`]. Records form a tree through parent links
//! and each directory's list of child records; a record can be deleted
//! only once it has no children left.
//!
//! A CCB is the per-handle context of a user open.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::close_context::CloseContext;
use super::node::{CcbFlags, FcbId, FcbState, NodeType};

const BUG_CHECK_FILE_ID: u32 = 0x0007;

/// File or directory control block
#[derive(Debug)]
pub struct Fcb {
    /// Record id within the volume
    pub id: FcbId,
    /// File, directory or root directory
    pub node_type: NodeType,
    /// Containing directory (none for the root)
    pub parent: Option<FcbId>,
    /// Child records (directories only)
    pub children: Vec<FcbId>,
    /// User opens of this record
    pub open_count: u32,
    /// The directory's stream file object exists (directories only)
    pub directory_file: bool,
    /// Opens of the directory's stream file object
    pub directory_file_open_count: u32,
    /// State bits
    pub state: FcbState,
    /// Close context set aside for the directory stream
    pub close_context: Option<Box<CloseContext>>,
    /// Component name
    pub name: String,
}

impl Fcb {
    fn new(id: FcbId, node_type: NodeType, parent: Option<FcbId>, name: &str) -> Self {
        Self {
            id,
            node_type,
            parent,
            children: Vec::new(),
            open_count: 0,
            directory_file: false,
            directory_file_open_count: 0,
            state: FcbState::empty(),
            close_context: None,
            name: String::from(name),
        }
    }

    /// True for the root and ordinary directories
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.node_type.is_directory()
    }
}

/// Records of one volume
#[derive(Debug)]
pub struct FcbTable {
    entries: BTreeMap<FcbId, Fcb>,
    next_id: u32,
}

impl FcbTable {
    /// Table holding only the root directory
    pub fn with_root() -> (Self, FcbId) {
        let root = FcbId(1);
        let mut entries = BTreeMap::new();
        entries.insert(root, Fcb::new(root, NodeType::RootDcb, None, "\\"));
        (Self { entries, next_id: 2 }, root)
    }

    /// Add a record under a directory
    ///
    /// The parent must exist and be a directory.
    pub fn insert(&mut self, node_type: NodeType, parent: FcbId, name: &str) -> FcbId {
        let id = FcbId(self.next_id);
        self.next_id += 1;

        match self.entries.get_mut(&parent) {
            Some(dcb) if dcb.is_directory() => dcb.children.push(id),
            _ => fat_bug_check!(parent.0, id.0, 0),
        }
        self.entries.insert(id, Fcb::new(id, node_type, Some(parent), name));
        id
    }

    /// Look up a record
    #[inline]
    pub fn get(&self, id: FcbId) -> Option<&Fcb> {
        self.entries.get(&id)
    }

    /// Look up a record for update
    #[inline]
    pub fn get_mut(&mut self, id: FcbId) -> Option<&mut Fcb> {
        self.entries.get_mut(&id)
    }

    /// Detach a record from its parent and take it out of the table
    ///
    /// Deleting the root or a directory that still has children is a
    /// structural error.
    pub fn remove(&mut self, id: FcbId) -> Fcb {
        let Some(mut fcb) = self.entries.remove(&id) else {
            fat_bug_check!(id.0, 0, 0);
        };
        if !fcb.children.is_empty() || fcb.node_type == NodeType::RootDcb {
            fat_bug_check!(id.0, fcb.children.len(), fcb.node_type as u16);
        }

        if let Some(parent) = fcb.parent.and_then(|parent| self.entries.get_mut(&parent)) {
            parent.children.retain(|child| *child != id);
        }

        fcb.state.insert(FcbState::DELETED);
        fcb
    }

    /// Take every record out of the table
    pub fn drain(&mut self) -> impl Iterator<Item = Fcb> {
        core::mem::take(&mut self.entries).into_values()
    }

    /// Number of records, the root included
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the table empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Is the record still in the table
    #[inline]
    pub fn contains(&self, id: FcbId) -> bool {
        self.entries.contains_key(&id)
    }
}

/// Context Control Block: per-handle state of a user open
#[derive(Debug, Default)]
pub struct Ccb {
    /// CCB_FLAG_* bits
    pub flags: CcbFlags,
    /// Close context used when the close of this handle is posted
    pub close_context: Option<CloseContext>,
    /// Cached directory enumeration template
    pub query_template: Option<String>,
}

impl Ccb {
    /// Context for a new handle
    pub fn new(read_only: bool) -> Self {
        let mut flags = CcbFlags::empty();
        if read_only {
            flags.insert(CcbFlags::READ_ONLY);
        }
        Self {
            flags,
            close_context: None,
            query_template: None,
        }
    }

    /// Remember the template of a directory enumeration
    pub fn set_query_template(&mut self, template: &str) {
        self.query_template = Some(String::from(template));
        self.flags.insert(CcbFlags::QUERY_TEMPLATE);
    }

    /// Was the handle opened read-only
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(CcbFlags::READ_ONLY)
    }
}
