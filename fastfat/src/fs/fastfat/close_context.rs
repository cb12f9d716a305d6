//! Close Contexts
//!
//! A close context is everything needed to finish a close later on a
//! worker thread. It lives in one of two places:
//!
//! - inside the handle's CCB, for user opens (`free == false`); the CCB
//!   travels through the queue and is deleted by the close itself
//! - in a block from the close-context lookaside list, for the driver's
//!   own metadata streams (`free == true`); the block is reserved when the
//!   stream is created, so a close never has to allocate
//!
//! [`CloseRecord`] is what sits in the close queues.

use alloc::boxed::Box;
use alloc::sync::Arc;

use super::fcb::Ccb;
use super::node::{FcbId, TypeOfOpen, VcbId};
use super::vcb::Vcb;

const BUG_CHECK_FILE_ID: u32 = 0x0004;

/// State needed to finish one close
#[derive(Debug)]
pub struct CloseContext {
    /// Volume of the open (unset while the context is only reserved)
    pub vcb: Option<Arc<Vcb>>,
    /// File or directory of the open
    pub fcb: Option<FcbId>,
    /// Kind of open being closed
    pub type_of_open: TypeOfOpen,
    /// Block came from the lookaside list and goes back to it
    pub free: bool,
}

impl CloseContext {
    /// Empty pool block set aside for a metadata stream
    pub const fn reserved() -> Self {
        Self {
            vcb: None,
            fcb: None,
            type_of_open: TypeOfOpen::UnopenedFileObject,
            free: true,
        }
    }
}

/// Queued close
#[derive(Debug)]
pub enum CloseRecord {
    /// Metadata stream close in a lookaside block
    Pool(Box<CloseContext>),
    /// User close carried by its CCB
    Embedded(Box<Ccb>),
}

impl CloseRecord {
    /// The close context, wherever it lives
    pub fn context(&self) -> &CloseContext {
        match self {
            CloseRecord::Pool(context) => context,
            CloseRecord::Embedded(ccb) => match ccb.close_context.as_ref() {
                Some(context) => context,
                None => fat_bug_check!(ccb.flags.bits(), 0, 0),
            },
        }
    }

    /// Volume the close is for
    pub fn vcb_id(&self) -> Option<VcbId> {
        self.context().vcb.as_ref().map(|vcb| vcb.id())
    }
}

/// Close taken off a queue, ready for the close finisher
pub(crate) struct DequeuedClose {
    pub vcb: Arc<Vcb>,
    pub fcb: Option<FcbId>,
    pub type_of_open: TypeOfOpen,
    pub ccb: Option<Box<Ccb>>,
    /// Lookaside block to return once the close has run
    pub pool_block: Option<Box<CloseContext>>,
}

impl DequeuedClose {
    /// Split a record into the close arguments and the storage to release
    pub fn unpack(record: CloseRecord) -> Self {
        match record {
            CloseRecord::Pool(mut context) => {
                if !context.free {
                    fat_bug_check!(context.type_of_open as u32, 0, 0);
                }
                let Some(vcb) = context.vcb.take() else {
                    fat_bug_check!(context.type_of_open as u32, 1, 0);
                };
                Self {
                    vcb,
                    fcb: context.fcb,
                    type_of_open: context.type_of_open,
                    ccb: None,
                    pool_block: Some(context),
                }
            }
            CloseRecord::Embedded(mut ccb) => {
                let Some(context) = ccb.close_context.take() else {
                    fat_bug_check!(ccb.flags.bits(), 2, 0);
                };
                if context.free {
                    fat_bug_check!(context.type_of_open as u32, 3, 0);
                }
                let Some(vcb) = context.vcb else {
                    fat_bug_check!(context.type_of_open as u32, 4, 0);
                };
                ccb.flags.remove(super::node::CcbFlags::CLOSE_CONTEXT);
                Self {
                    vcb,
                    fcb: context.fcb,
                    type_of_open: context.type_of_open,
                    ccb: Some(ccb),
                    pool_block: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fastfat::node::CcbFlags;

    fn volume() -> Arc<Vcb> {
        Vcb::new(VcbId(7), "T", Box::new(CloseContext::reserved()))
    }

    #[test]
    fn test_unpack_embedded_clears_flag() {
        let vcb = volume();
        let mut ccb = Box::new(Ccb::new(false));
        ccb.flags.insert(CcbFlags::CLOSE_CONTEXT);
        ccb.close_context = Some(CloseContext {
            vcb: Some(vcb.clone()),
            fcb: Some(FcbId(3)),
            type_of_open: TypeOfOpen::UserFileOpen,
            free: false,
        });

        let record = CloseRecord::Embedded(ccb);
        assert_eq!(record.vcb_id(), Some(VcbId(7)));

        let close = DequeuedClose::unpack(record);
        assert_eq!(close.fcb, Some(FcbId(3)));
        assert!(close.pool_block.is_none());
        let ccb = close.ccb.unwrap();
        assert!(ccb.close_context.is_none());
        assert!(!ccb.flags.contains(CcbFlags::CLOSE_CONTEXT));
    }

    #[test]
    fn test_unpack_pool_keeps_block() {
        let vcb = volume();
        let record = CloseRecord::Pool(Box::new(CloseContext {
            vcb: Some(vcb),
            fcb: None,
            type_of_open: TypeOfOpen::EaFile,
            free: true,
        }));

        let close = DequeuedClose::unpack(record);
        assert_eq!(close.type_of_open, TypeOfOpen::EaFile);
        assert!(close.ccb.is_none());
        assert!(close.pool_block.is_some_and(|block| block.vcb.is_none()));
    }

    #[test]
    #[should_panic(expected = "FAT_FILE_SYSTEM")]
    fn test_unpack_pool_marked_embedded_bug_checks() {
        let record = CloseRecord::Pool(Box::new(CloseContext {
            vcb: Some(volume()),
            fcb: None,
            type_of_open: TypeOfOpen::EaFile,
            free: false,
        }));
        DequeuedClose::unpack(record);
    }
}
