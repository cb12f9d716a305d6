//! Shutdown
//!
//! At system shutdown delayed closes are no longer worth holding. Shutdown
//! marks the driver and every mounted volume, then runs each volume's
//! queued closes on the calling thread. From then on closes are not
//! delayed, the worker drains the delayed queue regardless of the
//! high-water mark and drops each volume as soon as its close is done.

use super::data::FatData;
use super::node::VcbState;
use crate::ex::resource::EResourceExclusiveGuard;

impl FatData {
    /// Begin system shutdown
    pub fn begin_shutdown(&self) {
        self.set_shutdown_started();

        let volumes = self.volumes();
        log::info!("[FASTFAT] Shutdown: flushing closes on {} volumes", volumes.len());

        for vcb in &volumes {
            {
                let _guard = EResourceExclusiveGuard::new(&vcb.resource);
                vcb.lock_inner().state.insert(VcbState::SHUTDOWN);
            }

            self.fsp_close(Some(vcb));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fastfat::error::FatError;
    use crate::fs::fastfat::open::OpenOptions;
    use crate::fs::fastfat::testing::{close, setup};

    #[test]
    fn test_shutdown_flushes_delayed_closes() {
        let (fat, _queue, _cache) = setup();
        let (c, _c_vvf) = fat.mount_volume("C");
        let (d, _d_vvf) = fat.mount_volume("D");

        let on_c = fat.create_fcb(&c, c.root_dcb(), "NTLDR").unwrap();
        let on_d = fat.create_fcb(&d, d.root_dcb(), "SWAP.DAT").unwrap();
        close(&fat, fat.open_file(&c, on_c, OpenOptions::delay_close()).unwrap());
        close(&fat, fat.open_file(&d, on_d, OpenOptions::delay_close()).unwrap());
        assert_eq!(fat.close_queue_counts(), (0, 2));

        fat.begin_shutdown();

        assert!(fat.shutdown_started());
        assert_eq!(fat.close_queue_counts(), (0, 0));
        assert!(!c.lock_inner().fcbs.contains(on_c));
        assert!(!d.lock_inner().fcbs.contains(on_d));
        assert!(c.state().contains(VcbState::SHUTDOWN));
        assert!(d.state().contains(VcbState::SHUTDOWN));
        assert!(!c.resource.is_acquired());

        // No new opens once shutdown reached the volume
        assert_eq!(
            fat.open_file(&c, c.root_dcb(), OpenOptions::default()).err(),
            Some(FatError::VolumeDismounted(c.id()))
        );
    }

    #[test]
    fn test_closes_not_delayed_after_shutdown() {
        let (fat, _queue, _cache) = setup();
        let (vcb, vvf) = fat.mount_volume("C");
        let file = fat.create_fcb(&vcb, vcb.root_dcb(), "HIBERFIL.SYS").unwrap();
        let handle = fat.open_file(&vcb, file, OpenOptions::delay_close()).unwrap();

        fat.begin_shutdown();
        close(&fat, handle);

        assert_eq!(fat.close_queue_counts(), (0, 0));
        assert!(!vcb.lock_inner().fcbs.contains(file));
        assert_eq!(fat.statistics().delayed_posted, 0);

        // The last close of a volume that has seen shutdown deletes it
        close(&fat, vvf);
        assert!(vcb.is_deleted());
        assert!(fat.volumes().is_empty());
    }

    #[test]
    fn test_worker_drains_delayed_queue_during_shutdown() {
        let (fat, _queue, _cache) = setup();
        let (vcb, _vvf) = fat.mount_volume("C");
        let file = fat.create_fcb(&vcb, vcb.root_dcb(), "IO.SYS").unwrap();
        close(&fat, fat.open_file(&vcb, file, OpenOptions::delay_close()).unwrap());

        // Below the mark the worker leaves it alone
        fat.fsp_close(None);
        assert_eq!(fat.close_queue_counts(), (0, 1));

        fat.set_shutdown_started();
        fat.fsp_close(None);

        assert_eq!(fat.close_queue_counts(), (0, 0));
        assert!(!vcb.lock_inner().fcbs.contains(file));
        assert!(!vcb.resource.is_acquired());
    }
}
