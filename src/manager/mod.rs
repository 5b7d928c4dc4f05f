//! The notification manager facade.

#[allow(clippy::module_inception)]
mod manager;

pub use manager::{
    ArchiveSweepReport, ImportReport, ManagerStats, NotificationManager, SWEEP_COLLECTION,
};
