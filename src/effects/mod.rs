pub mod device;
pub mod group;
pub mod scheduler;

pub use device::{
    CommandDispatcher, CommandSender, DeviceAction, DeviceCommand, DeviceController, LoggingDevice,
};
pub use group::{
    EffectInstance, EffectUpdate, GroupEvent, GroupId, GroupSpec, GroupStatus, GroupUpdate,
    SyncMode,
};
pub use scheduler::{EffectSyncScheduler, SchedulerHandle, StopReport};
