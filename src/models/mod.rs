pub mod events;
pub mod mount;
pub mod process;
pub mod settings;

pub use events::{CoordinatorEvent, StatusChange};
pub use mount::{MountEntry, MountInfo, MountOptions, MountState, RemoteConfig};
pub use process::{now_secs, ProcessDescriptor, ProcessPatch, ProcessState, RuntimeStatus};
pub use settings::{AppConfig, OpenListCoreConfig, Settings};
