pub mod args;
pub mod coordinator;
pub mod local_manager;
pub mod logs;
pub mod mounts;
pub mod process_checker;
pub mod process_manager;
pub mod rclone_conf;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod settings_sync;

pub use coordinator::{DeleteOutcome, LifecycleCoordinator, RenameOutcome};
pub use local_manager::LocalProcessManager;
pub use mounts::{SidecarPaths, SidecarService};
pub use process_manager::ProcessManager;
pub use reconciler::StatusReconciler;
pub use registry::ProcessRegistry;
pub use scheduler::{EventBus, Scheduler};
pub use settings_sync::{Persisted, PersistenceFailure, SettingsSynchronizer};
