mod backup;
mod jobs;
mod serve;

// Serve command
pub use serve::run_serve;

// Backup commands
pub use backup::{run_backup, run_delete_backup, run_list_backups, run_restore};

// Job commands
pub use jobs::run_jobs;
