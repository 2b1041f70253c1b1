/// Directory and file names under the driver root.
pub mod filenames {
    /// Root used when neither options nor environment name one.
    pub const DEFAULT_ROOT: &str = "/mnt";

    /// Backing files, one per volume.
    pub const FS_DIR: &str = "fs";

    /// Mount points, one per volume.
    pub const VOLUMES_DIR: &str = "volumes";

    pub const STATE_DIR: &str = "state";

    pub const STATE_FILE: &str = "loopvol-state.json";

    /// Snapshot name used by earlier releases, read when `STATE_FILE` is absent.
    pub const LEGACY_STATE_FILE: &str = "extfs-state.json";

    pub const LOGS_DIR: &str = "logs";

    pub const LOG_FILE_PREFIX: &str = "loopvol.log";

    /// Advisory lock held by the owning process.
    pub const LOCK_FILE: &str = ".lock";
}

/// Environment variables.
pub mod envs {
    pub const LOOPVOL_ROOT: &str = "LOOPVOL_ROOT";
}
