//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of times a failing key is re-queued before it is dropped
pub const DEFAULT_MAX_NUM_REQUEUES: u32 = 5;

/// Default number of queue workers
pub const DEFAULT_NUM_THREADS: usize = 2;

/// Per-key queue backoff base (milliseconds), doubled on every failure
pub const DEFAULT_QUEUE_BACKOFF_BASE_MS: u64 = 5;

/// Per-key queue backoff cap (seconds)
pub const DEFAULT_QUEUE_BACKOFF_MAX_SECS: u64 = 1000;

/// Default period between full re-enqueues of known sessions (seconds)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 600;

/// Default read-modify-write attempts when a write hits a conflict
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Default in-line attempts for transient provisioning errors
pub const DEFAULT_PROVISIONING_ATTEMPTS: u32 = 3;

/// Attempts at pushing the metrics of a finished session
pub const DEFAULT_METRICS_PUSH_ATTEMPTS: u32 = 3;

/// Watch error backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Watch error backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default image registry for Stash images
pub const DEFAULT_DOCKER_REGISTRY: &str = "appscode";

/// Pushgateway running beside the operator
pub const DEFAULT_PUSHGATEWAY_URL: &str = "http://localhost:56789";

/// Pushgateway job name used for session-level metrics
pub const PROM_JOB_BACKUP_SESSION_CONTROLLER: &str = "stash-backupsession-controller";

/// Field manager / reporting component for this controller
pub const CONTROLLER_NAME: &str = "stash-backupsession-controller";

/// Reporting component of the status-sync step
pub const STATUS_UPDATER_NAME: &str = "stash-status-updater";

/// Stash image name
pub const IMAGE_STASH: &str = "stash";

/// Stash API group
pub const STASH_GROUP: &str = "stash.appscode.com";

/// Backup job name prefix
pub const BACKUP_JOB_PREFIX: &str = "stash-backup-";

/// Volume snapshot job name prefix
pub const VOLUME_SNAPSHOT_JOB_PREFIX: &str = "volume-snapshot-";

/// Label telling the job cleaner whether a completed Job may be deleted
pub const LABEL_DELETE_JOB_ON_COMPLETION: &str = "stash.appscode.com/delete-job-on-completion";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_INVOKER_TYPE: &str = "stash.appscode.com/invoker-type";
pub const LABEL_INVOKER_NAME: &str = "stash.appscode.com/invoker-name";

/// Default file the backup/restore step writes its result to
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "output.json";

/// Name of the scratch volume added to every resolved task pod
pub const TMP_DIR_VOLUME: &str = "tmp-dir";
pub const TMP_DIR_MOUNT_PATH: &str = "/tmp";

/// Name of the volume carrying a local repository backend
pub const LOCAL_BACKEND_VOLUME: &str = "stash-local-backend";
