/// File the sink writes to when no destination is given
pub const DEFAULT_OUTPUT_FILE: &str = "results.csv";

/// Decimal digits used when formatting values in output files
pub const OUTPUT_PRECISION: usize = 3;

/// Columns processed concurrently within one stage run unless configured otherwise
pub const DEFAULT_COLUMN_WORKERS: usize = 4;

/// Directory for rotated JSON log files
pub const LOG_DIR: &str = "logs";

/// File name prefix for rotated JSON log files
pub const LOG_FILE_PREFIX: &str = "pipe_flow.log";
