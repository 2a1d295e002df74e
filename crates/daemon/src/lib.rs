//! Segment Merge Daemon
//!
//! Groups continuously recorded camera segments into one file per source and
//! calendar day, enforces retention on raw and merged files, and runs unattended
//! on a cron schedule.

pub mod classify;
pub mod cron;
pub mod daemon;
pub mod media;
pub mod merge;
pub mod retention;
pub mod scan;
pub mod segment;
pub mod split;
pub mod startup;

pub use segmerge_daemon_config as config;
pub use segmerge_daemon_config::Config;
pub use classify::{classify_name, format_merged_name, format_raw_name, SegmentName};
pub use cron::{next_trigger, CronError, CronSchedule};
pub use daemon::{local_now, Daemon, DaemonError, PassReport, SCHEDULE_RETRY_DELAY};
pub use media::{ConcatRequest, Ffmpeg, MediaError, MediaTool, TrimRequest};
pub use merge::{merge_by_day, GroupOutcome, MergeError, MergeOptions, MergeReport};
pub use retention::{sweep_merged, sweep_raw, RetentionError, SweepReport};
pub use scan::{collect_raw_segments, ScanError};
pub use segment::Segment;
pub use split::{plan_day_parts, split_cross_day, DayPart, SplitError};
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};
