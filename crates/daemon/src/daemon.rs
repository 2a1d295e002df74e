//! Daemon startup and main loop for the segment merge daemon
//!
//! A pass is merge first, then the raw sweep, then the merged sweep. One-shot
//! mode runs a single pass; daemon mode runs one at startup and then one per
//! cron trigger. Passes never overlap.

use crate::config::Config;
use crate::cron::next_trigger;
use crate::media::{Ffmpeg, MediaTool};
use crate::merge::{merge_by_day, MergeReport};
use crate::retention::{sweep_merged, sweep_raw, SweepReport};
use crate::startup::{run_startup_checks, StartupError};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use log::{error, info, warn};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Delay before trying again after the schedule could not be computed
pub const SCHEDULE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// A pass finished with errors
    #[error("Run finished with errors: {0}")]
    PassFailed(String),
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub started_at: Option<NaiveDateTime>,
    /// `None` when the merge step failed before producing a report
    pub merge: Option<MergeReport>,
    /// `None` when the sweep was skipped or failed
    pub raw_sweep: Option<SweepReport>,
    pub merged_sweep: Option<SweepReport>,
    /// Fatal and aggregate errors, in the order they occurred
    pub errors: Vec<String>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn ensure_success(&self) -> Result<(), DaemonError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(DaemonError::PassFailed(self.errors.join("; ")))
        }
    }
}

/// Daemon state: the run configuration and the media tool
pub struct Daemon<M: MediaTool = Ffmpeg> {
    /// Configuration, fixed for the lifetime of the daemon
    pub config: Config,
    media: M,
}

impl Daemon<Ffmpeg> {
    /// Initialize the daemon after verifying ffmpeg can be executed
    ///
    /// # Errors
    /// `DaemonError::Startup` when the configured ffmpeg binary is unusable.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    pub fn new_without_checks(config: Config) -> Self {
        let media = Ffmpeg::new(config.ffmpeg_path.clone());
        Self { config, media }
    }
}

impl<M: MediaTool> Daemon<M> {
    /// Initialize the daemon with a custom media tool
    pub fn with_media(config: Config, media: M) -> Self {
        Self { config, media }
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    /// Run one full pass at `now`
    ///
    /// Never fails as a whole: every error is recorded in the returned report.
    /// Immediate raw retention is skipped unless the merge step was clean, so raw
    /// footage of a day that failed to merge survives until a later pass.
    pub async fn run_pass(&self, now: NaiveDateTime) -> PassReport {
        let mut report = PassReport {
            started_at: Some(now),
            ..PassReport::default()
        };
        info!("Pass started at {}", now);

        let mut merge_clean = false;
        match merge_by_day(&self.config, &self.media, now).await {
            Ok(merge) => {
                match merge.ensure_clean() {
                    Ok(()) => merge_clean = true,
                    Err(e) => {
                        error!("{}", e);
                        report.errors.push(e.to_string());
                    }
                }
                report.merge = Some(merge);
            }
            Err(e) => {
                error!("Merge failed: {}", e);
                report.errors.push(format!("merge: {}", e));
            }
        }

        if self.config.raw_retention_days == Some(0) && !merge_clean {
            warn!("Skipping immediate raw retention: merge did not complete cleanly");
        } else {
            match sweep_raw(&self.config, now) {
                Ok(sweep) => report.raw_sweep = Some(sweep),
                Err(e) => {
                    error!("Raw retention failed: {}", e);
                    report.errors.push(format!("raw retention: {}", e));
                }
            }
        }

        match sweep_merged(&self.config, now) {
            Ok(sweep) => report.merged_sweep = Some(sweep),
            Err(e) => {
                error!("Merged retention failed: {}", e);
                report.errors.push(format!("merged retention: {}", e));
            }
        }

        if report.is_success() {
            info!("Pass finished");
        } else {
            warn!("Pass finished with {} error(s)", report.errors.len());
        }
        report
    }

    /// Run a single pass at the current local time
    pub async fn run_once(&self) -> PassReport {
        self.run_pass(local_now()).await
    }

    /// Run the daemon main loop
    ///
    /// Runs one pass immediately, then one per cron trigger. Scheduling errors
    /// are logged and retried after [`SCHEDULE_RETRY_DELAY`]; this never returns.
    pub async fn run_forever(&self) {
        info!("Daemon mode, schedule {:?}", self.config.cron);
        self.run_once().await;

        loop {
            let now = Local::now();
            match next_trigger(&self.config.cron, now.naive_local()) {
                Ok(next) => {
                    info!("Next run at {}", next);
                    tokio::time::sleep(duration_until(&now, next)).await;
                    self.run_once().await;
                }
                Err(e) => {
                    error!(
                        "Scheduling error: {}; retrying in {}s",
                        e,
                        SCHEDULE_RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(SCHEDULE_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Real time from `now` until the wall-clock time `next` in the same zone
///
/// Zero when `next` has passed. A `next` skipped by a forward clock change
/// falls back to the wall-clock difference.
pub fn duration_until<Tz: TimeZone>(now: &DateTime<Tz>, next: NaiveDateTime) -> Duration {
    let delta = match now.timezone().from_local_datetime(&next).earliest() {
        Some(at) => at.signed_duration_since(now.clone()),
        None => next - now.naive_local(),
    };
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// Current local wall-clock time
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::FakeMedia;
    use crate::merge::GroupOutcome;
    use chrono::{FixedOffset, NaiveDate, Utc};
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap();
    }

    fn create_test_config(root: &Path) -> Config {
        Config {
            dir: root.to_path_buf(),
            ..Config::default()
        }
    }

    /// Three raw segments around midnight for source `front`
    fn write_midnight_fixture(root: &Path) -> Vec<PathBuf> {
        let names = [
            "00_20240101235000_20240101235500.mp4",
            "00_20240101235500_20240102000500.mp4",
            "00_20240102000500_20240102001000.mp4",
        ];
        names
            .iter()
            .map(|name| {
                let path = root.join("front").join(name);
                touch(&path);
                path
            })
            .collect()
    }

    #[test]
    fn test_daemon_initialization_without_checks() {
        let config = Config {
            ffmpeg_path: PathBuf::from("/opt/ffmpeg/bin/ffmpeg"),
            ..Config::default()
        };
        let daemon = Daemon::new_without_checks(config.clone());

        assert_eq!(daemon.config, config);
        assert_eq!(daemon.media().binary(), Path::new("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_daemon_new_fails_without_ffmpeg() {
        let config = Config {
            ffmpeg_path: PathBuf::from("/nonexistent/bin/ffmpeg-segmerge"),
            ..Config::default()
        };
        assert!(matches!(
            Daemon::new(config),
            Err(DaemonError::Startup(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_midnight_split_and_merge() {
        let tmp = TempDir::new().unwrap();
        write_midnight_fixture(tmp.path());
        let daemon = Daemon::with_media(create_test_config(tmp.path()), FakeMedia::new());

        let report = daemon.run_pass(at(2024, 1, 3, 12, 0, 0)).await;

        assert!(report.is_success(), "errors: {:?}", report.errors);
        assert_eq!(daemon.media().trim_calls().len(), 2);

        let outputs: Vec<PathBuf> = daemon
            .media()
            .concat_calls()
            .into_iter()
            .map(|c| c.output)
            .collect();
        let out = tmp.path().join("daily").join("front");
        assert_eq!(
            outputs,
            vec![
                out.join("20240101235000_20240101235959.mp4"),
                out.join("20240102000000_20240102001000.mp4"),
            ]
        );
        for call in daemon.media().concat_calls() {
            assert_eq!(call.inputs.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_second_pass_performs_no_concatenation() {
        let tmp = TempDir::new().unwrap();
        write_midnight_fixture(tmp.path());
        let daemon = Daemon::with_media(create_test_config(tmp.path()), FakeMedia::new());
        let now = at(2024, 1, 3, 12, 0, 0);

        daemon.run_pass(now).await;
        let after_first = daemon.media().concat_calls().len();
        let trims_after_first = daemon.media().trim_calls().len();
        let second = daemon.run_pass(now).await;

        assert_eq!(after_first, 2);
        assert_eq!(trims_after_first, 2);
        assert_eq!(daemon.media().concat_calls().len(), after_first);
        assert_eq!(daemon.media().trim_calls().len(), trims_after_first);
        let merge = second.merge.unwrap();
        assert!(merge
            .groups
            .iter()
            .all(|g| g.outcome == GroupOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn test_today_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let raws = write_midnight_fixture(tmp.path());
        let config = Config {
            raw_retention_days: Some(0),
            ..create_test_config(tmp.path())
        };
        let daemon = Daemon::with_media(config, FakeMedia::new());

        // Still on the 2nd: only the 1st is complete
        let report = daemon.run_pass(at(2024, 1, 2, 12, 0, 0)).await;

        assert!(report.is_success());
        assert_eq!(report.merge.as_ref().unwrap().eligible, 1);
        assert!(!raws[0].exists());
        assert!(raws[1].exists());
        assert!(raws[2].exists());
    }

    #[tokio::test]
    async fn test_immediate_retention_deletes_after_clean_merge() {
        let tmp = TempDir::new().unwrap();
        let raws = write_midnight_fixture(tmp.path());
        let config = Config {
            raw_retention_days: Some(0),
            ..create_test_config(tmp.path())
        };
        let daemon = Daemon::with_media(config, FakeMedia::new());

        let report = daemon.run_pass(at(2024, 1, 3, 12, 0, 0)).await;

        assert!(report.is_success());
        assert_eq!(report.raw_sweep.unwrap().deleted.len(), 3);
        assert!(raws.iter().all(|p| !p.exists()));
        assert!(tmp
            .path()
            .join("daily/front/20240102000000_20240102001000.mp4")
            .exists());
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_raw_footage_and_fails_pass() {
        let tmp = TempDir::new().unwrap();
        let raws = write_midnight_fixture(tmp.path());
        let config = Config {
            raw_retention_days: Some(0),
            ..create_test_config(tmp.path())
        };
        let failing = tmp
            .path()
            .join("daily/front/20240102000000_20240102001000.mp4");
        let media = FakeMedia {
            fail_concat: vec![failing],
            ..FakeMedia::new()
        };
        let daemon = Daemon::with_media(config, media);

        let report = daemon.run_pass(at(2024, 1, 3, 12, 0, 0)).await;

        assert!(!report.is_success());
        assert!(report.raw_sweep.is_none());
        assert!(raws.iter().all(|p| p.exists()));
        assert!(matches!(
            report.ensure_success(),
            Err(DaemonError::PassFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_input_dir_is_reported_not_panicked() {
        let tmp = TempDir::new().unwrap();
        let daemon = Daemon::with_media(
            create_test_config(&tmp.path().join("missing")),
            FakeMedia::new(),
        );

        let report = daemon.run_pass(at(2024, 1, 3, 12, 0, 0)).await;

        assert!(report.merge.is_none());
        assert!(report.errors[0].starts_with("merge:"));
    }

    #[test]
    fn test_pass_report_serializes() {
        let report = PassReport {
            started_at: Some(at(2024, 1, 3, 12, 0, 0)),
            errors: vec!["merge: boom".to_string()],
            ..PassReport::default()
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["started_at"], "2024-01-03T12:00:00");
        assert!(json["merge"].is_null());
        assert_eq!(json["errors"][0], "merge: boom");
    }

    #[test]
    fn test_duration_until_next_trigger() {
        let zone = FixedOffset::east_opt(3600).unwrap();
        let now = zone.from_local_datetime(&at(2024, 1, 1, 9, 0, 30)).unwrap();
        let next = next_trigger("0 10 * * *", now.naive_local()).unwrap();

        assert_eq!(next, at(2024, 1, 1, 10, 0, 0));
        assert_eq!(duration_until(&now, next), Duration::from_secs(3570));
        assert_eq!(duration_until(&now, at(2024, 1, 1, 9, 0, 0)), Duration::ZERO);
        assert!(next_trigger("not a cron", now.naive_local()).is_err());
    }

    #[test]
    fn test_duration_until_measures_real_time() {
        // Same instant seen from a different offset
        let now = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .from_local_datetime(&at(2024, 3, 10, 1, 30, 0))
            .unwrap();

        assert_eq!(
            duration_until(&now, at(2024, 3, 10, 3, 0, 0)),
            Duration::from_secs(90 * 60)
        );
        assert_eq!(
            duration_until(&now.with_timezone(&Utc), at(2024, 3, 10, 8, 0, 0)),
            Duration::from_secs(90 * 60)
        );
    }
}
