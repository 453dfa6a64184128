use std::path::Path;

use sweep_core::events::{Channel, EventBus, LifecycleEvent, SubscriptionId};
use sweep_core::job::JobState;
use sweep_runner::config::{ArgEntry, SweepConfig};
use sweep_runner::{
    exit_status, plan, run_sweep, status, CheckpointStore, ObserverContext, ObserverRegistry, RunOptions,
};

fn rect_area_config(state_dir: &Path) -> SweepConfig {
    let source = format!(
        r#"
executable = "rect_area"
workers = 2
plugins = ["checkpoint", "log-events", "graceful-interrupt", "progress"]
state_dir = "{}"
dry_run = true
dry_run_delay_ms = 1

[[args]]
flag = "--height"
value = [2, 4, 6]

[[args]]
flag = "--width"
value = [3, 5]
"#,
        state_dir.display()
    );
    SweepConfig::from_toml_str(&source).expect("valid config")
}

#[test]
fn dry_run_sweep_completes_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = rect_area_config(&dir.path().join("state"));
    let report_path = dir.path().join("reports").join("run.json");
    let options = RunOptions {
        report: Some(report_path.clone()),
        ..RunOptions::default()
    };

    let outcome = run_sweep(&config, &options, &ObserverRegistry::builtin()).unwrap();

    assert_eq!(outcome.report.summary.total, 6);
    assert_eq!(outcome.report.summary.completed, 6);
    assert!(outcome.report.summary.is_clean());
    assert!(outcome.run_id.is_some());
    assert!(!config.checkpoint_path().exists());
    assert!(report_path.exists());
}

#[test]
fn plan_marks_jobs_already_in_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = rect_area_config(&dir.path().join("state"));

    let before = plan(&config).unwrap();
    assert_eq!(before.len(), 6);
    assert!(before.iter().all(|job| !job.completed));
    assert_eq!(before[1].command_line, "rect_area --height 2 --width 5");

    let mut done = config
        .job_template()
        .instantiate(1, vec![
            ("--height".to_string(), "2".to_string()),
            ("--width".to_string(), "5".to_string()),
        ])
        .unwrap();
    done.set_state_silently(JobState::Scheduled).unwrap();
    done.set_state_silently(JobState::Completed).unwrap();
    CheckpointStore::open(&config.state_dir).unwrap().record(&done).unwrap();

    let after = plan(&config).unwrap();
    let completed: Vec<u64> = after.iter().filter(|job| job.completed).map(|job| job.id).collect();
    assert_eq!(completed, vec![1]);

    let resumable = status(&config).unwrap().expect("checkpoint present");
    assert_eq!(resumable.completed, 1);
}

#[test]
fn fresh_run_ignores_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = rect_area_config(&dir.path().join("state"));

    let mut done = config
        .job_template()
        .instantiate(0, vec![
            ("--height".to_string(), "2".to_string()),
            ("--width".to_string(), "3".to_string()),
        ])
        .unwrap();
    done.set_state_silently(JobState::Scheduled).unwrap();
    done.set_state_silently(JobState::Completed).unwrap();
    CheckpointStore::open(&config.state_dir).unwrap().record(&done).unwrap();

    let resumed = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin()).unwrap();
    assert_eq!(resumed.report.summary.skipped, 1);
    assert_eq!(resumed.report.summary.completed, 5);

    CheckpointStore::open(&config.state_dir).unwrap().record(&done).unwrap();
    let options = RunOptions {
        fresh: true,
        ..RunOptions::default()
    };
    let fresh = run_sweep(&config, &options, &ObserverRegistry::builtin()).unwrap();
    assert_eq!(fresh.report.summary.skipped, 0);
    assert_eq!(fresh.report.summary.completed, 6);
}

fn interrupt_after_first_job(bus: &EventBus, _: &ObserverContext) -> sweep_core::Result<Vec<SubscriptionId>> {
    Ok(vec![bus.subscribe_fn(Channel::AfterExecution, "interrupt", |bus, _| {
        bus.publish(&LifecycleEvent::InterruptReceived)
    })])
}

#[test]
fn interrupted_run_still_exits_successfully() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rect_area_config(&dir.path().join("state"));
    config.workers = 1;
    let mut registry = ObserverRegistry::builtin();
    registry.register("log-events", interrupt_after_first_job);

    let result = run_sweep(&config, &RunOptions::default(), &registry);

    let outcome = result.as_ref().unwrap();
    assert_eq!(outcome.report.summary.completed, 1);
    assert_eq!(outcome.report.summary.canceled, 5);
    assert!(!outcome.report.summary.is_clean());
    assert!(config.checkpoint_path().exists());
    assert_eq!(exit_status(&result), 0);
}

#[test]
fn configuration_errors_exit_with_two() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rect_area_config(&dir.path().join("state"));
    config.workers = 0;

    let result = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin());
    assert_eq!(exit_status(&result), 2);
}

#[test]
fn status_is_empty_without_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = rect_area_config(&dir.path().join("state"));
    assert!(status(&config).unwrap().is_none());
}

#[test]
fn cli_overrides_apply_to_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rect_area_config(dir.path());
    config.dry_run = false;

    RunOptions {
        workers: Some(7),
        dry_run: true,
        ..RunOptions::default()
    }
    .apply(&mut config);

    assert_eq!(config.workers, 7);
    assert!(config.dry_run);
}

#[test]
fn unknown_group_member_fails_before_any_job_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = rect_area_config(&dir.path().join("state"));
    config.groups = vec![vec!["--height".to_string(), "--depth".to_string()]];

    let error = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin())
        .expect_err("undeclared group member");
    assert!(error.is_configuration());
    assert!(!config.state_dir.exists());
}

#[cfg(unix)]
#[test]
fn failed_run_keeps_checkpoint_and_resume_finishes_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    std::fs::write(inputs.join("a.txt"), "a\n").unwrap();

    let mut config = rect_area_config(&dir.path().join("state"));
    config.executable = "sh".to_string();
    config.dry_run = false;
    config.workers = 1;
    config.plugins = vec!["checkpoint".to_string()];
    config.streams.stdin = Some(format!("{}/{{--input}}", inputs.display()));
    config.streams.stdout = Some(format!("{}/out/{{--input}}", dir.path().display()));
    // `sh -c cat --input <name>`: the trailing pair only becomes $0 and $1.
    config.args = vec![
        ArgEntry {
            flag: "-c".to_string(),
            value: Some(serde_json::json!("cat")),
            reference: None,
        },
        ArgEntry {
            flag: "--input".to_string(),
            value: Some(serde_json::json!(["a.txt", "b.txt"])),
            reference: None,
        },
    ];

    let first = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin()).unwrap();
    assert_eq!(first.report.summary.completed, 1);
    assert_eq!(first.report.summary.failed, 1);
    assert!(config.checkpoint_path().exists());

    std::fs::write(inputs.join("b.txt"), "b\n").unwrap();
    let second = run_sweep(&config, &RunOptions::default(), &ObserverRegistry::builtin()).unwrap();
    assert_eq!(second.report.summary.skipped, 1);
    assert_eq!(second.report.summary.completed, 1);
    assert!(second.report.summary.is_clean());
    assert!(!config.checkpoint_path().exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out").join("b.txt")).unwrap(),
        "b\n"
    );
}
