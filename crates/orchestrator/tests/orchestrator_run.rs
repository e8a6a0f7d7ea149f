//! End-to-end orchestrator behavior against the mock sorter adapter.

use serde_json::json;
use spikerun_orchestrator::{JobStatus, OrchestratorConfig, RunOptions, SorterOrchestrator};
use spikerun_shared_types::{GROUP_PROPERTY, Recording, SOURCE_UNIT_ID_PROPERTY};
use spikerun_sorter_abstraction::{MOCK_RESULT_FILE, MockSorter, SorterError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Six channels in three groups, with locations so no dummy-location
/// warnings muddy the assertions.
fn grouped_recording() -> Recording {
    let locations: Vec<[f32; 2]> = (0..6).map(|i| [0.0, i as f32 * 20.0]).collect();
    Recording::in_memory(vec![vec![0i16; 32]; 6], 30_000.0)
        .with_property(GROUP_PROPERTY, &["a", "a", "b", "b", "c", "c"])
        .with_locations(&locations)
}

fn single_recording() -> Recording {
    Recording::in_memory(vec![vec![0i16; 32]; 4], 30_000.0)
        .with_locations(&[[0.0, 0.0], [0.0, 20.0], [0.0, 40.0], [0.0, 60.0]])
}

fn grouped_orchestrator(
    sorter: MockSorter,
    output_dir: &std::path::Path,
) -> SorterOrchestrator {
    SorterOrchestrator::new(
        Arc::new(sorter),
        grouped_recording(),
        OrchestratorConfig::new(output_dir).with_grouping_key(GROUP_PROPERTY),
    )
    .unwrap()
}

#[test]
fn partitions_follow_the_grouping_key() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    assert_eq!(orchestrator.num_partitions(), 3);
    for (i, output_dir) in orchestrator.output_dirs().iter().enumerate() {
        assert!(output_dir.ends_with(i.to_string()));
        assert!(output_dir.is_dir());
    }
    // Orchestrators are inspectable despite the trait-object adapter.
    assert!(format!("{orchestrator:?}").contains("num_partitions: 3"));
}

#[test]
fn not_installed_fails_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let err = SorterOrchestrator::new(
        Arc::new(MockSorter::new().not_installed()),
        single_recording(),
        OrchestratorConfig::new(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, SorterError::Installation(_)));
}

#[test]
fn required_locations_missing_fails_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let err = SorterOrchestrator::new(
        Arc::new(MockSorter::new().requiring_locations()),
        Recording::in_memory(vec![vec![0i16; 8]; 2], 30_000.0),
        OrchestratorConfig::new(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, SorterError::Configuration(_)));
}

#[test]
fn unknown_grouping_key_fails_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let err = SorterOrchestrator::new(
        Arc::new(MockSorter::new()),
        grouped_recording(),
        OrchestratorConfig::new(dir.path()).with_grouping_key("shank"),
    )
    .unwrap_err();
    assert!(matches!(err, SorterError::Configuration(_)));
}

#[tokio::test]
async fn set_params_rejects_unknown_keys_and_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());
    let before = orchestrator.params().clone();

    let overrides: BTreeMap<_, _> = [
        ("detect_threshold".to_string(), json!(8.0)),
        ("nonsense".to_string(), json!(1)),
        ("also_bad".to_string(), json!(2)),
    ]
    .into();
    let err = orchestrator.set_params(overrides).await.unwrap_err();

    assert!(matches!(err, SorterError::Configuration(_)));
    let message = err.to_string();
    assert!(message.contains("nonsense") && message.contains("also_bad"));
    assert_eq!(orchestrator.params(), &before);
}

#[tokio::test]
async fn set_params_twice_persists_the_cumulative_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    orchestrator
        .set_params([("detect_threshold".to_string(), json!(8.0))].into())
        .await
        .unwrap();
    orchestrator
        .set_params([("keep_good_only".to_string(), json!(true))].into())
        .await
        .unwrap();

    for output_dir in orchestrator.output_dirs() {
        let record = spikerun_orchestrator::persist::read_params(output_dir)
            .await
            .unwrap();
        assert_eq!(record.sorter_name, "mock");
        assert_eq!(record.sorter_params["detect_threshold"], json!(8.0));
        assert_eq!(record.sorter_params["keep_good_only"], json!(true));
    }
}

#[tokio::test]
async fn successful_run_reports_duration_and_clean_logs() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    let duration = orchestrator.run(&RunOptions::default()).await.unwrap();
    assert!(duration.is_some());

    for output_dir in orchestrator.output_dirs() {
        let log = spikerun_orchestrator::persist::read_run_log(output_dir)
            .await
            .unwrap();
        assert!(!log.error);
        assert!(log.run_time.is_some());
        assert!(log.runtime_trace.contains(&"sorting finished".to_string()));
        assert_eq!(log.sorter_name, "mock");
    }
    assert!(orchestrator
        .jobs()
        .iter()
        .all(|j| j.status() == JobStatus::Succeeded));
}

#[tokio::test]
async fn run_persists_prepare_time_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    orchestrator.run(&RunOptions::default()).await.unwrap();

    let record = spikerun_orchestrator::persist::read_params(&orchestrator.output_dirs()[0])
        .await
        .unwrap();
    assert_eq!(record.sorter_params["batch_size"], json!(4096));
}

#[tokio::test]
async fn failing_launch_raises_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new().failing_launch(), dir.path());

    let err = orchestrator.run(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, SorterError::Execution { .. }));
    assert!(err.to_string().contains("mock.log"));
}

#[tokio::test]
async fn suppressed_failure_leaves_an_error_flagged_run_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new().failing_launch(), dir.path());

    let duration = orchestrator
        .run(&RunOptions::default().no_raise())
        .await
        .unwrap();
    assert!(duration.is_none());

    // Serial dispatch shares one fault boundary: partition 0 failed, the
    // rest were never launched.
    assert_eq!(orchestrator.jobs()[0].status(), JobStatus::Failed);
    assert_eq!(orchestrator.jobs()[1].status(), JobStatus::Prepared);
    assert_eq!(orchestrator.jobs()[2].status(), JobStatus::Prepared);

    let failed_log = spikerun_orchestrator::persist::read_run_log(&orchestrator.output_dirs()[0])
        .await
        .unwrap();
    assert!(failed_log.error);
    assert!(failed_log.error_trace.is_some());
    assert!(failed_log.run_time.is_none());

    let skipped_log = spikerun_orchestrator::persist::read_run_log(&orchestrator.output_dirs()[1])
        .await
        .unwrap();
    assert!(!skipped_log.error);
    assert!(skipped_log.runtime_trace.is_empty());
}

#[tokio::test]
async fn prepare_failure_aborts_regardless_of_raise_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let sorter = Arc::new(MockSorter::new().failing_prepare());
    let mut orchestrator = SorterOrchestrator::new(
        Arc::clone(&sorter) as _,
        grouped_recording(),
        OrchestratorConfig::new(dir.path()).with_grouping_key(GROUP_PROPERTY),
    )
    .unwrap();

    let err = orchestrator
        .run(&RunOptions::default().no_raise())
        .await
        .unwrap_err();
    assert!(matches!(err, SorterError::Execution { .. }));
    // The first partition's prepare failed; nothing was launched.
    assert_eq!(sorter.prepare_calls(), 1);
    assert_eq!(sorter.launch_calls(), 0);
}

#[tokio::test]
async fn merged_result_is_tagged_per_partition() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    orchestrator.run(&RunOptions::default()).await.unwrap();
    let result = orchestrator.get_result(true).unwrap();

    assert_eq!(result.num_units(), 3);
    assert_eq!(result.unit_ids(), vec![0, 1, 2]);
    let groups: Vec<_> = result
        .units
        .iter()
        .map(|u| u.property(GROUP_PROPERTY).unwrap().to_string())
        .collect();
    assert_eq!(groups, vec!["a", "b", "c"]);
    assert!(result
        .units
        .iter()
        .all(|u| u.property(SOURCE_UNIT_ID_PROPERTY) == Some("0")));
    assert_eq!(result.sampling_frequency, Some(30_000.0));
}

#[tokio::test]
async fn partial_parse_merges_the_rest_and_warns_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    orchestrator.run(&RunOptions::default()).await.unwrap();
    // Corrupt one partition: drop its result file.
    std::fs::remove_file(orchestrator.output_dirs()[1].join(MOCK_RESULT_FILE)).unwrap();

    let warnings_before = orchestrator.warnings().len();
    let result = orchestrator.get_result(false).unwrap();

    assert_eq!(result.num_units(), 2);
    let groups: Vec<_> = result
        .units
        .iter()
        .map(|u| u.property(GROUP_PROPERTY).unwrap().to_string())
        .collect();
    assert_eq!(groups, vec!["a", "c"]);
    assert_eq!(orchestrator.warnings().len(), warnings_before + 1);

    // With raise_on_error the same situation aborts.
    let err = orchestrator.get_result(true).unwrap_err();
    assert!(matches!(err, SorterError::ResultLoad(_)));
}

#[tokio::test]
async fn all_results_missing_is_a_result_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());
    // Never ran: no result files anywhere.
    let err = orchestrator.get_result(false).unwrap_err();
    assert!(matches!(err, SorterError::ResultLoad(_)));
}

#[tokio::test]
async fn single_partition_result_is_returned_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = SorterOrchestrator::new(
        Arc::new(MockSorter::new().with_units(2)),
        single_recording(),
        OrchestratorConfig::new(dir.path()),
    )
    .unwrap();

    orchestrator.run(&RunOptions::default()).await.unwrap();
    let result = orchestrator.get_result(true).unwrap();

    assert_eq!(result.num_units(), 2);
    // No grouping key, no tagging.
    assert!(result.units[0].property(GROUP_PROPERTY).is_none());
    assert_eq!(result.sampling_frequency, Some(30_000.0));
}

#[tokio::test]
async fn delete_output_folders_cleans_up_after_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let output_base = dir.path().join("out");
    let mut orchestrator = SorterOrchestrator::new(
        Arc::new(MockSorter::new()),
        grouped_recording(),
        OrchestratorConfig::new(&output_base)
            .with_grouping_key(GROUP_PROPERTY)
            .with_delete_output_folders(),
    )
    .unwrap();

    orchestrator.run(&RunOptions::default()).await.unwrap();
    let result = orchestrator.get_result(true).unwrap();
    assert_eq!(result.num_units(), 3);
    for output_dir in orchestrator.output_dirs() {
        assert!(!output_dir.exists());
    }
}

#[tokio::test]
async fn parallel_dispatch_requires_transferable_views() {
    let dir = tempfile::tempdir().unwrap();
    // In-memory traces cannot be snapshotted across the worker boundary.
    let mut orchestrator = grouped_orchestrator(MockSorter::new(), dir.path());

    let err = orchestrator
        .run(&RunOptions::parallel(Some(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, SorterError::Configuration(_)));
    assert!(err.to_string().contains("parallel"));
}

#[tokio::test]
async fn parallel_dispatch_requires_a_compatible_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = grouped_orchestrator(MockSorter::new().serial_only(), dir.path());

    let err = orchestrator
        .run(&RunOptions::parallel(None))
        .await
        .unwrap_err();
    assert!(matches!(err, SorterError::Configuration(_)));
}

/// Three groups backed by a trace file: 6 channels, 8 frames, interleaved
/// int16. File-backed views are what parallel dispatch requires.
fn binary_grouped_recording(dir: &std::path::Path) -> Recording {
    let trace_path = dir.join("traces.dat");
    std::fs::write(&trace_path, vec![0u8; 6 * 8 * 2]).unwrap();
    let locations: Vec<[f32; 2]> = (0..6).map(|i| [0.0, i as f32 * 20.0]).collect();
    Recording::binary(&trace_path, 6, 30_000.0)
        .with_property(GROUP_PROPERTY, &["a", "a", "b", "b", "c", "c"])
        .with_locations(&locations)
}

#[tokio::test]
async fn parallel_dispatch_sorts_every_partition() {
    let dir = tempfile::tempdir().unwrap();
    let recording = binary_grouped_recording(dir.path());

    let sorter = Arc::new(MockSorter::new());
    let mut orchestrator = SorterOrchestrator::new(
        Arc::clone(&sorter) as _,
        recording,
        OrchestratorConfig::new(dir.path().join("out")).with_grouping_key(GROUP_PROPERTY),
    )
    .unwrap();

    let duration = orchestrator
        .run(&RunOptions::parallel(Some(2)))
        .await
        .unwrap();
    assert!(duration.is_some());
    assert_eq!(sorter.launch_calls(), 3);
    assert!(orchestrator
        .jobs()
        .iter()
        .all(|j| j.status() == JobStatus::Succeeded));

    let result = orchestrator.get_result(true).unwrap();
    assert_eq!(result.num_units(), 3);
}

#[tokio::test]
async fn parallel_suppressed_failure_flags_every_failed_partition() {
    let dir = tempfile::tempdir().unwrap();
    let recording = binary_grouped_recording(dir.path());

    let mut orchestrator = SorterOrchestrator::new(
        Arc::new(MockSorter::new().failing_launch()),
        recording,
        OrchestratorConfig::new(dir.path().join("out")).with_grouping_key(GROUP_PROPERTY),
    )
    .unwrap();

    let duration = orchestrator
        .run(&RunOptions::parallel(Some(2)).no_raise())
        .await
        .unwrap();
    assert!(duration.is_none());

    // Parallel dispatch launches every partition, so each job fails on its
    // own, unlike the serial fault boundary.
    assert!(orchestrator
        .jobs()
        .iter()
        .all(|j| j.status() == JobStatus::Failed));

    for output_dir in orchestrator.output_dirs() {
        let log = spikerun_orchestrator::persist::read_run_log(output_dir)
            .await
            .unwrap();
        assert!(log.error);
        assert!(log.error_trace.is_some());
        assert!(log.run_time.is_none());
        assert!(log.runtime_trace.contains(&"mock sorter crashed".to_string()));
    }
}
