use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Mutex;
use timsko::batch::{
    BatchRow,
    STATUS_BATCH_COMPLETE,
};
use timsko::pipeline::{
    STATUS_COMPLETE,
    STATUS_NO_DATA,
};
use timsko::reader::{
    InMemoryReader,
    ReaderBackend,
    SyntheticAcquisition,
    SyntheticFrame,
    SyntheticScan,
};
use timsko::{
    CcsSettings,
    LabelStrategy,
    NoopObserver,
    ProgressObserver,
    RawDataReader,
    RunError,
    RunEvent,
    RunParameters,
    run_batch,
    run_folder,
    spawn_run,
};

#[derive(Debug, Default)]
struct Recorder {
    progress: Mutex<Vec<f64>>,
    statuses: Mutex<Vec<String>>,
}

impl ProgressObserver for Recorder {
    fn on_progress(&self, fraction: f64) {
        self.progress.lock().unwrap().push(fraction);
    }

    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }
}

/// Creates one empty subdirectory per acquisition and registers its data.
fn setup(acquisitions: Vec<(&str, SyntheticAcquisition)>) -> (tempfile::TempDir, PathBuf, InMemoryReader) {
    let dir = tempfile::tempdir().unwrap();
    let series = dir.path().join("ko_series");
    fs::create_dir(&series).unwrap();
    let mut reader = InMemoryReader::new();
    for (name, acq) in acquisitions {
        let path = series.join(name);
        fs::create_dir(&path).unwrap();
        reader.insert(path, acq);
    }
    (dir, series, reader)
}

fn read_output(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn csv_files(folder: &Path) -> Vec<PathBuf> {
    fs::read_dir(folder)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "csv"))
        .collect()
}

#[test]
fn test_two_voltages_are_merged_and_sorted() {
    let (_dir, series, reader) = setup(vec![
        ("run_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
        ("run_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
    ]);
    let params = RunParameters::new(500.0, 600.0);
    let report = run_folder(&reader, &series, &params, &NoopObserver).unwrap();

    assert_eq!(
        report.output_path,
        series.join("ko_series_mz500-600_raw.csv")
    );
    assert_eq!(report.rows, 2);
    assert_eq!(report.columns, 2);
    assert!(report.excluded.is_empty());
    let expected = "\
#mz range,500.0-600.0,500.0-600.0
#Raw file name,run_5V.d,run_20V.d
Mobility,5V,20V
0.95,100,0
0.97,0,200
";
    assert_eq!(read_output(&report.output_path), expected);
    assert_eq!(reader.open_handles(), 0);
}

#[test]
fn test_unsorted_columns_keep_discovery_order() {
    let (_dir, series, reader) = setup(vec![
        ("a_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
        ("b_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
    ]);
    let mut params = RunParameters::new(500.0, 600.0);
    params.sort_columns = false;
    let report = run_folder(&reader, &series, &params, &NoopObserver).unwrap();
    let text = read_output(&report.output_path);
    assert_eq!(text.lines().nth(2), Some("Mobility,20V,5V"));
}

#[test]
fn test_empty_folder_reports_no_data_and_writes_nothing() {
    let (_dir, series, reader) = setup(vec![]);
    let recorder = Recorder::default();
    let err = run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &recorder)
        .unwrap_err();

    assert!(matches!(err, RunError::NoData { .. }));
    assert!(csv_files(&series).is_empty());
    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![STATUS_NO_DATA.to_string()]
    );
}

#[test]
fn test_no_signal_in_window_is_no_data() {
    let (_dir, series, reader) = setup(vec![
        ("run_5V.d", SyntheticAcquisition::single_scan(0.95, 100, 100)),
        ("run_10V.d", SyntheticAcquisition::new(vec![])),
    ]);
    let err = run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &NoopObserver)
        .unwrap_err();
    assert!(matches!(err, RunError::NoData { ref excluded, .. } if excluded.is_empty()));
    assert!(csv_files(&series).is_empty());
}

#[test]
fn test_all_acquisitions_failing_reports_each_failure() {
    let (_dir, series, reader) = setup(vec![
        ("a_5V.d", SyntheticAcquisition::unreadable("corrupt analysis.tdf")),
        ("b_10V.d", SyntheticAcquisition::unreadable("missing analysis.tdf_bin")),
    ]);
    let recorder = Recorder::default();
    let err = run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &recorder)
        .unwrap_err();

    let RunError::NoData { folder, excluded } = err else {
        panic!("expected NoData, got {err:?}");
    };
    assert_eq!(folder, series);
    let names: Vec<&str> = excluded.iter().map(|e| e.folder_name.as_str()).collect();
    assert_eq!(names, vec!["a_5V.d", "b_10V.d"]);
    assert!(excluded[0].reason.contains("corrupt analysis.tdf"));
    assert!(excluded[1].reason.contains("missing analysis.tdf_bin"));
    assert_eq!(
        recorder.statuses.lock().unwrap().last(),
        Some(&STATUS_NO_DATA.to_string())
    );
    assert!(csv_files(&series).is_empty());
    assert_eq!(reader.open_handles(), 0);
}

#[test]
fn test_shared_mobility_values_stay_in_separate_columns() {
    let (_dir, series, reader) = setup(vec![
        ("a_10V.d", SyntheticAcquisition::single_scan(1.0, 550, 10)),
        ("b_20V.d", SyntheticAcquisition::single_scan(1.0, 560, 15)),
    ]);
    let report =
        run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &NoopObserver).unwrap();
    let text = read_output(&report.output_path);
    let data: Vec<&str> = text.lines().skip(3).collect();
    assert_eq!(data, vec!["1,10,15"]);
}

#[test]
fn test_disjoint_mobilities_give_one_row_each() {
    let a = SyntheticAcquisition::new(vec![SyntheticFrame::new(vec![
        SyntheticScan::new(0.80, vec![(550, 1)]),
        SyntheticScan::new(0.81, vec![(550, 2)]),
        SyntheticScan::new(0.82, vec![(550, 3)]),
    ])]);
    let b = SyntheticAcquisition::new(vec![SyntheticFrame::new(vec![
        SyntheticScan::new(0.90, vec![(550, 4)]),
        SyntheticScan::new(0.91, vec![(550, 5)]),
    ])]);
    let (_dir, series, reader) = setup(vec![("a_1V.d", a), ("b_2V.d", b)]);
    let report =
        run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &NoopObserver).unwrap();
    assert_eq!(report.rows, 5);

    let text = read_output(&report.output_path);
    for line in text.lines().skip(3) {
        let cells: Vec<f64> = line.split(',').map(|c| c.parse().unwrap()).collect();
        let (key, a, b) = (cells[0], cells[1], cells[2]);
        if key < 0.85 {
            assert!(a > 0.0);
            assert_eq!(b, 0.0);
        } else {
            assert_eq!(a, 0.0);
            assert!(b > 0.0);
        }
    }
}

#[test]
fn test_rerunning_gives_identical_output() {
    let (_dir, series, reader) = setup(vec![
        ("run_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
        ("run_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
    ]);
    let params = RunParameters::new(500.0, 600.0);
    let first = run_folder(&reader, &series, &params, &NoopObserver).unwrap();
    let first_text = read_output(&first.output_path);
    let second = run_folder(&reader, &series, &params, &NoopObserver).unwrap();
    assert_eq!(first, second);
    assert_eq!(first_text, read_output(&second.output_path));
}

#[test]
fn test_ccs_runs_convert_every_key() {
    let mobilities = [0.95, 0.97, 1.02];
    let frame = SyntheticFrame::new(
        mobilities
            .iter()
            .map(|&m| SyntheticScan::new(m, vec![(550, 10)]))
            .collect(),
    );
    let (_dir, series, reader) =
        setup(vec![("run_5V.d", SyntheticAcquisition::new(vec![frame]))]);
    let mut params = RunParameters::new(500.0, 600.0);
    params.ccs = Some(CcsSettings::try_new(1, 550.0).unwrap());
    let report = run_folder(&reader, &series, &params, &NoopObserver).unwrap();

    let text = read_output(&report.output_path);
    assert_eq!(text.lines().nth(2), Some("CCS,5V"));
    let keys: Vec<f64> = text
        .lines()
        .skip(3)
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    let expected: Vec<f64> = mobilities
        .iter()
        .map(|&m| reader.mobility_to_ccs(m, 1, 550.0).unwrap())
        .collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_failing_acquisitions_are_excluded_and_reported() {
    let broken = SyntheticAcquisition::new(vec![
        SyntheticFrame::new(vec![SyntheticScan::new(0.9, vec![(550, 1)])]),
        SyntheticFrame::new(vec![SyntheticScan::new(0.9, vec![(550, 1)])]),
    ])
    .failing_at_frame(2);
    let (_dir, series, reader) = setup(vec![
        ("a_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
        ("b_10V.d", SyntheticAcquisition::unreadable("corrupt analysis.tdf")),
        ("c_15V.d", broken),
        ("d_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
    ]);
    let report =
        run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &NoopObserver).unwrap();

    let merged: Vec<&str> = report.merged.iter().map(|m| m.folder_name.as_str()).collect();
    assert_eq!(merged, vec!["a_5V.d", "d_20V.d"]);
    let excluded: Vec<&str> = report.excluded.iter().map(|e| e.folder_name.as_str()).collect();
    assert_eq!(excluded, vec!["b_10V.d", "c_15V.d"]);
    assert!(report.excluded[0].reason.contains("corrupt analysis.tdf"));
    assert_eq!(report.columns, 2);
    assert_eq!(reader.open_handles(), 0);
}

#[test]
fn test_statuses_and_progress_follow_discovery_order() {
    let (_dir, series, reader) = setup(vec![
        ("b_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
        ("a_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
    ]);
    let recorder = Recorder::default();
    run_folder(&reader, &series, &RunParameters::new(500.0, 600.0), &recorder).unwrap();

    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![
            "Processing folder: a_5V.d".to_string(),
            "Processing folder: b_20V.d".to_string(),
            STATUS_COMPLETE.to_string(),
        ]
    );
    assert_eq!(*recorder.progress.lock().unwrap(), vec![0.5, 1.0]);
}

#[test]
fn test_parallel_extraction_matches_sequential() {
    let acquisitions: Vec<(String, SyntheticAcquisition)> = (1..=6)
        .map(|i| {
            let frames = (0..3)
                .map(|f| {
                    SyntheticFrame::new(vec![
                        SyntheticScan::new(0.8 + 0.01 * i as f64, vec![(550, i * 10 + f)]),
                        SyntheticScan::new(0.9, vec![(560, i), (700, 1000)]),
                    ])
                })
                .collect();
            (format!("run_{}V.d", 30 - i * 5), SyntheticAcquisition::new(frames))
        })
        .collect();
    let (_dir, series, reader) = setup(
        acquisitions
            .iter()
            .map(|(n, a)| (n.as_str(), a.clone()))
            .collect(),
    );

    let mut params = RunParameters::new(500.0, 600.0);
    let sequential = run_folder(&reader, &series, &params, &NoopObserver).unwrap();
    let sequential_text = read_output(&sequential.output_path);

    params.parallel_extraction = true;
    let recorder = Recorder::default();
    let parallel = run_folder(&reader, &series, &params, &recorder).unwrap();
    assert_eq!(sequential_text, read_output(&parallel.output_path));
    assert_eq!(sequential.merged, parallel.merged);
    assert_eq!(recorder.progress.lock().unwrap().len(), 6);
    assert_eq!(reader.open_handles(), 0);
}

#[test]
fn test_method_labels_fall_back_to_unknown() {
    let (_dir, series, reader) = setup(vec![
        ("run_a.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
        ("run_b.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
    ]);
    let bundle = series.join("run_b.d").join("acq.m");
    fs::create_dir(&bundle).unwrap();
    fs::write(
        bundle.join("acq.method"),
        r#"<para_double value="12.04" permname="IMS_TunnelVoltage_Delta_6"/>"#,
    )
    .unwrap();

    let mut params = RunParameters::new(500.0, 600.0);
    params.label_strategy = LabelStrategy::Method;
    let report = run_folder(&reader, &series, &params, &NoopObserver).unwrap();
    let text = read_output(&report.output_path);
    // Numeric labels sort before the fallback.
    assert_eq!(text.lines().nth(2), Some("Mobility,12.0,unknown"));
    assert_eq!(text.lines().nth(1), Some("#Raw file name,run_b.d,run_a.d"));
}

#[test]
fn test_runs_through_the_backend_enum_on_a_worker() {
    let (dir, series, reader) = setup(vec![
        ("run_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
        ("run_20V.d", SyntheticAcquisition::single_scan(0.97, 550, 200)),
    ]);
    let backend = ReaderBackend::InMemory(reader.clone());
    let handle = {
        let series = series.clone();
        spawn_run(move |obs| {
            run_folder(&backend, &series, &RunParameters::new(500.0, 600.0), obs)
        })
    };
    let events: Vec<RunEvent> = handle.events().iter().collect();
    let report = handle.wait().unwrap().unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(
        events.last(),
        Some(&RunEvent::Status(STATUS_COMPLETE.to_string()))
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RunEvent::Progress(_)))
            .count(),
        2
    );
    assert_eq!(reader.open_handles(), 0);
    drop(dir);
}

#[test]
fn test_batch_rows_fail_independently() {
    let (_dir, series, reader) = setup(vec![
        ("run_5V.d", SyntheticAcquisition::single_scan(0.95, 550, 100)),
    ]);
    let good = BatchRow {
        row: 1,
        parent_folder: Some(series.to_string_lossy().to_string()),
        mz_min: Some("500".to_string()),
        mz_max: Some("600".to_string()),
        extraction_method: Some("filename".to_string()),
        sort_columns: Some("true".to_string()),
        convert_to_ccs: Some("false".to_string()),
        ..Default::default()
    };
    let missing_folder = BatchRow {
        row: 2,
        parent_folder: Some(series.join("nope").to_string_lossy().to_string()),
        ..good.clone()
    };
    let ccs_without_charge = BatchRow {
        row: 3,
        convert_to_ccs: Some("true".to_string()),
        reference_mz: Some("550".to_string()),
        ..good.clone()
    };
    let good_again = BatchRow {
        row: 4,
        mz_min: Some("550".to_string()),
        ..good.clone()
    };

    let recorder = Recorder::default();
    let report = run_batch(
        &reader,
        &[good, missing_folder, ccs_without_charge, good_again],
        &RunParameters::new(0.0, 0.0),
        &recorder,
    );

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 2);
    let ok_rows: Vec<usize> = report
        .outcomes
        .iter()
        .filter(|o| o.result.is_ok())
        .map(|o| o.row)
        .collect();
    assert_eq!(ok_rows, vec![1, 4]);
    assert!(series.join("ko_series_mz500-600_raw.csv").exists());
    assert!(series.join("ko_series_mz550-600_raw.csv").exists());

    let statuses = recorder.statuses.lock().unwrap();
    assert!(statuses[0].starts_with("Processing folder "));
    assert!(statuses[0].ends_with("(1/4)"));
    assert_eq!(statuses.last(), Some(&STATUS_BATCH_COMPLETE.to_string()));
    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.last(), Some(&1.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}
