use std::collections::{BTreeSet, HashMap};

use super::*;
use crate::table::Cell;
use tempfile::tempdir;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn shared_group_shares_a_stage() {
    let files = names(&["a-1.jpg", "a-2.jpg", "b-1.jpg"]);
    let groups = ["a", "a", "b"];
    let splitter = StratifiedGroupKFold::new(10).unwrap();
    let rows = assign_stages(&files, &groups, &[1, 1, 0], &splitter).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].stage, rows[1].stage);
    assert_eq!(rows[0].file_name, "a-1.jpg");
}

#[test]
fn assignment_invariants_hold_on_larger_input() {
    let files: Vec<String> = (0..200).map(|i| format!("g{:02}-{i:03}.jpg", i % 37)).collect();
    let groups: Vec<&str> = files.iter().map(|f| f.split('-').next().unwrap()).collect();
    let labels: Vec<i64> = (0..200).map(|i| i64::from(i % 5 == 0)).collect();
    let splitter = StratifiedGroupKFold::new(10).unwrap();

    let rows = assign_stages(&files, &groups, &labels, &splitter).unwrap();
    let again = assign_stages(&files, &groups, &labels, &splitter).unwrap();
    assert_eq!(rows, again);

    assert_eq!(rows.len(), files.len());
    let unique: BTreeSet<&str> = rows.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(unique.len(), files.len());

    let mut stage_of_group: HashMap<&str, Stage> = HashMap::new();
    for (row, group) in rows.iter().zip(&groups) {
        let stage = *stage_of_group.entry(*group).or_insert(row.stage);
        assert_eq!(stage, row.stage, "group {group} split across stages");
    }

    let counts = stage_counts(&rows);
    assert_eq!(counts.values().sum::<usize>(), 200);
    assert!(counts[&Stage::Train] > counts[&Stage::Test]);
}

#[test]
fn assign_rejects_mismatched_file_list() {
    let splitter = StratifiedGroupKFold::new(2).unwrap();
    let err = assign_stages(&names(&["a-1.jpg"]), &["a"], &[1, 0], &splitter).unwrap_err();
    assert!(matches!(err, SplitError::LengthMismatch { .. }));
}

#[test]
fn csv_has_exact_header_and_vocabulary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(SPLIT_CSV_NAME);
    let rows = vec![
        SplitRow {
            file_name: "a-1.jpg".to_string(),
            stage: Stage::Test,
        },
        SplitRow {
            file_name: "b-1.jpg".to_string(),
            stage: Stage::Valid,
        },
        SplitRow {
            file_name: "c-1.jpg".to_string(),
            stage: Stage::Train,
        },
    ];
    write_split_csv(&path, &rows).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "File_Name,Stage\na-1.jpg,test\nb-1.jpg,valid\nc-1.jpg,train\n"
    );
    assert_eq!(read_split_csv(&path).unwrap(), rows);
}

#[test]
fn csv_header_is_written_without_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(SPLIT_CSV_NAME);
    write_split_csv(&path, &[]).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "File_Name,Stage\n");
    assert!(read_split_csv(&path).unwrap().is_empty());
}

#[test]
fn labels_are_looked_up_by_file_name() {
    let mut eda = Table::new(["File_Name", "Split", "bicycle"]);
    eda.add_row(vec!["b-1.jpg".into(), "None".into(), Cell::Int(0)]).unwrap();
    eda.add_row(vec!["a-1.jpg".into(), "None".into(), Cell::Int(1)]).unwrap();

    let labels = labels_for(&eda, "bicycle", &names(&["a-1.jpg", "b-1.jpg"])).unwrap();
    assert_eq!(labels, vec![1, 0]);

    let err = labels_for(&eda, "bicycle", &names(&["z-1.jpg"])).unwrap_err();
    assert!(matches!(err, SplitStepError::MissingRow { .. }));
    let err = labels_for(&eda, "Split", &names(&["a-1.jpg"])).unwrap_err();
    assert!(matches!(err, SplitStepError::InvalidLabel { .. }));
}

fn seed_raw_artifact(store: &ArtifactStore, src: &Path, files: &[(&str, i64)]) {
    let images = src.join(IMAGES_DIR);
    fs::create_dir_all(&images).unwrap();
    let mut eda = Table::new(["File_Name", "Split", "bicycle"]);
    for (name, label) in files {
        fs::write(images.join(name), name.as_bytes()).unwrap();
        eda.add_row(vec![(*name).into(), "None".into(), Cell::Int(*label)])
            .unwrap();
    }
    let mut artifact = Artifact::new("bdd_simple_1k", "raw_data").unwrap();
    artifact.add_dir(&images, Some(IMAGES_DIR)).unwrap();
    artifact.add_table(eda, EDA_TABLE_NAME).unwrap();
    store.log(artifact).unwrap();
}

#[test]
fn split_step_writes_csv_and_joined_artifact() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::open(&dir.path().join("store"), None, "seg-test").unwrap();
    let files = [
        ("a-1.jpg", 1),
        ("a-2.jpg", 1),
        ("b-1.jpg", 0),
        ("c-1.jpg", 0),
        ("d-1.jpg", 1),
        ("e-1.jpg", 0),
    ];
    seed_raw_artifact(&store, &dir.path().join("src"), &files);

    let params = Params {
        n_splits: 3,
        ..Params::default()
    };
    let options = SplitOptions {
        output_dir: dir.path().join("output"),
        artifact: None,
    };
    let summary = split_dataset(&params, &store, &options).unwrap();
    assert_eq!(summary.rows, 6);
    assert_eq!(summary.source_artifact, "bdd_simple_1k:v0");
    assert_eq!(summary.artifact, "bdd_simple_1k_split:v0");
    assert_eq!(
        summary.csv_path,
        dir.path().join("output/02_split/data_split.csv")
    );

    let rows = read_split_csv(&summary.csv_path).unwrap();
    let stage_of: HashMap<&str, Stage> =
        rows.iter().map(|r| (r.file_name.as_str(), r.stage)).collect();
    assert_eq!(stage_of["a-1.jpg"], stage_of["a-2.jpg"]);

    let logged = store.resolve("bdd_simple_1k_split:latest").unwrap();
    let entries = &logged.manifest().entries;
    assert!(entries.contains_key(SPLIT_CSV_NAME));
    assert!(entries.contains_key("images/a-1.jpg"));
    assert!(entries.contains_key("eda_table.table.json"));
    let joined = logged.get_table(JOINED_TABLE_NAME).unwrap();
    assert_eq!(joined.columns(), ["File_Name", "Split", "bicycle", "Stage"]);
    assert_eq!(joined.len(), 6);
}

#[test]
fn split_step_is_idempotent_across_runs() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::open(dir.path(), Some("team"), "seg-test").unwrap();
    let files: Vec<(String, i64)> = (0..30)
        .map(|i| (format!("g{}-{i}.jpg", i % 11), i64::from(i % 4 == 0)))
        .collect();
    let borrowed: Vec<(&str, i64)> = files.iter().map(|(n, l)| (n.as_str(), *l)).collect();
    seed_raw_artifact(&store, &dir.path().join("src"), &borrowed);

    let params = Params::default();
    let first = split_dataset(
        &params,
        &store,
        &SplitOptions {
            output_dir: dir.path().join("out1"),
            artifact: Some("bdd_simple_1k:v0".to_string()),
        },
    )
    .unwrap();
    let second = split_dataset(
        &params,
        &store,
        &SplitOptions {
            output_dir: dir.path().join("out2"),
            artifact: None,
        },
    )
    .unwrap();
    assert_eq!(
        fs::read(&first.csv_path).unwrap(),
        fs::read(&second.csv_path).unwrap()
    );
    assert_eq!(first.artifact, second.artifact);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn split_step_fails_without_source_artifact() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::open(dir.path(), None, "seg-test").unwrap();
    let err = split_dataset(
        &Params::default(),
        &store,
        &SplitOptions {
            output_dir: dir.path().join("out"),
            artifact: None,
        },
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SplitStepError::Artifact(ArtifactError::NotFound(_))
    ));
}

#[test]
fn split_step_rejects_artifact_without_images() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::open(dir.path(), None, "seg-test").unwrap();
    let images = dir.path().join("src").join(IMAGES_DIR);
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("README.txt"), b"no images here").unwrap();
    let mut artifact = Artifact::new("bdd_simple_1k", "raw_data").unwrap();
    artifact.add_dir(&images, Some(IMAGES_DIR)).unwrap();
    artifact
        .add_table(Table::new(["File_Name", "Split", "bicycle"]), EDA_TABLE_NAME)
        .unwrap();
    store.log(artifact).unwrap();

    let output_dir = dir.path().join("out");
    let err = split_dataset(
        &Params::default(),
        &store,
        &SplitOptions {
            output_dir: output_dir.clone(),
            artifact: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, SplitStepError::NoImages(_)));
    assert!(!output_dir.join("02_split").join(SPLIT_CSV_NAME).exists());
}
