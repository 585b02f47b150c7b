mod support;

use std::collections::HashMap;

use segprep::app_dirs;
use segprep::artifacts::ArtifactStore;
use segprep::dataset::ingest::ingest_dataset;
use segprep::dataset::source::DatasetLayout;
use segprep::dataset::split::{self, SplitOptions, Stage};
use segprep::params::Params;
use support::{
    dataset::{synthetic_samples, write_dataset},
    segprep_env::SegprepEnvGuard,
};

#[test]
fn ingest_then_split_produces_consistent_csv_and_artifacts() {
    let temp = tempfile::tempdir().expect("create tempdir");
    let _env = SegprepEnvGuard::set_home(temp.path().join("home"));

    let samples = synthetic_samples(60, 13);
    let data_root = temp.path().join("bdd_simple_1k");
    write_dataset(&data_root, &samples);
    let layout = DatasetLayout::locate(temp.path()).expect("locate dataset");
    assert_eq!(layout.root, data_root);

    let params = Params::default();
    let store_root = app_dirs::artifacts_dir().expect("artifacts dir");
    assert!(store_root.starts_with(temp.path().join("home")));
    let store = ArtifactStore::open(&store_root, params.entity.as_deref(), &params.project)
        .expect("open store");

    let output = temp.path().join("output");
    let ingested = ingest_dataset(&params, &store, &layout, &output, None).expect("ingest");
    assert_eq!(ingested.images, 60);
    assert_eq!(ingested.class_counts["bicycle"], 20);
    assert_eq!(ingested.class_counts["person"], 0);

    let summary = split::split_dataset(
        &params,
        &store,
        &SplitOptions {
            output_dir: output.clone(),
            artifact: None,
        },
    )
    .expect("split");
    assert_eq!(summary.source_artifact, ingested.artifact);

    let rows = split::read_split_csv(&summary.csv_path).expect("read csv");
    assert_eq!(rows.len(), samples.len());
    let text = std::fs::read_to_string(&summary.csv_path).expect("csv text");
    assert!(text.starts_with("File_Name,Stage\n"));

    let mut stage_of_group: HashMap<String, Stage> = HashMap::new();
    for row in &rows {
        let group = params.group_key(&row.file_name).to_string();
        let stage = *stage_of_group.entry(group.clone()).or_insert(row.stage);
        assert_eq!(stage, row.stage, "group {group} spans stages");
    }
    for stage in [Stage::Train, Stage::Valid, Stage::Test] {
        assert!(summary.stage_counts.contains_key(&stage), "no {stage} rows");
    }

    let logged = store
        .resolve(&format!("{}:latest", params.processed_data_artifact))
        .expect("resolve split artifact");
    let joined = logged
        .get_table(split::JOINED_TABLE_NAME)
        .expect("joined table");
    assert_eq!(joined.len(), samples.len());
    assert_eq!(
        joined.columns().last().map(String::as_str),
        Some(split::STAGE_COLUMN)
    );

    let runs = std::fs::read_dir(store.root().join("runs"))
        .expect("runs dir")
        .count();
    assert_eq!(runs, 2);
}
