mod common;

use std::fs;

use camino::Utf8PathBuf;
use serde_json::json;

use common::{date, resolve};
use s2s_ingest::domain::{Provider, Resolution, TimeWindow};
use s2s_ingest::source::SourceSpec;
use s2s_ingest::store::{Store, WindowMarker};

fn spec(provider: Provider, resolution: &str) -> SourceSpec {
    let config = resolve(json!({}));
    SourceSpec::from_config(provider, resolution.parse::<Resolution>().unwrap(), &config).unwrap()
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new(root))
}

#[test]
fn layout_paths() {
    let store = Store::new(Utf8PathBuf::from("data"));
    let ecmwf = spec(Provider::Ecmwf, "1.5");
    let window = TimeWindow::new(2020, 1).unwrap();

    assert_eq!(
        store.partition_dir_path(&ecmwf, date("2020-01-07")).as_str(),
        "data/ecmwf/ecmwf_full_1.5deg_20200107.zarr"
    );
    assert_eq!(
        store.partition_zip_path(&ecmwf, date("2020-01-07")).as_str(),
        "data/ecmwf/ecmwf_full_1.5deg_20200107.zarr.zip"
    );
    assert_eq!(
        store.marker_path(&ecmwf, window).as_str(),
        "data/ecmwf/ecmwf_full_1.5deg_202001.complete"
    );

    let era5 = spec(Provider::Era5, "0.25");
    assert_eq!(
        Store::partition_key(&era5, date("2021-11-30")),
        "era5_full_0.25deg_20211130"
    );
}

#[test]
fn window_partitions_match_prefix() {
    let (_temp, store) = temp_store();
    let ncep = spec(Provider::Ncep, "1.5");
    let dir = store.ensure_provider_dir(Provider::Ncep).unwrap();
    for name in [
        "ncep_full_1.5deg_20200102.zarr",
        "ncep_full_1.5deg_20200101.zarr",
        "ncep_full_1.5deg_20200201.zarr",
        "ncep_full_1.50deg_20200103.zarr",
    ] {
        fs::create_dir_all(dir.join(name).as_std_path()).unwrap();
    }
    fs::write(dir.join("ncep_full_1.5deg_20200103.zarr.zip").as_std_path(), b"zip").unwrap();
    fs::write(dir.join("ncep_full_1.5deg_202001.complete").as_std_path(), b"{}").unwrap();

    let january = store
        .window_partitions(&ncep, TimeWindow::new(2020, 1).unwrap())
        .unwrap();
    let names = january
        .iter()
        .map(|path| path.file_name().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "ncep_full_1.5deg_20200101.zarr",
            "ncep_full_1.5deg_20200102.zarr",
            "ncep_full_1.5deg_20200103.zarr.zip",
        ]
    );
    assert!(!store
        .has_any_partition(&ncep, TimeWindow::new(2020, 3).unwrap())
        .unwrap());

    let listed = store.list_partitions(&ncep).unwrap();
    assert_eq!(listed.len(), 4);
    assert_eq!(listed[0].date, date("2020-01-01"));
    assert!(listed[2].zipped);
    assert_eq!(listed[3].path, dir.join("ncep_full_1.5deg_20200201.zarr"));
}

#[test]
fn missing_provider_dir_is_empty() {
    let (_temp, store) = temp_store();
    let jma = spec(Provider::Jma, "1.5");
    assert!(store.list_partitions(&jma).unwrap().is_empty());
    assert!(!store
        .has_any_partition(&jma, TimeWindow::new(2020, 1).unwrap())
        .unwrap());
}

#[test]
fn marker_round_trip() {
    let (_temp, store) = temp_store();
    let cma = spec(Provider::Cma, "1.5");
    let window = TimeWindow::new(2020, 2).unwrap();
    assert!(!store.has_marker(&cma, window));

    let path = store.write_marker(&cma, window, 29).unwrap();
    assert!(store.has_marker(&cma, window));
    let marker: WindowMarker =
        serde_json::from_slice(&fs::read(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(marker.window, "2020-02");
    assert_eq!(marker.days, 29);
    assert_eq!(marker.resolution, "1.5");
    assert!(marker.tool.starts_with("s2s-ingest/"));
    // no temporary file left behind
    assert!(!path.with_extension("tmp").as_std_path().exists());
}

#[test]
fn scratch_dir_is_removed_on_drop() {
    let (_temp, store) = temp_store();
    let ukmo = spec(Provider::Ukmo, "1.5");
    let scratch = store
        .scratch_dir(&ukmo, TimeWindow::new(2020, 1).unwrap())
        .unwrap();
    let path = scratch.path().to_path_buf();
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(".scratch-ukmo-202001-"));
    fs::write(path.join("fragment_0.nc"), b"raw").unwrap();
    drop(scratch);
    assert!(!path.exists());
}
