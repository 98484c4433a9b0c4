mod common;

use std::fs;

use serde_json::json;

use common::{date, resolve};
use s2s_ingest::archive::DateSelector;
use s2s_ingest::config::IdempotencyPolicy;
use s2s_ingest::domain::{Provider, Resolution, TimeWindow};
use s2s_ingest::planner::{WindowPlanner, WindowStatus};
use s2s_ingest::source::SourceSpec;
use s2s_ingest::store::Store;

fn window(year: i32, month: u32) -> TimeWindow {
    TimeWindow::new(year, month).unwrap()
}

fn spec_for(provider: Provider, config: serde_json::Value) -> SourceSpec {
    let config = resolve(config);
    SourceSpec::from_config(provider, Resolution::default(), &config).unwrap()
}

#[test]
fn exception_table_wins_over_sparse_calendar() {
    let spec = spec_for(
        Provider::Ecmwf,
        json!({
            "s2s": { "exceptions": { "ecmwf": { "2016-01": "2016-01-04/2016-01-11" } } }
        }),
    );
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(temp.path().to_str().unwrap().into());
    let planner = WindowPlanner::new(&spec, &store, IdempotencyPolicy::AnyPartition);

    let plan = planner.plan_window(window(2016, 1)).unwrap();
    assert_eq!(plan.selector.render(), "2016-01-04/2016-01-11");
    assert!(plan.is_exception);
    assert_eq!(plan.status, WindowStatus::Pending);

    let february = planner.plan_window(window(2016, 2)).unwrap();
    assert!(matches!(february.selector, DateSelector::Sparse { .. }));
    assert!(february.selector.render().starts_with("2016-02-01/2016-02-04"));
    assert!(february.is_exception);
}

#[test]
fn sparse_dates_are_joined_for_the_window() {
    let spec = spec_for(Provider::Ecmwf, json!({}));
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(temp.path().to_str().unwrap().into());
    let planner = WindowPlanner::new(&spec, &store, IdempotencyPolicy::AnyPartition);

    let selector = planner.selector(window(2016, 1));
    assert_eq!(
        selector.render(),
        "2016-01-04/2016-01-07/2016-01-11/2016-01-14/2016-01-18/2016-01-21/2016-01-25/2016-01-28"
    );
}

#[test]
fn dense_fallbacks() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(temp.path().to_str().unwrap().into());

    let ncep = spec_for(Provider::Ncep, json!({}));
    let planner = WindowPlanner::new(&ncep, &store, IdempotencyPolicy::AnyPartition);
    let plan = planner.plan_window(window(2020, 2)).unwrap();
    assert_eq!(plan.selector.render(), "2020-02-01/to/2020-02-29");
    assert!(!plan.is_exception);

    // before its sparse calendar starts, cma is dense
    let cma = spec_for(Provider::Cma, json!({}));
    let planner = WindowPlanner::new(&cma, &store, IdempotencyPolicy::AnyPartition);
    let plan = planner.plan_window(window(2019, 6)).unwrap();
    assert_eq!(plan.selector.render(), "2019-06-01/to/2019-06-30");
    assert!(!plan.is_exception);
    assert!(planner.plan_window(window(2019, 12)).unwrap().is_exception);

    let era5 = spec_for(Provider::Era5, json!({}));
    let planner = WindowPlanner::new(&era5, &store, IdempotencyPolicy::AnyPartition);
    let plan = planner.plan_window(window(2016, 1)).unwrap();
    assert_eq!(plan.selector, DateSelector::dense(window(2016, 1)));
    assert!(!plan.is_exception);
}

#[test]
fn any_partition_marks_window_done() {
    let spec = spec_for(Provider::Ncep, json!({}));
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(temp.path().to_str().unwrap().into());
    let provider_dir = store.ensure_provider_dir(Provider::Ncep).unwrap();
    fs::write(
        provider_dir.join("ncep_full_1.5deg_20200115.zarr.zip").as_std_path(),
        b"zip",
    )
    .unwrap();
    // other resolution does not count
    fs::create_dir_all(provider_dir.join("ncep_full_0.25deg_20200301.zarr").as_std_path()).unwrap();

    let planner = WindowPlanner::new(&spec, &store, IdempotencyPolicy::AnyPartition);
    let plans = planner
        .plan(&[window(2020, 1), window(2020, 2), window(2020, 3)])
        .unwrap();
    let statuses = plans.iter().map(|plan| plan.status).collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![WindowStatus::Done, WindowStatus::Pending, WindowStatus::Pending]
    );
}

#[test]
fn completion_marker_ignores_partial_windows() {
    let spec = spec_for(Provider::Ncep, json!({}));
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(temp.path().to_str().unwrap().into());
    let provider_dir = store.ensure_provider_dir(Provider::Ncep).unwrap();
    fs::create_dir_all(provider_dir.join("ncep_full_1.5deg_20200101.zarr").as_std_path()).unwrap();

    let planner = WindowPlanner::new(&spec, &store, IdempotencyPolicy::CompletionMarker);
    assert!(planner.plan_window(window(2020, 1)).unwrap().is_pending());

    store.write_marker(&spec, window(2020, 1), 31).unwrap();
    assert!(!planner.plan_window(window(2020, 1)).unwrap().is_pending());
    assert!(store.has_marker(&spec, window(2020, 1)));
    assert_eq!(date("2020-01-01"), window(2020, 1).first_day());
}
