mod common;

use common::date;
use s2s_ingest::domain::TimeWindow;
use s2s_ingest::schedule::generate;

#[test]
fn ecmwf_calendar_alternates_three_and_four_days() {
    let seq = generate(date("2016-01-04"), date("2023-12-31"), &[3, 4]).unwrap();
    let head = seq.as_slice()[..9]
        .iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        head,
        vec![
            "2016-01-04",
            "2016-01-07",
            "2016-01-11",
            "2016-01-14",
            "2016-01-18",
            "2016-01-21",
            "2016-01-25",
            "2016-01-28",
            "2016-02-01",
        ]
    );
}

#[test]
fn calendar_is_strictly_increasing_and_overshoots_end_once() {
    let end = date("2023-12-31");
    let seq = generate(date("2019-12-02"), end, &[3, 4]).unwrap();
    let dates = seq.as_slice();
    assert!(dates.windows(2).all(|pair| pair[0] < pair[1]));
    let last = dates[dates.len() - 1];
    assert!(last > end);
    assert!(dates[dates.len() - 2] <= end);
}

#[test]
fn window_filter_matches_month() {
    let seq = generate(date("2016-01-04"), date("2016-03-31"), &[3, 4]).unwrap();
    let january = seq.in_window(TimeWindow::new(2016, 1).unwrap());
    assert_eq!(january.len(), 8);
    let february = seq.in_window(TimeWindow::new(2016, 2).unwrap());
    assert_eq!(february.first(), Some(&date("2016-02-01")));
}

#[test]
fn single_increment_is_regular() {
    let seq = generate(date("2020-01-01"), date("2020-01-10"), &[5]).unwrap();
    assert_eq!(
        seq.to_iso_strings(),
        vec!["2020-01-01", "2020-01-06", "2020-01-11"]
    );
}

#[test]
fn january_calendar_keeps_the_february_overshoot() {
    let seq = generate(date("2016-01-04"), date("2016-01-31"), &[3, 4]).unwrap();
    assert_eq!(
        seq.to_iso_strings(),
        vec![
            "2016-01-04",
            "2016-01-07",
            "2016-01-11",
            "2016-01-14",
            "2016-01-18",
            "2016-01-21",
            "2016-01-25",
            "2016-01-28",
            "2016-02-01",
        ]
    );
    assert_eq!(seq.in_window(TimeWindow::new(2016, 1).unwrap()).len(), 8);
}

#[test]
fn three_increments_cycle_in_declared_order() {
    let seq = generate(date("2020-01-01"), date("2020-01-15"), &[1, 2, 5]).unwrap();
    assert_eq!(
        seq.to_iso_strings(),
        vec![
            "2020-01-01",
            "2020-01-02",
            "2020-01-04",
            "2020-01-09",
            "2020-01-10",
            "2020-01-12",
            "2020-01-17",
        ]
    );
}
