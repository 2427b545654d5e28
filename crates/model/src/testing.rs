//! Shared fixtures for unit tests

use crate::types::GeoPoints;
use ndarray::array;

fn labels(names: &[&str]) -> Vec<Option<String>> {
    names.iter().map(|s| Some(s.to_string())).collect()
}

/// Two units meeting around x = 5, with one dual-labeled contact point as
/// the last observation
pub(crate) fn two_class_points_with_contact() -> GeoPoints {
    let coords = array![
        [0., 0., 0.],
        [1., 0., 0.],
        [2., 0., 0.],
        [1., 2., 0.],
        [2., 1., 1.],
        [8., 0., 0.],
        [9., 0., 0.],
        [10., 0., 0.],
        [8., 2., 0.],
        [9., 1., 1.],
        [5., 0., 0.],
    ];
    let label1 = labels(&["A", "A", "A", "A", "A", "B", "B", "B", "B", "B", "A"]);
    let label2 = labels(&["A", "A", "A", "A", "A", "B", "B", "B", "B", "B", "B"]);
    GeoPoints::new(coords, label1, label2).unwrap()
}

/// Three units with one A/B contact at index 2
pub(crate) fn three_class_points() -> GeoPoints {
    let coords = array![
        [0., 0., 0.],
        [10., 0., 0.],
        [5., 0., 0.],
        [0., 10., 0.],
        [10., 10., 0.],
    ];
    let label1 = labels(&["A", "B", "A", "C", "C"]);
    let label2 = labels(&["A", "B", "B", "C", "C"]);
    GeoPoints::new(coords, label1, label2).unwrap()
}
