use genotrait::shap::{BINARY_CLASS_NAME, ShapError, ShapHandler, ShapValues};
use ndarray::{Array2, Array3, array};

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn handler() -> ShapHandler {
    ShapHandler::new(names(&["f0", "f1", "f2", "f3"]), vec![0, 1, 3]).unwrap()
}

fn batch() -> (Vec<String>, Array2<f64>, Array2<f64>) {
    let samples = names(&["s0", "s1", "s2", "s3"]);
    let features = array![
        [1.0, 0.0, 1.0, 1.0],
        [0.0, 1.0, 1.0, 0.0],
        [1.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let shaps = array![
        [0.4, -0.1, 9.0, 0.05],
        [-0.2, 0.3, 9.0, -0.01],
        [0.6, 0.1, 9.0, -0.02],
        [-0.1, -0.2, 9.0, 0.03],
    ];
    (samples, features, shaps)
}

#[test]
fn summary_means_are_exact_subset_means() {
    let mut handler = handler();
    let (samples, features, shaps) = batch();
    handler
        .add_feature_data(&samples, features.view(), ShapValues::Binary(shaps), Some(0.5))
        .unwrap();
    let rows = handler.get_shap_summary(None).unwrap();
    assert_eq!(rows.len(), 3);

    // f0: |0.4|+|0.2|+|0.6|+|0.1| = 1.3; f1: 0.7; f3: 0.11.
    assert_eq!(rows[0].feature, "f0");
    assert_eq!(rows[0].rank, 0);
    assert_eq!(rows[0].class_name, BINARY_CLASS_NAME);
    assert!((rows[0].mean_shap_present.unwrap() - 0.5).abs() < 1e-12);
    assert!((rows[0].mean_shap_absent.unwrap() - (-0.15)).abs() < 1e-12);
    assert_eq!((rows[0].n_present, rows[0].n_absent), (2, 2));

    assert_eq!(rows[1].feature, "f1");
    assert!((rows[1].mean_shap_present.unwrap() - 0.2).abs() < 1e-12);
    assert!((rows[1].mean_shap_absent.unwrap() - (-0.15)).abs() < 1e-12);

    assert_eq!(rows[2].feature, "f3");
    assert!((rows[2].mean_shap_present.unwrap() - 0.04).abs() < 1e-12);
    assert!((rows[2].mean_shap_absent.unwrap() - (-0.015)).abs() < 1e-12);

    let top = handler.get_shap_summary(Some(1)).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0], rows[0]);
}

#[test]
fn close_base_values_are_accepted_and_distant_ones_rejected() {
    let mut handler = handler();
    let (samples, features, shaps) = batch();
    handler
        .add_feature_data(
            &samples[..2],
            features.slice(ndarray::s![..2, ..]),
            ShapValues::Binary(shaps.slice(ndarray::s![..2, ..]).to_owned()),
            Some(0.50001),
        )
        .unwrap();
    handler
        .add_feature_data(
            &samples[2..3],
            features.slice(ndarray::s![2..3, ..]),
            ShapValues::Binary(shaps.slice(ndarray::s![2..3, ..]).to_owned()),
            Some(0.5),
        )
        .unwrap();
    assert_eq!(handler.n_samples(), 3);

    let err = handler
        .add_feature_data(
            &samples[3..],
            features.slice(ndarray::s![3.., ..]),
            ShapValues::Binary(shaps.slice(ndarray::s![3.., ..]).to_owned()),
            Some(0.6),
        )
        .unwrap_err();
    assert!(matches!(err, ShapError::IncongruentBaseValue { .. }));
    assert_eq!(handler.n_samples(), 3);
    assert_eq!(handler.sample_names(), &names(&["s0", "s1", "s2"])[..]);
}

#[test]
fn force_rows_for_unknown_sample_fail() {
    let mut handler = handler();
    let (samples, features, shaps) = batch();
    handler
        .add_feature_data(&samples, features.view(), ShapValues::Binary(shaps), Some(0.0))
        .unwrap();
    let err = handler.get_shap_force("missing", None).unwrap_err();
    assert!(matches!(err, ShapError::SampleNotFound(name) if name == "missing"));

    let rows = handler.get_shap_force("s2", None).unwrap();
    let order: Vec<&str> = rows.iter().map(|row| row.feature.as_str()).collect();
    assert_eq!(order, vec!["f0", "f1", "f3"]);
    assert_eq!(rows[0].feature_value, 1.0);
    assert!((rows[0].shap_value - 0.6).abs() < 1e-12);
    assert_eq!(rows[2].feature_value, 0.0);
}

#[test]
fn equal_magnitudes_keep_feature_order() {
    let mut handler = ShapHandler::new(names(&["a", "b", "c"]), vec![0, 1, 2]).unwrap();
    let features = array![[1.0, 1.0, 0.0], [0.0, 1.0, 1.0]];
    let shaps = array![[0.25, -0.125, 0.375], [-0.25, 0.375, -0.125]];
    handler
        .add_feature_data(&names(&["x", "y"]), features.view(), ShapValues::Binary(shaps), Some(0.1))
        .unwrap();
    let rows = handler.get_shap_summary(None).unwrap();
    let order: Vec<&str> = rows.iter().map(|row| row.feature.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[test]
fn trailing_base_column_is_averaged_when_no_base_given() {
    let mut handler = ShapHandler::new(names(&["a", "b"]), vec![0, 1]).unwrap();
    let features = array![[1.0, 0.0], [0.0, 1.0]];
    let shaps = array![[0.2, -0.1, 0.25], [-0.2, 0.3, 0.35]];
    handler
        .add_feature_data(&names(&["x", "y"]), features.view(), ShapValues::Binary(shaps), None)
        .unwrap();
    assert!((handler.base_value().unwrap() - 0.3).abs() < 1e-12);
}

#[test]
fn multi_class_input_yields_row_per_class() {
    let mut handler = ShapHandler::new(names(&["a", "b"]), vec![0, 1])
        .unwrap()
        .with_class_names(names(&["absent", "present"]));
    let features = array![[1.0, 0.0], [0.0, 1.0]];
    let shaps = Array3::from_shape_vec(
        (2, 2, 2),
        vec![0.5, 0.1, -0.5, -0.1, -0.3, 0.2, 0.3, -0.2],
    )
    .unwrap();
    handler
        .add_feature_data(&names(&["x", "y"]), features.view(), ShapValues::MultiClass(shaps), Some(0.0))
        .unwrap();
    let rows = handler.get_shap_summary(None).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].feature, "a");
    assert_eq!(rows[0].class_name, "absent");
    assert_eq!(rows[1].class_name, "present");
    assert!((rows[0].mean_shap_present.unwrap() - 0.5).abs() < 1e-12);
    assert!((rows[1].mean_shap_present.unwrap() - (-0.5)).abs() < 1e-12);
}

fn two_class_handler() -> ShapHandler {
    ShapHandler::new(names(&["a", "b", "c"]), vec![0, 2]).unwrap()
}

/// Adds sample "x" (features a, b) and sample "y" (features a, c) as separate batches.
fn add_two_class_batches(handler: &mut ShapHandler) {
    let x_shaps =
        Array3::from_shape_vec((1, 2, 3), vec![0.2, 9.0, 0.1, -0.2, 9.0, -0.1]).unwrap();
    handler
        .add_feature_data(
            &names(&["x"]),
            array![[1.0, 1.0, 0.0]].view(),
            ShapValues::MultiClass(x_shaps),
            Some(0.0),
        )
        .unwrap();
    let y_shaps =
        Array3::from_shape_vec((1, 2, 3), vec![0.1, 9.0, -0.5, -0.1, 9.0, 0.5]).unwrap();
    handler
        .add_feature_data(
            &names(&["y"]),
            array![[1.0, 0.0, 1.0]].view(),
            ShapValues::MultiClass(y_shaps),
            Some(0.0),
        )
        .unwrap();
}

#[test]
fn multi_class_force_has_row_per_class() {
    let mut handler = two_class_handler();
    add_two_class_batches(&mut handler);

    let rows = handler.get_shap_force("y", None).unwrap();
    let summary: Vec<(usize, &str, &str, f64)> = rows
        .iter()
        .map(|row| (row.rank, row.feature.as_str(), row.class_name.as_str(), row.shap_value))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0, "c", "class_0", -0.5),
            (0, "c", "class_1", 0.5),
            (1, "a", "class_0", 0.1),
            (1, "a", "class_1", -0.1),
        ]
    );
    assert!(rows.iter().all(|row| row.sample == "y" && row.feature_value == 1.0));

    let top = handler.get_shap_force("y", Some(1)).unwrap();
    assert_eq!(top.len(), 2);
    assert!(top.iter().all(|row| row.feature == "c"));
}

#[test]
fn multi_class_batches_are_concatenated() {
    let mut handler = two_class_handler();
    add_two_class_batches(&mut handler);
    assert_eq!(handler.sample_names(), names(&["x", "y"]).as_slice());

    let rows = handler.get_shap_summary(None).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].feature, "c");
    assert_eq!(rows[0].class_name, "class_0");
    assert_eq!((rows[0].n_present, rows[0].n_absent), (1, 1));
    assert!((rows[0].mean_shap_present.unwrap() - (-0.5)).abs() < 1e-12);
    assert!((rows[0].mean_shap_absent.unwrap() - 0.1).abs() < 1e-12);
    assert_eq!(rows[2].feature, "a");
    assert_eq!(rows[2].n_present, 2);
    assert!((rows[2].mean_shap_present.unwrap() - 0.15).abs() < 1e-12);

    let first = handler.get_shap_force("x", Some(1)).unwrap();
    assert_eq!(first[0].feature, "a");
    assert!((first[0].shap_value - 0.2).abs() < 1e-12);
}

#[test]
fn binary_batch_after_multi_class_is_rejected() {
    let mut handler = two_class_handler();
    add_two_class_batches(&mut handler);

    let err = handler
        .add_feature_data(
            &names(&["z"]),
            array![[0.0, 1.0, 1.0]].view(),
            ShapValues::Binary(array![[0.3, 9.0, 0.2]]),
            Some(0.0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ShapError::ClassCountMismatch { stored: 2, found: 1 }
    ));
    assert_eq!(handler.n_samples(), 2);
    assert!(matches!(
        handler.get_shap_force("z", None),
        Err(ShapError::SampleNotFound(_))
    ));
}

#[test]
fn empty_handler_has_no_explanations() {
    let handler = handler();
    assert!(matches!(
        handler.get_shap_summary(None),
        Err(ShapError::NoExplanations)
    ));
}
