use kira_geo_ingest::quantitation::{
    ExampleValue, GeneralType, QuantitationRules, Representation, ScaleType, StandardType,
    guess_quantitation_type,
};

#[test]
fn detection_calls_are_categorical_strings() {
    let qt = guess_quantitation_type("ABS_CALL", Some("detection call"), None);
    assert_eq!(qt.standard_type, StandardType::PresentAbsent);
    assert_eq!(qt.general_type, GeneralType::Categorical);
    assert_eq!(qt.scale, ScaleType::Other);
    assert_eq!(qt.representation, Representation::String);
    assert!(!qt.is_preferred);
}

#[test]
fn channel_background_is_flagged() {
    let qt = guess_quantitation_type("CH1B_MEDIAN", Some("channel 1 median background"), None);
    assert!(qt.is_background);
    assert!(!qt.is_background_subtracted);
    assert_eq!(qt.standard_type, StandardType::Amount);
}

#[test]
fn subtracted_foreground_is_not_background() {
    let qt = guess_quantitation_type("F635 Median - B635", None, None);
    assert!(qt.is_background_subtracted);
    assert!(!qt.is_background);
}

#[test]
fn ratio_columns() {
    let qt = guess_quantitation_type("RAT2_MEAN", None, None);
    assert!(qt.is_ratio);
    let qt = guess_quantitation_type("PM_EXCESS", Some("fold change"), None);
    assert!(!qt.is_ratio);
}

#[test]
fn coordinates_are_integers() {
    let qt = guess_quantitation_type("X_COORD", None, None);
    assert_eq!(qt.standard_type, StandardType::Coordinate);
    assert_eq!(qt.representation, Representation::Int);
}

#[test]
fn percent_names_scale_as_percent() {
    let qt = guess_quantitation_type("% > B635+2SD", None, None);
    assert_eq!(qt.scale, ScaleType::Percent);
}

#[test]
fn rma_values_are_log2_and_normalized() {
    let qt = guess_quantitation_type("VALUE", Some("RMA normalized"), None);
    assert_eq!(qt.scale, ScaleType::Log2);
    assert!(qt.is_normalized);
    assert!(qt.is_preferred);
    assert_eq!(qt.general_type, GeneralType::Quantitative);
}

#[test]
fn example_values_decide_representation() {
    let text = ExampleValue::from_raw("P");
    assert_eq!(text, ExampleValue::Text("P".to_string()));
    let qt = guess_quantitation_type("INTENSITY", None, Some(&text));
    assert_eq!(qt.representation, Representation::String);

    let count = ExampleValue::from_raw(" 42 ");
    assert_eq!(count, ExampleValue::Int(42));
    let qt = guess_quantitation_type("INTENSITY", None, Some(&count));
    assert_eq!(qt.representation, Representation::Int);

    assert_eq!(ExampleValue::from_raw("1e-3"), ExampleValue::Double(0.001));
    assert_eq!(ExampleValue::from_raw("TRUE"), ExampleValue::Boolean(true));
}

#[test]
fn probe_identifiers_are_categorical() {
    let qt = guess_quantitation_type("Probe ID", Some("probe set id"), None);
    assert_eq!(qt.general_type, GeneralType::Categorical);
    assert_eq!(qt.standard_type, StandardType::Other);
    assert_eq!(qt.scale, ScaleType::Unscaled);
}

#[test]
fn qualitative_descriptions_are_categorical() {
    let qt = guess_quantitation_type("SCORE", Some("qualitative score"), None);
    assert_eq!(qt.general_type, GeneralType::Categorical);
}

#[test]
fn builtin_rules_are_shared() {
    let first = QuantitationRules::builtin() as *const QuantitationRules;
    let second = QuantitationRules::builtin() as *const QuantitationRules;
    assert_eq!(first, second);
}
