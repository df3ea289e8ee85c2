use jsonflow::item::casting::{cast_as, is_castable_as};
use jsonflow::item::json::parse_json;
use jsonflow::item::{compare_atomics, effective_boolean_value};
use jsonflow::{AtomicType, AtomicValue, ErrorCode, Item};
use rstest::rstest;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::str::FromStr;

fn s(v: &str) -> AtomicValue {
    AtomicValue::String(v.to_string())
}

#[rstest]
#[case("42", AtomicType::Integer, "42")]
#[case(" +7 ", AtomicType::Integer, "7")]
#[case("3.50", AtomicType::Decimal, "3.5")]
#[case("1e3", AtomicType::Double, "1000")]
#[case("INF", AtomicType::Double, "INF")]
#[case("true", AtomicType::Boolean, "true")]
#[case("0", AtomicType::Boolean, "false")]
#[case("null", AtomicType::Null, "null")]
#[case("2024-03-01", AtomicType::Date, "2024-03-01")]
#[case("P1Y2M", AtomicType::YearMonthDuration, "P1Y2M")]
fn cast_from_string(#[case] input: &str, #[case] target: AtomicType, #[case] expected: &str) {
    let out = cast_as(&s(input), target).unwrap();
    assert_eq!(out.string_value(), expected);
}

#[rstest]
#[case("abc", AtomicType::Integer)]
#[case("1e3", AtomicType::Decimal)]
#[case("inf", AtomicType::Double)]
#[case("yes", AtomicType::Boolean)]
#[case("P1DT2H", AtomicType::YearMonthDuration)]
fn lexical_failures_are_invalid_cast(#[case] input: &str, #[case] target: AtomicType) {
    let err = cast_as(&s(input), target).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCast);
    assert!(!is_castable_as(&s(input), target));
}

#[rstest]
fn unrelated_kinds_are_type_errors() {
    let err = cast_as(&AtomicValue::Boolean(true), AtomicType::Date).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn double_to_integer_truncates() {
    let out = cast_as(&AtomicValue::Double(3.9), AtomicType::Integer).unwrap();
    assert_eq!(out, AtomicValue::Integer(3));
    let err = cast_as(&AtomicValue::Double(f64::NAN), AtomicType::Integer).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCast);
}

#[rstest]
fn date_time_to_date_keeps_the_local_day() {
    let dt = cast_as(&s("2024-03-01T23:30:00"), AtomicType::DateTime).unwrap();
    let date = cast_as(&dt, AtomicType::Date).unwrap();
    assert_eq!(date.string_value(), "2024-03-01");
}

#[rstest]
fn anything_casts_to_string() {
    let out = cast_as(&AtomicValue::Integer(-12), AtomicType::String).unwrap();
    assert_eq!(out, s("-12"));
    let out = cast_as(&AtomicValue::Double(2.0), AtomicType::String).unwrap();
    assert_eq!(out, s("2"));
}

#[rstest]
fn json_preserves_member_order_and_number_kinds() {
    let item = parse_json(r#"{"b": 1, "a": [1.5, null, 2e2], "c": "x"}"#).unwrap();
    let map = item.as_object().unwrap();
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    assert_eq!(keys, ["b", "a", "c"]);
    assert_eq!(map["b"], Item::from(1_i64));
    let members = map["a"].as_array().unwrap();
    assert_eq!(members[0].type_name(), "decimal");
    assert_eq!(members[1], Item::null());
    assert_eq!(members[2].type_name(), "double");
}

#[rstest]
#[case::exponent("2e2", AtomicValue::Double(200.0))]
#[case::upper_exponent("1.5E-1", AtomicValue::Double(0.15))]
#[case::integer("-42", AtomicValue::Integer(-42))]
#[case::fraction("2.50", AtomicValue::Decimal(Decimal::from_str("2.50").unwrap()))]
#[case::long_fraction(
    "1.0000000000000000000001",
    AtomicValue::Decimal(Decimal::from_str("1.0000000000000000000001").unwrap())
)]
#[case::beyond_i64("9223372036854775808", AtomicValue::Decimal(Decimal::from_str("9223372036854775808").unwrap()))]
fn json_numbers_take_the_kind_of_their_literal(#[case] text: &str, #[case] expected: AtomicValue) {
    assert_eq!(parse_json(text).unwrap(), Item::Atomic(expected));
}

#[rstest]
fn long_json_decimals_keep_every_digit() {
    let item = parse_json("[1.0000000000000000000001]").unwrap();
    let members = item.as_array().unwrap();
    assert_eq!(members[0].type_name(), "decimal");
    let Item::Atomic(value) = &members[0] else {
        panic!("expected an atomic member, got {:?}", members[0]);
    };
    assert_eq!(value.string_value(), "1.0000000000000000000001");
    assert_ne!(*value, AtomicValue::Decimal(Decimal::ONE));
}

#[rstest]
fn malformed_json_is_reported() {
    let err = parse_json("{\"a\": ").unwrap_err();
    assert_eq!(err.code, ErrorCode::JsonParse);
}

#[rstest]
fn null_sorts_before_everything() {
    assert_eq!(compare_atomics(&AtomicValue::Null, &s("")).unwrap(), Ordering::Less);
    assert_eq!(compare_atomics(&AtomicValue::Integer(1), &AtomicValue::Null).unwrap(), Ordering::Greater);
}

#[rstest]
fn numbers_compare_across_kinds() {
    assert_eq!(
        compare_atomics(&AtomicValue::Integer(2), &AtomicValue::Double(2.5)).unwrap(),
        Ordering::Less
    );
    let err = compare_atomics(&AtomicValue::Integer(2), &s("2")).unwrap_err();
    assert_eq!(err.code, ErrorCode::Type);
}

#[rstest]
fn effective_boolean_values() {
    assert!(!effective_boolean_value(&[]).unwrap());
    assert!(effective_boolean_value(&[Item::array(vec![])]).unwrap());
    assert!(!effective_boolean_value(&[Item::from("")]).unwrap());
    assert!(effective_boolean_value(&[Item::from(3_i64)]).unwrap());
    assert!(effective_boolean_value(&[Item::from(1_i64), Item::from(2_i64)]).is_err());
}
