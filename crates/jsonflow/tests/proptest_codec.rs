use jsonflow::item::codec::{decode_sequence, encode_sequence};
use jsonflow::{AtomicValue, Item};
use proptest::prelude::*;

fn atomic() -> impl Strategy<Value = Item> {
    prop_oneof![
        any::<i64>().prop_map(Item::from),
        (-1.0e12..1.0e12f64).prop_map(Item::from),
        "[a-z0-9 ]{0,12}".prop_map(Item::from),
        any::<bool>().prop_map(Item::from),
        Just(Item::Atomic(AtomicValue::Null)),
    ]
}

fn item() -> impl Strategy<Value = Item> {
    atomic().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Item::array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(Item::object),
        ]
    })
}

// Property: the row encoding of a sequence decodes to the same items in the same order.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn prop_sequence_encoding_is_lossless(items in prop::collection::vec(item(), 0..6)) {
        let bytes = encode_sequence(&items).unwrap();
        let decoded = decode_sequence(&bytes).unwrap();
        prop_assert_eq!(decoded.items(), items.as_slice());
    }
}

// Property: a truncated encoding is rejected instead of yielding partial items.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_truncated_encoding_fails(items in prop::collection::vec(atomic(), 1..4), cut in 1usize..8) {
        let bytes = encode_sequence(&items).unwrap();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(decode_sequence(&bytes[..keep]).is_err());
    }
}
