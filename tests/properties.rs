//! Property tests for the fold pipeline

use proptest::prelude::*;
use xformat::{FieldDescriptor, SettingsTable, XContext};

proptest! {
    #[test]
    fn create_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let ctx = XContext::default();
        let a = ctx.create(&data).unwrap();
        let b = ctx.create(&data).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn output_is_padded_to_blocks(
        data in proptest::collection::vec(any::<u8>(), 0..100),
        last in prop::sample::select(vec![8u16, 16, 24, 32]),
    ) {
        let field = FieldDescriptor::new([8, 8, 8, 8, last]).unwrap();
        let block = field.block_size_bytes();
        let ctx = XContext::new(field, 1024);
        let folded = ctx.create(&data).unwrap();
        prop_assert_eq!(folded.len() % block, 0);
        prop_assert!(folded.len() >= data.len());
        prop_assert!(folded.len() < data.len() + block || data.is_empty());
    }

    #[test]
    fn earlier_outputs_never_change(
        first in proptest::collection::vec(any::<u8>(), 1..32),
        later in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 0..8),
    ) {
        let ctx = XContext::default();
        let before = ctx.create(&first).unwrap();
        for item in &later {
            ctx.create(item).unwrap();
        }
        prop_assert_eq!(ctx.create(&first).unwrap(), before);
    }

    #[test]
    fn settings_hold_the_last_value(values in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = XContext::default();
        let table = SettingsTable::new(ctx.clone(), dir.path());
        for value in &values {
            table.update("p", b"key", [value.as_bytes()]).unwrap();
        }
        let rows = table.read("p").unwrap();
        prop_assert_eq!(rows.len(), 1);
        let last = values.last().unwrap().as_bytes();
        let expected = ctx.output(&ctx.create(last).unwrap()).unwrap();
        prop_assert_eq!(&rows[0].values, &vec![expected]);
    }
}
