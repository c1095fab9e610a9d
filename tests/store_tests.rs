//! Conversation and settings stores on disk

use std::fs;
use std::sync::Arc;
use std::thread;
use xformat::{
    load_session, save_session, ConversationTable, ErrorKind, FieldDescriptor, SettingsTable,
    XContext, XError,
};

fn light(ctx: &XContext, raw: &[u8]) -> Vec<u8> {
    ctx.output(&ctx.create(raw).unwrap()).unwrap()
}

#[test]
fn conversation_rows_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    let table = ConversationTable::new(ctx.clone(), dir.path());

    table.insert("journal", b"2024-01-01", b"", b"greet", b"hi").unwrap();
    let first = table.read("journal").unwrap().rows().unwrap();
    table.insert_now("journal", b"photo.png", b"share", b"look at this").unwrap();
    let both = table.read("journal").unwrap().rows().unwrap();

    assert_eq!(both.len(), 2);
    assert_eq!(both[0], first[0]);
    assert_eq!(both[1].attachment, light(&ctx, b"photo.png"));
    assert_eq!(both[1].purpose, light(&ctx, b"share"));
}

#[test]
fn concurrent_appends_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let table = Arc::new(ConversationTable::new(XContext::default(), dir.path()));

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..10u8 {
                    table.insert("shared", &[t], &[i], b"p", b"sentence").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len("shared").unwrap(), 40);
}

#[test]
fn truncated_conversation_store_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let table = ConversationTable::new(XContext::default(), dir.path());
    table.insert("journal", b"t", b"a", b"p", b"first").unwrap();
    table.insert("journal", b"t", b"a", b"p", b"second").unwrap();

    let path = table.path("journal");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let log = table.read("journal").unwrap();
    let results: Vec<_> = log.iter().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert!(matches!(err, XError::Corrupt { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn store_written_with_other_widths_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let narrow = ConversationTable::new(XContext::default(), dir.path());
    narrow.insert("journal", b"t", b"a", b"p", b"s").unwrap();

    let wide_ctx = XContext::new(FieldDescriptor::new([8, 8, 8, 8, 32]).unwrap(), 1024);
    let wide = ConversationTable::new(wide_ctx, dir.path());
    assert!(matches!(wide.read("journal"), Err(XError::DescriptorMismatch { .. })));
    assert!(wide.insert("journal", b"t", b"a", b"p", b"s").is_err());
    assert_eq!(narrow.len("journal").unwrap(), 1);
}

#[test]
fn settings_upsert_keeps_one_row_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    let table = SettingsTable::new(ctx.clone(), dir.path());

    table.update("creator", b"theme", [b"dark"]).unwrap();
    table.update("creator", b"theme", [b"light"]).unwrap();

    let rows = table.read("creator").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values, vec![light(&ctx, b"light")]);
    // no temp files left next to the store
    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(names.iter().all(|n| n == "creator.x" || n == "creator.x.lock"), "{names:?}");
}

#[test]
fn settings_survive_a_new_table_handle() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    SettingsTable::new(ctx.clone(), dir.path())
        .update("prefs", b"lang", [b"en"])
        .unwrap();

    let reopened = SettingsTable::new(ctx.clone(), dir.path());
    assert_eq!(reopened.get("prefs", b"lang").unwrap(), vec![light(&ctx, b"en")]);
}

#[test]
fn missing_stores_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    let chat = ConversationTable::new(ctx.clone(), dir.path());
    let settings = SettingsTable::new(ctx, dir.path());

    assert_eq!(chat.read("none").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(settings.read("none").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(settings.find_prefix("none", b"a").unwrap_err().kind(), ErrorKind::NotFound);
    // failed reads leave no lock files behind
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn ids_cannot_escape_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ConversationTable::new(XContext::default(), dir.path());
    let err = chat.insert("../outside", b"t", b"a", b"p", b"s").unwrap_err();
    assert!(matches!(err, XError::InvalidStoreId { .. }));
}

#[test]
fn stores_cannot_take_the_session_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    ctx.create(b"abc").unwrap();
    save_session(&ctx, dir.path()).unwrap();

    let chat = ConversationTable::new(ctx.clone(), dir.path());
    let err = chat.insert_now("session", b"", b"", b"hello").unwrap_err();
    assert!(matches!(err, XError::InvalidStoreId { .. }));
    let settings = SettingsTable::new(ctx.clone(), dir.path());
    let err = settings.update("session.x", b"k", [b"v"]).unwrap_err();
    assert!(matches!(err, XError::InvalidStoreId { .. }));

    let fresh = XContext::default();
    assert!(load_session(&fresh, dir.path()).unwrap());
    assert_eq!(fresh.snapshot(), ctx.snapshot());
}

#[test]
fn settings_keys_match_on_their_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = XContext::default();
    let settings = SettingsTable::new(ctx.clone(), dir.path());
    settings.update("prefs", &[1u8][..], [b"one"]).unwrap();
    settings.update("prefs", &[188u8][..], [b"other"]).unwrap();
    settings.update("prefs", &[1u8][..], [b"uno"]).unwrap();

    let rows = settings.read("prefs").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(settings.get("prefs", &[1u8][..]).unwrap(), vec![light(&ctx, b"uno")]);
    assert_eq!(settings.get("prefs", &[188u8][..]).unwrap(), vec![light(&ctx, b"other")]);
}
