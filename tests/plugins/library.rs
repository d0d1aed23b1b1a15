use sortkey::core::broker;
use sortkey::core::db;
use sortkey::core::error::SortKeyError;
use sortkey::core::position::{KeyRange, SORT_INCREMENT, ShiftDirection};
use sortkey::core::store::{Store, init_store};
use sortkey::plugins::library::{
    ContentItem, create_activity, create_folder, delete_content, get_content, list_folder,
    move_content,
};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Store) {
    let tmp = tempdir().expect("tempdir");
    let store = init_store(tmp.path()).expect("init store");
    (tmp, store)
}

fn names(items: &[ContentItem]) -> Vec<String> {
    items.iter().map(|i| i.name.clone()).collect()
}

fn set_sort_index(store: &Store, id: i64, sort_index: i64) {
    let conn = db::db_connect(&store.library_db_path().to_string_lossy(), 5).expect("connect");
    conn.execute(
        "UPDATE content SET sort_index = ?1 WHERE id = ?2",
        rusqlite::params![sort_index, id],
    )
    .expect("set sort_index");
}

#[test]
fn new_items_append_in_increments() {
    let (_tmp, store) = setup();
    let a = create_activity(&store, 1, None, Some("a")).unwrap();
    let b = create_folder(&store, 1, None, Some("b")).unwrap();
    let c = create_activity(&store, 1, None, None).unwrap();

    assert_eq!(a.sort_index, 0);
    assert_eq!(b.sort_index, SORT_INCREMENT);
    assert_eq!(c.sort_index, 2 * SORT_INCREMENT);
    assert!(b.is_folder);
    assert_eq!(c.name, "Untitled Activity");

    let listed = list_folder(&store, 1, None).unwrap();
    assert_eq!(names(&listed), vec!["a", "b", "Untitled Activity"]);
}

#[test]
fn owners_have_separate_scopes() {
    let (_tmp, store) = setup();
    create_activity(&store, 1, None, Some("mine")).unwrap();
    let theirs = create_activity(&store, 2, None, Some("theirs")).unwrap();
    assert_eq!(theirs.sort_index, 0);
    assert_eq!(names(&list_folder(&store, 2, None).unwrap()), vec!["theirs"]);
}

#[test]
fn create_under_missing_or_foreign_parent_fails() {
    let (_tmp, store) = setup();
    let err = create_activity(&store, 1, Some(99), None).unwrap_err();
    assert!(matches!(err, SortKeyError::NotFound(_)));

    let folder = create_folder(&store, 1, None, None).unwrap();
    let err = create_activity(&store, 2, Some(folder.id), None).unwrap_err();
    assert!(matches!(err, SortKeyError::NotFound(_)));

    let activity = create_activity(&store, 1, None, None).unwrap();
    let err = create_activity(&store, 1, Some(activity.id), None).unwrap_err();
    assert!(matches!(err, SortKeyError::ValidationError(_)));
}

#[test]
fn reorder_within_folder() {
    let (_tmp, store) = setup();
    let a = create_activity(&store, 1, None, Some("a")).unwrap();
    let b = create_activity(&store, 1, None, Some("b")).unwrap();
    let c = create_activity(&store, 1, None, Some("c")).unwrap();

    let moved = move_content(&store, 1, c.id, None, 0).unwrap();
    assert_eq!(moved.placement.sort_index, a.sort_index - SORT_INCREMENT);
    assert_eq!(moved.placement.shift, None);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["c", "a", "b"]);

    // c is excluded from the scope, so index 1 sits between a and b
    let moved = move_content(&store, 1, c.id, None, 1).unwrap();
    assert_eq!(moved.placement.sort_index, (a.sort_index + b.sort_index) / 2);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["a", "c", "b"]);

    let moved = move_content(&store, 1, a.id, None, 10).unwrap();
    assert_eq!(moved.placement.sort_index, b.sort_index + SORT_INCREMENT);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["c", "b", "a"]);
}

#[test]
fn moving_to_current_position_keeps_order() {
    let (_tmp, store) = setup();
    for n in ["a", "b", "c", "d"] {
        create_activity(&store, 1, None, Some(n)).unwrap();
    }
    let before = list_folder(&store, 1, None).unwrap();
    for (i, item) in before.iter().enumerate() {
        move_content(&store, 1, item.id, None, i as i64).unwrap();
        assert_eq!(names(&list_folder(&store, 1, None).unwrap()), names(&before));
    }
}

#[test]
fn dense_neighbours_trigger_persisted_shift() {
    let (_tmp, store) = setup();
    let a = create_activity(&store, 1, None, Some("a")).unwrap();
    let b = create_activity(&store, 1, None, Some("b")).unwrap();
    let c = create_activity(&store, 1, None, Some("c")).unwrap();
    set_sort_index(&store, a.id, 10);
    set_sort_index(&store, b.id, 11);

    let moved = move_content(&store, 1, c.id, None, 1).unwrap();
    let shift = moved.placement.shift.expect("shift expected");
    assert_eq!(shift.direction, ShiftDirection::Increment(SORT_INCREMENT));
    assert_eq!(shift.range, KeyRange::AtLeast(11));
    assert_eq!(moved.placement.shifted_rows, 1);

    let listed = list_folder(&store, 1, None).unwrap();
    assert_eq!(names(&listed), vec!["a", "c", "b"]);
    assert_eq!(listed[0].sort_index, 10);
    assert_eq!(listed[2].sort_index, 11 + SORT_INCREMENT);

    let events = broker::read_audit_log(&store).unwrap();
    let shift_event = events
        .iter()
        .find(|e| e.op == "library.shift")
        .expect("shift audited");
    let detail = shift_event.detail.as_ref().unwrap();
    assert_eq!(detail["rows"], 1);
    assert_eq!(detail["scope"], "content(owner=1,parent=root)");
    let move_event = events.iter().find(|e| e.op == "library.move").unwrap();
    assert_eq!(move_event.intent_ref, shift_event.intent_ref);
}

#[test]
fn move_between_folders() {
    let (_tmp, store) = setup();
    let folder = create_folder(&store, 1, None, Some("f")).unwrap();
    let inner = create_activity(&store, 1, Some(folder.id), Some("inner")).unwrap();
    let outer = create_activity(&store, 1, None, Some("outer")).unwrap();

    let moved = move_content(&store, 1, outer.id, Some(folder.id), 0).unwrap();
    assert_eq!(moved.parent_folder_id, Some(folder.id));
    assert_eq!(moved.placement.sort_index, inner.sort_index - SORT_INCREMENT);

    assert_eq!(names(&list_folder(&store, 1, Some(folder.id)).unwrap()), vec!["outer", "inner"]);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["f"]);

    let back = move_content(&store, 1, outer.id, None, 5).unwrap();
    assert_eq!(back.parent_folder_id, None);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["f", "outer"]);
}

#[test]
fn folder_cannot_move_into_itself_or_descendant() {
    let (_tmp, store) = setup();
    let top = create_folder(&store, 1, None, Some("top")).unwrap();
    let mid = create_folder(&store, 1, Some(top.id), Some("mid")).unwrap();
    let leaf = create_folder(&store, 1, Some(mid.id), Some("leaf")).unwrap();

    for target in [top.id, mid.id, leaf.id] {
        let err = move_content(&store, 1, top.id, Some(target), 0).unwrap_err();
        assert!(matches!(err, SortKeyError::ValidationError(_)), "target {target}");
    }
    // unchanged
    assert_eq!(get_content(&store, 1, top.id).unwrap().unwrap().parent_folder_id, None);

    // moving a leaf upward is fine
    move_content(&store, 1, leaf.id, None, 0).unwrap();
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["leaf", "top"]);
}

#[test]
fn move_of_unknown_item_is_not_found() {
    let (_tmp, store) = setup();
    let err = move_content(&store, 1, 42, None, 0).unwrap_err();
    assert!(matches!(err, SortKeyError::NotFound(_)));

    let mine = create_activity(&store, 1, None, None).unwrap();
    let err = move_content(&store, 2, mine.id, None, 0).unwrap_err();
    assert!(matches!(err, SortKeyError::NotFound(_)));
}

#[test]
fn deleted_items_leave_the_scope() {
    let (_tmp, store) = setup();
    let folder = create_folder(&store, 1, None, Some("f")).unwrap();
    let sub = create_folder(&store, 1, Some(folder.id), Some("sub")).unwrap();
    create_activity(&store, 1, Some(sub.id), Some("deep")).unwrap();
    let a = create_activity(&store, 1, None, Some("a")).unwrap();

    assert_eq!(delete_content(&store, 1, folder.id).unwrap(), 3);
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["a"]);
    assert!(get_content(&store, 1, sub.id).unwrap().is_none());

    // new items still append past the deleted folder's key
    let b = create_activity(&store, 1, None, Some("b")).unwrap();
    assert!(b.sort_index > a.sort_index);

    let err = create_activity(&store, 1, Some(folder.id), None).unwrap_err();
    assert!(matches!(err, SortKeyError::NotFound(_)));
}

#[test]
fn concurrent_moves_keep_keys_unique() {
    let (_tmp, store) = setup();
    let mut ids = Vec::new();
    for i in 0..12 {
        ids.push(create_activity(&store, 1, None, Some(&format!("item{i}"))).unwrap().id);
    }

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    std::thread::scope(|s| {
        for w in 0..workers {
            let barrier = Arc::clone(&barrier);
            let store = store.clone();
            let ids = ids.clone();
            s.spawn(move || {
                barrier.wait();
                for round in 0..10 {
                    let id = ids[(w * 7 + round * 3) % ids.len()];
                    // Everyone aims at the same few slots to force collisions.
                    let position = ((w + round) % 3) as i64;
                    move_content(&store, 1, id, None, position).expect("concurrent move");
                }
            });
        }
    });

    let listed = list_folder(&store, 1, None).unwrap();
    assert_eq!(listed.len(), ids.len());
    let keys: HashSet<i64> = listed.iter().map(|i| i.sort_index).collect();
    assert_eq!(keys.len(), ids.len(), "duplicate keys: {listed:?}");
    assert!(listed.windows(2).all(|w| w[0].sort_index < w[1].sort_index));
}

#[test]
fn committed_changes_survive_an_unwritable_audit_log() {
    let (_tmp, store) = setup();
    let audit_path = store.audit_log_path();
    std::fs::remove_file(&audit_path).expect("init wrote the audit log");
    std::fs::create_dir(&audit_path).expect("block the audit log");

    let a = create_activity(&store, 1, None, Some("a")).unwrap();
    let b = create_activity(&store, 1, None, Some("b")).unwrap();
    let c = create_activity(&store, 1, None, Some("c")).unwrap();
    set_sort_index(&store, a.id, 10);
    set_sort_index(&store, b.id, 11);

    // needs a shift, so both the move event and the shift record fail to write
    let moved = move_content(&store, 1, c.id, None, 1).unwrap();
    assert!(moved.placement.shift.is_some());
    assert_eq!(names(&list_folder(&store, 1, None).unwrap()), vec!["a", "c", "b"]);
}
