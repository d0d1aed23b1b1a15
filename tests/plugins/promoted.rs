use sortkey::core::broker;
use sortkey::core::db;
use sortkey::core::error::SortKeyError;
use sortkey::core::position::{KeyRange, SORT_INCREMENT, ShiftDirection};
use sortkey::core::store::{Store, init_store};
use sortkey::plugins::library::{create_activity, create_folder, delete_content};
use sortkey::plugins::promoted::{
    PromotedGroup, add_group, add_promoted, delete_group, list_groups, move_group,
    move_promoted, remove_promoted, update_group,
};
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Store) {
    let tmp = tempdir().expect("tempdir");
    let store = init_store(tmp.path()).expect("init store");
    (tmp, store)
}

fn group_names(groups: &[PromotedGroup]) -> Vec<String> {
    groups.iter().map(|g| g.group_name.clone()).collect()
}

fn entry_ids(store: &Store, group_id: i64) -> Vec<i64> {
    list_groups(store, true)
        .unwrap()
        .into_iter()
        .find(|g| g.id == group_id)
        .expect("group listed")
        .entries
        .iter()
        .map(|e| e.activity_id)
        .collect()
}

fn exec(store: &Store, sql: &str, params: impl rusqlite::Params) {
    let conn = db::db_connect(&store.library_db_path().to_string_lossy(), 5).expect("connect");
    conn.execute(sql, params).expect("exec");
}

#[test]
fn groups_append_and_reorder() {
    let (_tmp, store) = setup();
    let a = add_group(&store, "Featured").unwrap();
    let b = add_group(&store, "  Science ").unwrap();
    let c = add_group(&store, "Math").unwrap();
    assert_eq!(a.sort_index, 0);
    assert_eq!(b.sort_index, SORT_INCREMENT);
    assert_eq!(b.group_name, "Science");
    assert_eq!(c.sort_index, 2 * SORT_INCREMENT);

    let moved = move_group(&store, c.id, 0).unwrap();
    assert_eq!(moved.placement.sort_index, -SORT_INCREMENT);
    assert_eq!(
        group_names(&list_groups(&store, true).unwrap()),
        vec!["Math", "Featured", "Science"]
    );

    move_group(&store, a.id, 99).unwrap();
    assert_eq!(
        group_names(&list_groups(&store, true).unwrap()),
        vec!["Math", "Science", "Featured"]
    );
}

#[test]
fn group_names_must_be_present_and_unique() {
    let (_tmp, store) = setup();
    let a = add_group(&store, "One").unwrap();
    let b = add_group(&store, "Two").unwrap();

    assert!(matches!(add_group(&store, "   ").unwrap_err(), SortKeyError::ValidationError(_)));
    assert!(matches!(add_group(&store, "One").unwrap_err(), SortKeyError::ValidationError(_)));
    assert!(matches!(
        update_group(&store, b.id, "One", false, false).unwrap_err(),
        SortKeyError::ValidationError(_)
    ));
    // keeping its own name is fine
    update_group(&store, a.id, "One", true, true).unwrap();
    assert!(matches!(
        update_group(&store, 404, "Other", false, false).unwrap_err(),
        SortKeyError::NotFound(_)
    ));
}

#[test]
fn listing_filters_unfeatured_groups() {
    let (_tmp, store) = setup();
    let a = add_group(&store, "Shown").unwrap();
    add_group(&store, "Hidden").unwrap();
    update_group(&store, a.id, "Shown", true, true).unwrap();

    let featured = list_groups(&store, false).unwrap();
    assert_eq!(group_names(&featured), vec!["Shown"]);
    assert!(featured[0].homepage);
    assert_eq!(list_groups(&store, true).unwrap().len(), 2);
}

#[test]
fn dense_groups_shift_toward_the_short_side() {
    let (_tmp, store) = setup();
    let a = add_group(&store, "a").unwrap();
    let b = add_group(&store, "b").unwrap();
    let c = add_group(&store, "c").unwrap();
    let d = add_group(&store, "d").unwrap();
    for (id, key) in [(a.id, 5), (b.id, 6), (c.id, 7)] {
        exec(
            &store,
            "UPDATE promoted_groups SET sort_index = ?1 WHERE id = ?2",
            rusqlite::params![key, id],
        );
    }

    // Without d the scope is [5, 6, 7]; position 1 is left of the middle.
    let moved = move_group(&store, d.id, 1).unwrap();
    let shift = moved.placement.shift.expect("shift expected");
    assert_eq!(shift.direction, ShiftDirection::Decrement(SORT_INCREMENT));
    assert_eq!(shift.range, KeyRange::AtMost(5));
    assert_eq!(moved.placement.shifted_rows, 1);

    let listed = list_groups(&store, true).unwrap();
    assert_eq!(group_names(&listed), vec!["a", "d", "b", "c"]);
    assert_eq!(listed[0].sort_index, 5 - SORT_INCREMENT);
    assert_eq!(listed[2].sort_index, 6);

    let events = broker::read_audit_log(&store).unwrap();
    let shift_event = events.iter().find(|e| e.op == "promoted.shift").expect("shift audited");
    assert_eq!(shift_event.detail.as_ref().unwrap()["scope"], "promoted_groups");
}

#[test]
fn entries_add_move_and_remove() {
    let (_tmp, store) = setup();
    let group = add_group(&store, "g").unwrap();
    let x = create_activity(&store, 1, None, Some("x")).unwrap();
    let y = create_activity(&store, 1, None, Some("y")).unwrap();
    let z = create_activity(&store, 2, None, Some("z")).unwrap();

    let ex = add_promoted(&store, group.id, x.id).unwrap();
    let ey = add_promoted(&store, group.id, y.id).unwrap();
    let ez = add_promoted(&store, group.id, z.id).unwrap();
    assert_eq!((ex.sort_index, ey.sort_index, ez.sort_index), (0, SORT_INCREMENT, 2 * SORT_INCREMENT));
    assert_eq!(ex.name, "x");

    let moved = move_promoted(&store, group.id, z.id, 1).unwrap();
    assert_eq!(moved.placement.sort_index, SORT_INCREMENT / 2);
    assert_eq!(entry_ids(&store, group.id), vec![x.id, z.id, y.id]);

    remove_promoted(&store, group.id, x.id).unwrap();
    assert_eq!(entry_ids(&store, group.id), vec![z.id, y.id]);
    assert!(matches!(
        remove_promoted(&store, group.id, x.id).unwrap_err(),
        SortKeyError::NotFound(_)
    ));
    assert!(matches!(
        move_promoted(&store, group.id, x.id, 0).unwrap_err(),
        SortKeyError::NotFound(_)
    ));
}

#[test]
fn entries_are_scoped_per_group() {
    let (_tmp, store) = setup();
    let g1 = add_group(&store, "g1").unwrap();
    let g2 = add_group(&store, "g2").unwrap();
    let x = create_activity(&store, 1, None, Some("x")).unwrap();
    let y = create_activity(&store, 1, None, Some("y")).unwrap();

    add_promoted(&store, g1.id, x.id).unwrap();
    add_promoted(&store, g1.id, y.id).unwrap();
    let in_g2 = add_promoted(&store, g2.id, y.id).unwrap();
    assert_eq!(in_g2.sort_index, 0);

    move_promoted(&store, g1.id, y.id, 0).unwrap();
    assert_eq!(entry_ids(&store, g1.id), vec![y.id, x.id]);
    assert_eq!(entry_ids(&store, g2.id), vec![y.id]);
}

#[test]
fn only_live_activities_can_be_promoted_once() {
    let (_tmp, store) = setup();
    let group = add_group(&store, "g").unwrap();
    let folder = create_folder(&store, 1, None, Some("f")).unwrap();
    let act = create_activity(&store, 1, None, Some("a")).unwrap();

    assert!(matches!(
        add_promoted(&store, group.id, folder.id).unwrap_err(),
        SortKeyError::ValidationError(_)
    ));
    assert!(matches!(
        add_promoted(&store, group.id, 999).unwrap_err(),
        SortKeyError::ValidationError(_)
    ));
    assert!(matches!(
        add_promoted(&store, 999, act.id).unwrap_err(),
        SortKeyError::NotFound(_)
    ));

    add_promoted(&store, group.id, act.id).unwrap();
    assert!(matches!(
        add_promoted(&store, group.id, act.id).unwrap_err(),
        SortKeyError::ValidationError(_)
    ));

    // deleted content drops out of listings
    delete_content(&store, 1, act.id).unwrap();
    assert!(entry_ids(&store, group.id).is_empty());
}

#[test]
fn deleting_a_group_removes_its_entries() {
    let (_tmp, store) = setup();
    let group = add_group(&store, "g").unwrap();
    let keep = add_group(&store, "keep").unwrap();
    let x = create_activity(&store, 1, None, Some("x")).unwrap();
    let y = create_activity(&store, 1, None, Some("y")).unwrap();
    add_promoted(&store, group.id, x.id).unwrap();
    add_promoted(&store, group.id, y.id).unwrap();
    add_promoted(&store, keep.id, x.id).unwrap();

    assert_eq!(delete_group(&store, group.id).unwrap(), 2);
    let listed = list_groups(&store, true).unwrap();
    assert_eq!(group_names(&listed), vec!["keep"]);
    assert_eq!(listed[0].entries.len(), 1);
    assert!(matches!(delete_group(&store, group.id).unwrap_err(), SortKeyError::NotFound(_)));

    // a re-created group starts a fresh entry scope
    let again = add_group(&store, "g").unwrap();
    assert_eq!(add_promoted(&store, again.id, y.id).unwrap().sort_index, 0);
}

#[test]
fn moves_index_into_the_visible_entries() {
    let (_tmp, store) = setup();
    let group = add_group(&store, "g").unwrap();
    let a = create_activity(&store, 1, None, Some("a")).unwrap();
    let x = create_activity(&store, 1, None, Some("x")).unwrap();
    let b = create_activity(&store, 1, None, Some("b")).unwrap();
    let c = create_activity(&store, 1, None, Some("c")).unwrap();
    for id in [a.id, x.id, b.id, c.id] {
        add_promoted(&store, group.id, id).unwrap();
    }

    delete_content(&store, 1, x.id).unwrap();
    assert_eq!(entry_ids(&store, group.id), vec![a.id, b.id, c.id]);

    let moved = move_promoted(&store, group.id, a.id, 1).unwrap();
    assert_eq!(moved.placement.sort_index, (2 * SORT_INCREMENT + 3 * SORT_INCREMENT) / 2);
    assert_eq!(entry_ids(&store, group.id), vec![b.id, a.id, c.id]);

    // appends still land past the hidden entry's key
    let d = create_activity(&store, 1, None, Some("d")).unwrap();
    assert_eq!(add_promoted(&store, group.id, d.id).unwrap().sort_index, 4 * SORT_INCREMENT);
    assert_eq!(entry_ids(&store, group.id), vec![b.id, a.id, c.id, d.id]);
}
