use orgcode_core::db::open_db_in_memory;
use orgcode_core::{
    AuditStamp, OrgCode, OrgErrorKind, OrgId, OrgNode, OrgNodeFields, OrgRepository, OrgService,
    OrgServiceError, SqliteOrgRepository, TimeOrderedIdSource, ROOT_PARENT_ID,
};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet};

type Service<'conn> = OrgService<SqliteOrgRepository<'conn>, TimeOrderedIdSource>;

const ACTOR: i64 = 7;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> Service<'_> {
    OrgService::new(
        SqliteOrgRepository::try_new(conn).unwrap(),
        TimeOrderedIdSource::new(),
    )
}

fn stamp() -> AuditStamp {
    AuditStamp::at(ACTOR, 1_000)
}

fn create(service: &Service<'_>, parent_id: OrgId, name: &str) -> OrgNode {
    service
        .create_node(parent_id, OrgNodeFields::named(name), &stamp())
        .unwrap()
}

fn code(value: &str) -> OrgCode {
    OrgCode::parse(value).unwrap()
}

/// All rows, tombstones included, keyed by id.
fn all_codes(conn: &Connection) -> BTreeMap<OrgId, String> {
    let mut stmt = conn.prepare("SELECT id, code FROM org_nodes;").unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut codes = BTreeMap::new();
    while let Some(row) = rows.next().unwrap() {
        codes.insert(row.get(0).unwrap(), row.get(1).unwrap());
    }
    codes
}

fn assert_hierarchy_invariants(conn: &Connection) {
    let mut stmt = conn
        .prepare("SELECT id, parent_id, code FROM org_nodes;")
        .unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut by_code: HashMap<String, OrgId> = HashMap::new();
    let mut nodes = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        let id: OrgId = row.get(0).unwrap();
        let parent_id: OrgId = row.get(1).unwrap();
        let code: String = row.get(2).unwrap();
        assert!(!code.is_empty() && code.len() % 4 == 0, "bad code length {code}");
        assert!(by_code.insert(code.clone(), id).is_none(), "duplicate code {code}");
        nodes.push((id, parent_id, code));
    }

    for (id, parent_id, code) in &nodes {
        if *parent_id == ROOT_PARENT_ID {
            assert_eq!(code.len(), 4, "root {id} must have one segment");
            continue;
        }
        let parent_code = &code[..code.len() - 4];
        assert_eq!(
            by_code.get(parent_code),
            Some(parent_id),
            "node {id} with code {code} does not match parent {parent_id}"
        );
    }

    let mut sibling_segments: HashMap<OrgId, HashSet<String>> = HashMap::new();
    for (_, parent_id, code) in &nodes {
        let segment = code[code.len() - 4..].to_string();
        assert!(
            sibling_segments.entry(*parent_id).or_default().insert(segment),
            "duplicate sibling segment under {parent_id}"
        );
    }
}

#[test]
fn scenario_a_sibling_codes_increase_from_0001() {
    let conn = setup();
    let service = service(&conn);

    let root = create(&service, ROOT_PARENT_ID, "A");
    let first = create(&service, root.id, "A1");
    let second = create(&service, root.id, "A2");

    assert_eq!(root.code, code("0001"));
    assert_eq!(first.code, code("00010001"));
    assert_eq!(second.code, code("00010002"));
    assert_eq!(first.parent_id, root.id);
    assert_eq!(first.created_by, ACTOR);
    assert_eq!(first.updated_at, 1_000);
    assert_hierarchy_invariants(&conn);
}

#[test]
fn independent_roots_number_their_own_first_segment() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let d = create(&service, ROOT_PARENT_ID, "D");
    let d_child = create(&service, d.id, "D1");

    assert_eq!(a.code, code("0001"));
    assert_eq!(d.code, code("0002"));
    assert_eq!(d_child.code, code("00020001"));

    let roots = service.list_roots().unwrap();
    let root_ids: Vec<_> = roots.iter().map(|node| node.id).collect();
    assert_eq!(root_ids, vec![a.id, d.id]);
}

#[test]
fn generate_code_previews_without_writing() {
    let conn = setup();
    let service = service(&conn);

    assert_eq!(service.generate_code(ROOT_PARENT_ID).unwrap(), code("0001"));
    let root = create(&service, ROOT_PARENT_ID, "A");
    assert_eq!(service.generate_code(root.id).unwrap(), code("00010001"));
    assert_eq!(service.generate_code(root.id).unwrap(), code("00010001"));
    assert_eq!(service.generate_code(ROOT_PARENT_ID).unwrap(), code("0002"));
    assert_eq!(all_codes(&conn).len(), 1);

    let err = service.generate_code(424_242).unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(424_242)));
}

#[test]
fn create_under_unknown_parent_writes_nothing() {
    let conn = setup();
    let service = service(&conn);

    let err = service
        .create_node(99, OrgNodeFields::named("orphan"), &stamp())
        .unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(99)));
    assert_eq!(err.kind(), OrgErrorKind::NotFound);
    assert!(all_codes(&conn).is_empty());
}

#[test]
fn create_rejects_blank_name_and_normalizes_optional_fields() {
    let conn = setup();
    let service = service(&conn);

    let err = service
        .create_node(ROOT_PARENT_ID, OrgNodeFields::named("   "), &stamp())
        .unwrap_err();
    assert!(matches!(err, OrgServiceError::InvalidName));

    let node = service
        .create_node(
            ROOT_PARENT_ID,
            OrgNodeFields {
                name: "  Finance Group ".to_string(),
                name_abbr: Some(" FG ".to_string()),
                comment: Some("   ".to_string()),
            },
            &stamp(),
        )
        .unwrap();
    assert_eq!(node.name, "Finance Group");
    assert_eq!(node.name_abbr.as_deref(), Some("FG"));
    assert_eq!(node.comment, None);
}

#[test]
fn scenario_b_move_rewrites_whole_subtree() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let c = create(&service, b.id, "C");
    let d = create(&service, ROOT_PARENT_ID, "D");
    let before = all_codes(&conn);

    let later = AuditStamp::at(11, 5_000);
    assert!(service.move_node(b.id, d.id, &later).unwrap());

    let b_after = service.get_node(b.id).unwrap();
    let c_after = service.get_node(c.id).unwrap();
    assert_eq!(b_after.code, code("00020001"));
    assert_eq!(b_after.parent_id, d.id);
    assert_eq!(c_after.code, code("000200010001"));
    assert_eq!(c_after.parent_id, b.id);
    assert_eq!(c_after.updated_by, 11);
    assert_eq!(c_after.updated_at, 5_000);

    let after = all_codes(&conn);
    assert_eq!(after[&a.id], before[&a.id]);
    assert_eq!(after[&d.id], before[&d.id]);
    assert_hierarchy_invariants(&conn);

    let a_after = service.get_node(a.id).unwrap();
    assert_eq!(a_after.updated_at, 1_000);
}

#[test]
fn move_rewrite_is_complete_and_touches_nothing_else() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let x = create(&service, a.id, "X");
    let x1 = create(&service, x.id, "X1");
    let x2 = create(&service, x.id, "X2");
    let x21 = create(&service, x2.id, "X21");
    let sibling = create(&service, a.id, "Sibling");
    let sibling_child = create(&service, sibling.id, "SiblingChild");
    let target = create(&service, ROOT_PARENT_ID, "Target");
    let _occupied = create(&service, target.id, "Occupied");

    let before = all_codes(&conn);
    let old_prefix = before[&x.id].clone();

    service.move_node(x.id, target.id, &stamp()).unwrap();

    let after = all_codes(&conn);
    let new_prefix = after[&x.id].clone();
    assert_eq!(new_prefix, "00020002");

    let subtree = [x1.id, x2.id, x21.id];
    for id in subtree {
        let expected = format!("{new_prefix}{}", &before[&id][old_prefix.len()..]);
        assert_eq!(after[&id], expected);
    }
    for (id, old_code) in &before {
        if *id == x.id || subtree.contains(id) {
            continue;
        }
        assert_eq!(&after[id], old_code, "node {id} must not change");
    }
    assert_eq!(after[&sibling_child.id], "000100020001");
    assert_hierarchy_invariants(&conn);
}

#[test]
fn move_to_root_opens_next_top_level_code() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let c = create(&service, b.id, "C");
    let _d = create(&service, ROOT_PARENT_ID, "D");

    service.move_node(b.id, ROOT_PARENT_ID, &stamp()).unwrap();

    let b_after = service.get_node(b.id).unwrap();
    assert_eq!(b_after.code, code("0003"));
    assert!(b_after.is_root());
    assert_eq!(service.get_node(c.id).unwrap().code, code("00030001"));
    assert_hierarchy_invariants(&conn);
}

#[test]
fn move_to_same_parent_is_a_no_op() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let _c = create(&service, b.id, "C");
    let before = all_codes(&conn);

    let moved = service
        .move_node(b.id, a.id, &AuditStamp::at(99, 9_999))
        .unwrap();
    assert!(!moved);
    assert_eq!(all_codes(&conn), before);
    let b_after = service.get_node(b.id).unwrap();
    assert_eq!(b_after.updated_by, ACTOR);
    assert_eq!(b_after.updated_at, 1_000);

    assert!(!service.move_node(a.id, ROOT_PARENT_ID, &stamp()).unwrap());
    assert_eq!(all_codes(&conn), before);
}

#[test]
fn scenario_c_move_under_own_descendant_is_cyclic() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let c = create(&service, b.id, "C");
    let before = all_codes(&conn);

    for descendant in [b.id, c.id] {
        let err = service.move_node(a.id, descendant, &stamp()).unwrap_err();
        assert!(matches!(
            err,
            OrgServiceError::CyclicMove { node_id, parent_id }
                if node_id == a.id && parent_id == descendant
        ));
        assert_eq!(err.kind(), OrgErrorKind::CyclicMove);
    }
    assert_eq!(all_codes(&conn), before);
}

#[test]
fn sibling_with_shared_code_prefix_text_is_not_a_descendant() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let c = create(&service, a.id, "C");

    // 00010002 does not start with 00010001, so this is a legal move.
    assert!(service.move_node(b.id, c.id, &stamp()).unwrap());
    assert_eq!(service.get_node(b.id).unwrap().code, code("000100020001"));
    assert_hierarchy_invariants(&conn);
}

#[test]
fn move_rejects_self_parent_and_unknown_targets() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");

    let err = service.move_node(b.id, b.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::SelfParent(id) if id == b.id));
    assert_eq!(err.kind(), OrgErrorKind::SelfParent);

    let err = service.move_node(b.id, 123, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(123)));

    let err = service.move_node(456, a.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::NodeNotFound(456)));
}

#[test]
fn scenario_d_delete_guard_and_leaf_delete() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");

    let err = service.delete_node(a.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::HasChildren(id) if id == a.id));
    assert_eq!(err.kind(), OrgErrorKind::HasChildren);

    service.delete_node(b.id, &stamp()).unwrap();
    let trees = service.get_all_trees().unwrap();
    assert_eq!(trees.len(), 1);
    assert!(trees[0].find(b.id).is_none());
    assert!(matches!(
        service.get_node(b.id).unwrap_err(),
        OrgServiceError::NodeNotFound(id) if id == b.id
    ));

    let err = service.delete_node(b.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::NodeNotFound(id) if id == b.id));

    service.delete_node(a.id, &stamp()).unwrap();
    assert!(service.get_all_trees().unwrap().is_empty());
}

#[test]
fn deleted_codes_are_never_reused() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let _first = create(&service, a.id, "first");
    let second = create(&service, a.id, "second");
    service.delete_node(second.id, &stamp()).unwrap();

    let third = create(&service, a.id, "third");
    assert_eq!(third.code, code("00010003"));

    service.delete_node(a.id, &stamp()).unwrap_err();
    assert_hierarchy_invariants(&conn);
}

#[test]
fn deleted_parent_cannot_receive_children_or_moves() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let gone = create(&service, ROOT_PARENT_ID, "Gone");
    service.delete_node(gone.id, &stamp()).unwrap();

    let err = service
        .create_node(gone.id, OrgNodeFields::named("x"), &stamp())
        .unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(id) if id == gone.id));

    let err = service.move_node(a.id, gone.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(id) if id == gone.id));

    let err = service.list_children(gone.id).unwrap_err();
    assert!(matches!(err, OrgServiceError::ParentNotFound(id) if id == gone.id));
}

#[test]
fn move_carries_tombstoned_descendants_along() {
    let conn = setup();
    let service = service(&conn);
    let repo = SqliteOrgRepository::try_new(&conn).unwrap();

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let removed = create(&service, b.id, "removed");
    service.delete_node(removed.id, &stamp()).unwrap();
    let d = create(&service, ROOT_PARENT_ID, "D");

    service.move_node(b.id, d.id, &stamp()).unwrap();

    let removed_after = repo.get_node(removed.id, true).unwrap().unwrap();
    assert!(removed_after.is_deleted);
    assert_eq!(removed_after.code, code("000200010001"));

    // The tombstone still reserves its slot under the moved node.
    let next = create(&service, b.id, "next");
    assert_eq!(next.code, code("000200010002"));
    assert_hierarchy_invariants(&conn);
}

#[test]
fn move_rolls_back_when_descendant_rewrite_fails() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let _c = create(&service, b.id, "C");
    let poisoned = create(&service, b.id, "poisoned");
    let d = create(&service, ROOT_PARENT_ID, "D");
    let before = all_codes(&conn);

    conn.execute_batch(&format!(
        "CREATE TRIGGER org_nodes_fail_code_rewrite_test
         BEFORE UPDATE OF code ON org_nodes
         WHEN NEW.id = {}
         BEGIN
             SELECT RAISE(ABORT, 'forced rewrite failure');
         END;",
        poisoned.id
    ))
    .unwrap();

    let err = service.move_node(b.id, d.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::Storage(_)));
    assert_eq!(err.kind(), OrgErrorKind::StorageFailure);

    assert_eq!(all_codes(&conn), before);
    assert_eq!(service.get_node(b.id).unwrap().parent_id, a.id);

    conn.execute_batch("DROP TRIGGER org_nodes_fail_code_rewrite_test;")
        .unwrap();
    assert!(service.move_node(b.id, d.id, &stamp()).unwrap());
    assert_hierarchy_invariants(&conn);
}

#[test]
fn capacity_exhaustion_rejects_create_and_move() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let loose = create(&service, ROOT_PARENT_ID, "Loose");
    conn.execute(
        "INSERT INTO org_nodes (
            id, code, parent_id, name, is_deleted,
            created_by, created_at, updated_by, updated_at
        ) VALUES (?1, '00019999', ?2, 'last slot', 0, 1, 0, 1, 0);",
        rusqlite::params![1_i64, a.id],
    )
    .unwrap();

    let err = service
        .create_node(a.id, OrgNodeFields::named("overflow"), &stamp())
        .unwrap_err();
    assert!(matches!(err, OrgServiceError::CapacityExceeded { parent_id } if parent_id == a.id));
    assert_eq!(err.kind(), OrgErrorKind::CapacityExceeded);

    let before = all_codes(&conn);
    let err = service.move_node(loose.id, a.id, &stamp()).unwrap_err();
    assert!(matches!(err, OrgServiceError::CapacityExceeded { .. }));
    assert_eq!(all_codes(&conn), before);
}

#[test]
fn update_node_changes_fields_but_not_position() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");

    let updated = service
        .update_node(
            b.id,
            OrgNodeFields {
                name: " Treasury ".to_string(),
                name_abbr: Some("TRS".to_string()),
                comment: Some("regional desk".to_string()),
            },
            &AuditStamp::at(3, 2_000),
        )
        .unwrap();
    assert_eq!(updated.name, "Treasury");
    assert_eq!(updated.code, b.code);
    assert_eq!(updated.parent_id, a.id);
    assert_eq!(updated.updated_by, 3);
    assert_eq!(updated.created_at, 1_000);

    let err = service
        .update_node(777, OrgNodeFields::named("x"), &stamp())
        .unwrap_err();
    assert!(matches!(err, OrgServiceError::NodeNotFound(777)));
}

#[test]
fn get_tree_returns_whole_tree_from_any_member() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    let b = create(&service, a.id, "B");
    let c = create(&service, b.id, "C");
    let e = create(&service, a.id, "E");
    let other = create(&service, ROOT_PARENT_ID, "Other");

    let tree = service.get_tree(c.id).unwrap();
    assert_eq!(tree.node.id, a.id);
    assert_eq!(tree.node_count(), 4);
    let child_ids: Vec<_> = tree.children.iter().map(|child| child.node.id).collect();
    assert_eq!(child_ids, vec![b.id, e.id]);
    assert_eq!(tree.children[0].children[0].node.id, c.id);
    assert!(tree.find(other.id).is_none());

    let forest = service.get_all_trees().unwrap();
    let root_ids: Vec<_> = forest.iter().map(|tree| tree.node.id).collect();
    assert_eq!(root_ids, vec![a.id, other.id]);

    let err = service.get_tree(31_337).unwrap_err();
    assert!(matches!(err, OrgServiceError::NodeNotFound(31_337)));
}

#[test]
fn get_tree_without_root_row_reports_root_not_found() {
    let conn = setup();
    let service = service(&conn);

    // A top-level code whose row claims a parent: no root exists in its prefix.
    conn.execute(
        "INSERT INTO org_nodes (
            id, code, parent_id, name, is_deleted,
            created_by, created_at, updated_by, updated_at
        ) VALUES (5, '0009', 4, 'detached', 0, 1, 0, 1, 0);",
        [],
    )
    .unwrap();

    let err = service.get_tree(5).unwrap_err();
    assert!(matches!(err, OrgServiceError::RootNotFound));
    assert_eq!(err.kind(), OrgErrorKind::RootNotFound);
}

#[test]
fn tree_serializes_as_nested_camel_case_json() {
    let conn = setup();
    let service = service(&conn);

    let a = create(&service, ROOT_PARENT_ID, "A");
    create(&service, a.id, "B");

    let tree = service.get_tree(a.id).unwrap();
    let value = serde_json::to_value(&tree).unwrap();
    assert_eq!(value["code"], "0001");
    assert_eq!(value["parentId"], 0);
    assert_eq!(value["children"][0]["code"], "00010001");
    assert_eq!(value["children"][0]["nameAbbr"], serde_json::Value::Null);
    assert!(value["children"][0]["children"].as_array().unwrap().is_empty());
}

#[test]
fn mixed_operations_preserve_hierarchy_invariants() {
    let conn = setup();
    let service = service(&conn);

    let mut ids: Vec<OrgId> = Vec::new();
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    for step in 0..300 {
        let roll = next();
        let pick = |value: u64, ids: &[OrgId]| {
            if ids.is_empty() || value % 5 == 0 {
                ROOT_PARENT_ID
            } else {
                ids[(value as usize) % ids.len()]
            }
        };
        match roll % 4 {
            0 | 1 => {
                let parent = pick(next(), &ids);
                let node = create(&service, parent, &format!("n{step}"));
                ids.push(node.id);
            }
            2 if !ids.is_empty() => {
                let mover = ids[(next() as usize) % ids.len()];
                let target = pick(next(), &ids);
                match service.move_node(mover, target, &stamp()) {
                    Ok(_) => {}
                    Err(err) => assert!(matches!(
                        err.kind(),
                        OrgErrorKind::CyclicMove | OrgErrorKind::SelfParent
                    )),
                }
            }
            3 if !ids.is_empty() => {
                let index = (next() as usize) % ids.len();
                match service.delete_node(ids[index], &stamp()) {
                    Ok(()) => {
                        ids.remove(index);
                    }
                    Err(err) => assert_eq!(err.kind(), OrgErrorKind::HasChildren),
                }
            }
            _ => {}
        }
    }

    assert_hierarchy_invariants(&conn);
    let total: usize = service
        .get_all_trees()
        .unwrap()
        .iter()
        .map(|tree| tree.node_count())
        .sum();
    assert_eq!(total, ids.len());
}
