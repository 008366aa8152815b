mod common;

use common::{file_store, Order};
use corebase_core::{RepoError, SqliteStore, StoreSession, UnitOfWork};

#[test]
fn bulk_insert_persists_without_save() {
    let (_dir, store) = file_store();
    let writer = UnitOfWork::new(&store).unwrap();
    let orders = vec![Order::new("a", 1), Order::new("b", 2), Order::new("c", 3)];

    let rows = writer.repository::<Order>().bulk_insert(&orders).unwrap();
    assert_eq!(rows, 3);
    assert_eq!(writer.pending_changes().unwrap(), 0);

    let reader = UnitOfWork::new(&store).unwrap();
    assert_eq!(reader.repository::<Order>().get_all().unwrap(), orders);
}

#[test]
fn bulk_insert_restores_change_tracking() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();

    uow.repository::<Order>()
        .bulk_insert(&[Order::new("a", 1)])
        .unwrap();
    assert!(uow.session().unwrap().auto_detect_changes());
}

#[test]
fn bulk_insert_aggregates_every_violation_and_writes_nothing() {
    let (_dir, store) = file_store();
    let writer = UnitOfWork::new(&store).unwrap();
    let orders = vec![Order::new("ok", 1), Order::new("", 1), Order::new(" ", -1)];

    let err = writer
        .repository::<Order>()
        .bulk_insert(&orders)
        .unwrap_err();

    let errors = err.validation_errors().expect("validation error expected");
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["[1].title", "[2].title", "[2].quantity"]);
    assert_eq!(writer.pending_changes().unwrap(), 0);

    let reader = UnitOfWork::new(&store).unwrap();
    assert!(reader.repository::<Order>().get_all().unwrap().is_empty());
}

#[test]
fn bulk_insert_with_duplicate_keys_leaves_no_partial_rows() {
    let (_dir, store) = file_store();
    let writer = UnitOfWork::new(&store).unwrap();
    let repeated = Order::new("twice", 1);
    let batch = vec![Order::new("first", 1), repeated.clone(), repeated];

    let err = writer
        .repository::<Order>()
        .bulk_insert(&batch)
        .unwrap_err();

    assert_eq!(err.validation_errors().unwrap().len(), 1);
    assert_eq!(writer.pending_changes().unwrap(), 0);
    let reader = UnitOfWork::new(&store).unwrap();
    assert!(reader.repository::<Order>().get_all().unwrap().is_empty());
}

#[test]
fn bulk_insert_also_flushes_previously_staged_changes() {
    let (_dir, store) = file_store();
    let writer = UnitOfWork::new(&store).unwrap();
    let orders = writer.repository::<Order>();

    let single = Order::new("staged single", 1);
    orders.insert(&single).unwrap();
    let rows = orders.bulk_insert(&[Order::new("bulk", 1)]).unwrap();
    assert_eq!(rows, 2);

    let reader = UnitOfWork::new(&store).unwrap();
    let stored = reader.repository::<Order>().get_by_id(&single.id).unwrap();
    assert_eq!(stored, Some(single));
}

#[test]
fn bulk_insert_inside_transaction_is_undone_by_rollback() {
    let (_dir, store) = file_store();
    {
        let writer = UnitOfWork::new(&store).unwrap();
        writer.create_transaction().unwrap();
        writer
            .repository::<Order>()
            .bulk_insert(&[Order::new("a", 1), Order::new("b", 1)])
            .unwrap();
        writer.rollback().unwrap();
    }

    let reader = UnitOfWork::new(&store).unwrap();
    assert!(reader.repository::<Order>().get_all().unwrap().is_empty());
}

#[test]
fn bulk_delete_stages_every_delete_for_the_next_save() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    let orders = uow.repository::<Order>();
    let batch = vec![Order::new("a", 1), Order::new("b", 1), Order::new("c", 1)];
    orders.bulk_insert(&batch).unwrap();

    orders.bulk_delete(&batch[..2]).unwrap();
    assert_eq!(uow.pending_changes().unwrap(), 2);
    assert_eq!(orders.get_all().unwrap().len(), 3);

    uow.save().unwrap();
    let remaining = orders.get_all().unwrap();
    assert_eq!(remaining, vec![batch[2].clone()]);
}

#[test]
fn bulk_delete_of_unknown_entity_fails_on_save_without_partial_deletes() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    let orders = uow.repository::<Order>();
    let stored = Order::new("stored", 1);
    orders.bulk_insert(std::slice::from_ref(&stored)).unwrap();

    orders
        .bulk_delete(&[stored.clone(), Order::new("unknown", 1)])
        .unwrap();
    let err = uow.save().unwrap_err();

    assert!(matches!(err, RepoError::NotFound { .. }));
    assert_eq!(orders.get_all().unwrap(), vec![stored]);
}
