mod common;

use common::{file_store, Customer, Order};
use corebase_core::{
    BusinessService, RepoError, RepoResult, SqliteSession, SqliteStore, StoreSession, UnitOfWork,
};

/// Use-case service built on top of the base service.
struct OrderDesk<'a> {
    base: BusinessService<'a, SqliteSession>,
}

impl<'a> OrderDesk<'a> {
    fn place(&self, customer: &Customer, order: &Order) -> RepoResult<()> {
        self.base.run_in_transaction(|uow| {
            let customers = uow.repository::<Customer>();
            if customers.get_by_id(&customer.code)?.is_none() {
                customers.insert(customer)?;
            }
            uow.repository::<Order>().insert(order)
        })
    }
}

#[test]
fn owned_unit_of_work_is_closed_on_dispose() {
    let store = SqliteStore::in_memory();
    let mut service = BusinessService::new(&store).unwrap();
    assert!(!service.is_in_external_unit_of_work());
    service
        .repository::<Order>()
        .unwrap()
        .insert(&Order::new("desk", 1))
        .unwrap();

    service.dispose();

    assert!(service.is_disposed());
    assert!(matches!(
        service.unit_of_work().unwrap_err(),
        RepoError::InvalidState(_)
    ));
    assert!(matches!(
        service.repository::<Order>().err(),
        Some(RepoError::InvalidState(_))
    ));
}

#[test]
fn owned_unit_of_work_session_is_released() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    let mut service = BusinessService::owning(uow);

    service.dispose();
    service.dispose();

    assert!(service.unit_of_work().is_err());
}

#[test]
fn external_unit_of_work_survives_service_dispose() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    {
        let mut service = BusinessService::with_unit_of_work(&uow).unwrap();
        assert!(service.is_in_external_unit_of_work());
        service.dispose();
        service.dispose();
    }

    assert!(!uow.is_disposed());
    assert!(uow.session().unwrap().is_open());
    let orders = uow.repository::<Order>();
    orders.insert(&Order::new("still usable", 1)).unwrap();
    assert_eq!(uow.save().unwrap(), 1);
}

#[test]
fn disposed_external_unit_of_work_is_rejected() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    uow.dispose();

    let err = BusinessService::with_unit_of_work(&uow).err().unwrap();
    assert!(matches!(err, RepoError::Argument(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn services_sharing_a_unit_of_work_commit_together() {
    let (_dir, store) = file_store();
    let customer = Customer {
        code: "c-1".to_string(),
        name: "Ada".to_string(),
    };
    let order = Order::new("desk", 1);
    {
        let uow = UnitOfWork::new(&store).unwrap();
        let customers = BusinessService::with_unit_of_work(&uow).unwrap();
        let orders = BusinessService::with_unit_of_work(&uow).unwrap();

        uow.create_transaction().unwrap();
        customers
            .repository::<Customer>()
            .unwrap()
            .insert(&customer)
            .unwrap();
        orders.repository::<Order>().unwrap().insert(&order).unwrap();
        drop(customers);
        drop(orders);
        uow.commit().unwrap();
    }

    let reader = UnitOfWork::new(&store).unwrap();
    assert_eq!(reader.repository::<Customer>().get_all().unwrap(), vec![customer]);
    assert_eq!(reader.repository::<Order>().get_all().unwrap(), vec![order]);
}

#[test]
fn run_in_transaction_commits_on_success() {
    let (_dir, store) = file_store();
    let customer = Customer {
        code: "c-7".to_string(),
        name: "Grace".to_string(),
    };
    {
        let desk = OrderDesk {
            base: BusinessService::new(&store).unwrap(),
        };
        desk.place(&customer, &Order::new("desk", 1)).unwrap();
        desk.place(&customer, &Order::new("lamp", 2)).unwrap();
    }

    let reader = UnitOfWork::new(&store).unwrap();
    assert_eq!(reader.repository::<Customer>().get_all().unwrap().len(), 1);
    assert_eq!(reader.repository::<Order>().get_all().unwrap().len(), 2);
}

#[test]
fn run_in_transaction_rolls_back_and_keeps_the_original_error() {
    let (_dir, store) = file_store();
    let customer = Customer {
        code: "c-9".to_string(),
        name: "Linus".to_string(),
    };
    {
        let desk = OrderDesk {
            base: BusinessService::new(&store).unwrap(),
        };
        let err = desk.place(&customer, &Order::new("", 0)).unwrap_err();

        assert_eq!(err.validation_errors().unwrap().len(), 2);
        let uow = desk.base.unit_of_work().unwrap();
        assert!(!uow.has_open_transaction());
        assert_eq!(uow.pending_changes().unwrap(), 0);
    }

    let reader = UnitOfWork::new(&store).unwrap();
    assert!(reader.repository::<Customer>().get_all().unwrap().is_empty());
}

#[test]
fn run_in_transaction_refuses_to_nest() {
    let store = SqliteStore::in_memory();
    let service = BusinessService::new(&store).unwrap();
    service.unit_of_work().unwrap().create_transaction().unwrap();

    let err = service.run_in_transaction(|_| Ok(())).unwrap_err();
    assert!(matches!(err, RepoError::InvalidState(_)));
    assert!(service.unit_of_work().unwrap().has_open_transaction());
}

#[test]
fn run_in_transaction_rolls_back_when_commit_fails() {
    let store = SqliteStore::in_memory();
    let uow = UnitOfWork::new(&store).unwrap();
    let order = Order::new("desk", 1);
    uow.repository::<Order>().insert(&order).unwrap();
    uow.save().unwrap();
    let service = BusinessService::with_unit_of_work(&uow).unwrap();

    let err = service
        .run_in_transaction(|uow| uow.repository::<Order>().insert(&order))
        .unwrap_err();

    assert!(err.validation_errors().unwrap().contains_field("id"));
    assert!(!uow.has_open_transaction());
    assert_eq!(uow.pending_changes().unwrap(), 0);

    let lamp = Order::new("lamp", 2);
    service
        .run_in_transaction(|uow| uow.repository::<Order>().insert(&lamp))
        .unwrap();
    assert_eq!(uow.repository::<Order>().get_all().unwrap(), vec![order, lamp]);
}
