// Queue invariants checked across whole operation sequences

use chrono::Utc;
use rusqlite::Connection;

use seller_queue::{
    add_seller, history, perform, queued_sellers, setup_database, stats, Action, QueueAction, QueueError,
    SellerStatus, TenantContext,
};

fn store(names: &[&str]) -> (Connection, TenantContext) {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    let tenant = TenantContext::new("loja_centro").unwrap();
    for name in names {
        add_seller(&conn, &tenant, name).unwrap();
    }
    (conn, tenant)
}

fn positions(conn: &Connection, tenant: &TenantContext) -> Vec<(String, i64)> {
    queued_sellers(conn, tenant)
        .unwrap()
        .into_iter()
        .map(|s| (s.name, s.queue_position.unwrap()))
        .collect()
}

fn assert_dense(conn: &Connection, tenant: &TenantContext) {
    let found: Vec<i64> = positions(conn, tenant).into_iter().map(|(_, p)| p).collect();
    let expected: Vec<i64> = (1..=found.len() as i64).collect();
    assert_eq!(found, expected);

    for seller in seller_queue::list_sellers(conn, tenant).unwrap() {
        assert_eq!(
            seller.queue_position.is_some(),
            seller.status == SellerStatus::Queued,
            "{} has status {} and position {:?}",
            seller.name,
            seller.status,
            seller.queue_position
        );
    }
}

#[test]
fn positions_stay_dense_through_a_shift() {
    let (mut conn, tenant) = store(&["Ana", "Bruno", "Carla", "Davi", "Eva"]);

    let script: &[(QueueAction, &str)] = &[
        (QueueAction::Add, "Ana"),
        (QueueAction::Add, "Bruno"),
        (QueueAction::Add, "Carla"),
        (QueueAction::Add, "Davi"),
        (QueueAction::Serve, "Bruno"),
        (QueueAction::Add, "Eva"),
        (QueueAction::ReturnFirst, "Bruno"),
        (QueueAction::Serve, "Ana"),
        (QueueAction::Leave, "Davi"),
        (QueueAction::Budget, "Ana"),
        (QueueAction::Serve, "Carla"),
        (QueueAction::Out, "Carla"),
        (QueueAction::Reenter, "Davi"),
        (QueueAction::Serve, "Eva"),
        (QueueAction::ReturnLast, "Eva"),
        (QueueAction::Reenter, "Carla"),
    ];

    for (action, seller) in script {
        perform(&mut conn, &tenant, *action, seller, Some("orçamento de cozinha")).unwrap();
        assert_dense(&conn, &tenant);
    }

    assert_eq!(
        positions(&conn, &tenant),
        vec![
            ("Bruno".to_string(), 1),
            ("Ana".to_string(), 2),
            ("Davi".to_string(), 3),
            ("Eva".to_string(), 4),
            ("Carla".to_string(), 5),
        ]
    );
}

#[test]
fn serving_the_second_in_line_closes_the_gap() {
    let (mut conn, tenant) = store(&["Ana", "Bruno", "Carla"]);
    for name in ["Bruno", "Ana", "Carla"] {
        perform(&mut conn, &tenant, QueueAction::Add, name, None).unwrap();
    }

    let transition = perform(&mut conn, &tenant, QueueAction::Serve, "Ana", None).unwrap();

    assert_eq!(transition.seller.status, SellerStatus::InService);
    assert_eq!(transition.seller.queue_position, None);
    assert_eq!(
        positions(&conn, &tenant),
        vec![("Bruno".to_string(), 1), ("Carla".to_string(), 2)]
    );
    let entries = history::list(&conn, &tenant).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].action, Action::MovedToService);
    assert_eq!(entries[0].seller_name, "Ana");
}

#[test]
fn every_transition_writes_exactly_one_history_row() {
    let (mut conn, tenant) = store(&["Ana", "Bruno"]);
    let steps = [
        (QueueAction::Add, "Ana"),
        (QueueAction::Add, "Bruno"),
        (QueueAction::Serve, "Ana"),
        (QueueAction::ReturnLast, "Ana"),
        (QueueAction::Leave, "Bruno"),
    ];

    for (i, (action, seller)) in steps.iter().enumerate() {
        perform(&mut conn, &tenant, *action, seller, None).unwrap();
        assert_eq!(history::count(&conn, &tenant).unwrap(), i as i64 + 1);
    }

    // Rejected transitions leave no trace
    assert!(perform(&mut conn, &tenant, QueueAction::Serve, "Bruno", None).is_err());
    assert_eq!(history::count(&conn, &tenant).unwrap(), steps.len() as i64);
}

#[test]
fn completed_service_counts_only_the_acting_seller() {
    let (mut conn, tenant) = store(&["Ana", "Bruno"]);
    let today = Utc::now().date_naive();
    perform(&mut conn, &tenant, QueueAction::Add, "Ana", None).unwrap();
    perform(&mut conn, &tenant, QueueAction::Add, "Bruno", None).unwrap();
    perform(&mut conn, &tenant, QueueAction::Serve, "Ana", None).unwrap();

    assert_eq!(stats::daily_count(&conn, &tenant, "Ana", today).unwrap(), 0);

    perform(&mut conn, &tenant, QueueAction::ReturnFirst, "Ana", None).unwrap();

    assert_eq!(stats::daily_count(&conn, &tenant, "Ana", today).unwrap(), 1);
    assert_eq!(stats::daily_count(&conn, &tenant, "Bruno", today).unwrap(), 0);
}

#[test]
fn monthly_total_is_the_sum_of_daily_counts() {
    let (mut conn, tenant) = store(&["Ana", "Bruno"]);
    let today = Utc::now().date_naive();
    let (year, month) = stats::year_month(today);

    perform(&mut conn, &tenant, QueueAction::Add, "Ana", None).unwrap();
    perform(&mut conn, &tenant, QueueAction::Add, "Bruno", None).unwrap();
    for _ in 0..3 {
        perform(&mut conn, &tenant, QueueAction::Serve, "Ana", None).unwrap();
        perform(&mut conn, &tenant, QueueAction::ReturnLast, "Ana", None).unwrap();
    }
    perform(&mut conn, &tenant, QueueAction::Serve, "Bruno", None).unwrap();
    perform(&mut conn, &tenant, QueueAction::Budget, "Bruno", Some("mesa de jantar")).unwrap();

    let (start, end) = stats::month_range(year, month).unwrap();
    let daily = stats::daily_stats(&conn, &tenant, start, end).unwrap();
    let totals = stats::monthly_report(&conn, &tenant, year, month).unwrap();

    for total in &totals {
        let summed: i64 = daily
            .iter()
            .filter(|d| d.seller_name == total.seller_name)
            .map(|d| d.service_count)
            .sum();
        assert_eq!(total.total, summed);
    }
    assert_eq!(totals[0].seller_name, "Ana");
    assert_eq!(totals[0].total, 3);
    assert_eq!(totals[1].total, 1);
}

#[test]
fn failed_step_rolls_back_the_whole_transition() {
    let (mut conn, tenant) = store(&["Ana", "Bruno"]);
    perform(&mut conn, &tenant, QueueAction::Add, "Ana", None).unwrap();
    perform(&mut conn, &tenant, QueueAction::Add, "Bruno", None).unwrap();

    // History insert is the step after the status update
    conn.execute("DROP TABLE history", []).unwrap();

    let err = perform(&mut conn, &tenant, QueueAction::Serve, "Ana", None).unwrap_err();
    assert!(matches!(err, QueueError::Database(_)));

    let ana = seller_queue::get_seller(&conn, &tenant, "Ana").unwrap().unwrap();
    assert_eq!(ana.status, SellerStatus::Queued);
    assert_eq!(
        positions(&conn, &tenant),
        vec![("Ana".to_string(), 1), ("Bruno".to_string(), 2)]
    );
}

#[test]
fn stores_do_not_see_each_other() {
    let (mut conn, centro) = store(&["Ana"]);
    let bairro = TenantContext::new("loja_bairro").unwrap();
    add_seller(&conn, &bairro, "Ana").unwrap();

    perform(&mut conn, &centro, QueueAction::Add, "Ana", None).unwrap();
    perform(&mut conn, &centro, QueueAction::Serve, "Ana", None).unwrap();
    perform(&mut conn, &centro, QueueAction::Out, "Ana", None).unwrap();

    let other = seller_queue::get_seller(&conn, &bairro, "Ana").unwrap().unwrap();
    assert_eq!(other.status, SellerStatus::OutOfQueue);
    assert_eq!(other.service_count, 0);
    assert_eq!(history::count(&conn, &bairro).unwrap(), 0);
    assert!(stats::daily_overview(&conn, &bairro, Utc::now().date_naive())
        .unwrap()
        .iter()
        .all(|row| row.service_count == 0));
}
