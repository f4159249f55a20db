// Statistics Aggregator
// Daily service counts are upserted per (store, seller, date);
// monthly totals are summed from the daily rows.

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::SellerStatus;
use crate::error::{QueueError, Result};
use crate::tenant::TenantContext;

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStat {
    pub seller_name: String,
    pub date: NaiveDate,
    pub service_count: i64,
}

/// One seller in the "today" board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyOverviewRow {
    pub seller_name: String,
    pub status: SellerStatus,
    pub service_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub seller_name: String,
    pub total: i64,
}

// ============================================================================
// DAILY COUNTS
// ============================================================================

/// Count one completed service for `seller_name` on `date`.
///
/// Also bumps the seller's lifetime `service_count`. Returns the daily row
/// after the increment.
pub fn record_service(
    conn: &Connection,
    tenant: &TenantContext,
    seller_name: &str,
    date: NaiveDate,
) -> Result<DailyStat> {
    conn.execute(
        "INSERT INTO daily_stats (store_id, seller_name, stat_date, service_count)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT (store_id, seller_name, stat_date)
         DO UPDATE SET service_count = daily_stats.service_count + 1",
        params![tenant.store_id(), seller_name, date],
    )?;

    conn.execute(
        "UPDATE sellers SET service_count = service_count + 1
         WHERE store_id = ?1 AND name = ?2",
        params![tenant.store_id(), seller_name],
    )?;

    Ok(DailyStat {
        seller_name: seller_name.to_string(),
        date,
        service_count: daily_count(conn, tenant, seller_name, date)?,
    })
}

/// Services of one seller on one day (0 when nothing was recorded)
pub fn daily_count(conn: &Connection, tenant: &TenantContext, seller_name: &str, date: NaiveDate) -> Result<i64> {
    let count: Option<i64> = conn.query_row(
        "SELECT SUM(service_count) FROM daily_stats
         WHERE store_id = ?1 AND seller_name = ?2 AND stat_date = ?3",
        params![tenant.store_id(), seller_name, date],
        |row| row.get(0),
    )?;
    Ok(count.unwrap_or(0))
}

/// Daily rows with `start <= date <= end`
pub fn daily_stats(conn: &Connection, tenant: &TenantContext, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyStat>> {
    let mut stmt = conn.prepare(
        "SELECT seller_name, stat_date, service_count
         FROM daily_stats
         WHERE store_id = ?1 AND stat_date >= ?2 AND stat_date <= ?3
         ORDER BY stat_date, seller_name",
    )?;

    let rows = stmt
        .query_map(params![tenant.store_id(), start, end], |row| {
            Ok(DailyStat {
                seller_name: row.get(0)?,
                date: row.get(1)?,
                service_count: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Every seller of the store with that day's count, busiest first
pub fn daily_overview(conn: &Connection, tenant: &TenantContext, date: NaiveDate) -> Result<Vec<DailyOverviewRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.name, s.status, COALESCE(d.service_count, 0)
         FROM sellers s
         LEFT JOIN daily_stats d
           ON d.store_id = s.store_id AND d.seller_name = s.name AND d.stat_date = ?2
         WHERE s.store_id = ?1
         ORDER BY 3 DESC, s.name",
    )?;

    let rows = stmt
        .query_map(params![tenant.store_id(), date], |row| {
            Ok(DailyOverviewRow {
                seller_name: row.get(0)?,
                status: row.get(1)?,
                service_count: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

// ============================================================================
// MONTHLY TOTALS
// ============================================================================

/// Services per seller between `start` and `end`, highest total first
/// (ties by name).
///
/// Grouping follows the NOCASE collation of `seller_name`, so one seller
/// stays one row however the name was spelled on each day. The current
/// roster spelling wins when the seller still exists.
pub fn monthly_totals(
    conn: &Connection,
    tenant: &TenantContext,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MonthlyTotal>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(s.name, MIN(d.seller_name)) AS display_name, SUM(d.service_count) AS total
         FROM daily_stats d
         LEFT JOIN sellers s
           ON s.store_id = d.store_id AND s.name = d.seller_name
         WHERE d.store_id = ?1 AND d.stat_date >= ?2 AND d.stat_date <= ?3
         GROUP BY d.seller_name
         ORDER BY total DESC, display_name COLLATE NOCASE",
    )?;

    let totals = stmt
        .query_map(params![tenant.store_id(), start, end], |row| {
            Ok(MonthlyTotal {
                seller_name: row.get(0)?,
                total: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(totals)
}

/// First and last day of a calendar month
pub fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = || QueueError::InvalidPeriod { year, month };

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    let end = next_month.pred_opt().ok_or_else(invalid)?;

    Ok((start, end))
}

pub fn monthly_report(conn: &Connection, tenant: &TenantContext, year: i32, month: u32) -> Result<Vec<MonthlyTotal>> {
    let (start, end) = month_range(year, month)?;
    monthly_totals(conn, tenant, start, end)
}

/// Month containing `date`, as `(year, month)`
pub fn year_month(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{add_seller, get_seller, setup_database};
    use crate::queue::remove_seller;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Connection, TenantContext) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let tenant = TenantContext::new("norte_sul").unwrap();
        add_seller(&conn, &tenant, "Ana").unwrap();
        add_seller(&conn, &tenant, "Bruno").unwrap();
        add_seller(&conn, &tenant, "Carla").unwrap();
        (conn, tenant)
    }

    #[test]
    fn test_record_service_upserts_daily_row() {
        let (conn, tenant) = setup();
        let day = date(2025, 3, 10);

        let first = record_service(&conn, &tenant, "Ana", day).unwrap();
        let second = record_service(&conn, &tenant, "Ana", day).unwrap();

        assert_eq!(first.service_count, 1);
        assert_eq!(second.service_count, 2);
        assert_eq!(daily_count(&conn, &tenant, "Bruno", day).unwrap(), 0);
        assert_eq!(daily_count(&conn, &tenant, "Ana", date(2025, 3, 11)).unwrap(), 0);

        let ana = get_seller(&conn, &tenant, "Ana").unwrap().unwrap();
        assert_eq!(ana.service_count, 2);
        let bruno = get_seller(&conn, &tenant, "Bruno").unwrap().unwrap();
        assert_eq!(bruno.service_count, 0);
    }

    #[test]
    fn test_daily_overview_includes_idle_sellers() {
        let (conn, tenant) = setup();
        let day = date(2025, 3, 10);
        record_service(&conn, &tenant, "Carla", day).unwrap();
        record_service(&conn, &tenant, "Carla", day).unwrap();
        record_service(&conn, &tenant, "Bruno", day).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 3, 9)).unwrap();

        let overview = daily_overview(&conn, &tenant, day).unwrap();
        let summary: Vec<(&str, i64)> = overview
            .iter()
            .map(|r| (r.seller_name.as_str(), r.service_count))
            .collect();
        assert_eq!(summary, vec![("Carla", 2), ("Bruno", 1), ("Ana", 0)]);
        assert!(overview.iter().all(|r| r.status == SellerStatus::OutOfQueue));
    }

    #[test]
    fn test_monthly_totals_sum_and_sort() {
        let (conn, tenant) = setup();
        for _ in 0..3 {
            record_service(&conn, &tenant, "Bruno", date(2025, 2, 1)).unwrap();
        }
        record_service(&conn, &tenant, "Ana", date(2025, 2, 14)).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 2, 28)).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 2, 28)).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 2, 28)).unwrap();
        // outside February
        record_service(&conn, &tenant, "Carla", date(2025, 1, 31)).unwrap();
        record_service(&conn, &tenant, "Carla", date(2025, 3, 1)).unwrap();

        let totals = monthly_report(&conn, &tenant, 2025, 2).unwrap();
        assert_eq!(
            totals,
            vec![
                MonthlyTotal { seller_name: "Ana".to_string(), total: 4 },
                MonthlyTotal { seller_name: "Bruno".to_string(), total: 3 },
            ]
        );

        let rows = daily_stats(&conn, &tenant, date(2025, 2, 1), date(2025, 2, 28)).unwrap();
        let daily_sum: i64 = rows.iter().map(|r| r.service_count).sum();
        let monthly_sum: i64 = totals.iter().map(|t| t.total).sum();
        assert_eq!(daily_sum, monthly_sum);
    }

    #[test]
    fn test_monthly_ties_sorted_by_name() {
        let (conn, tenant) = setup();
        record_service(&conn, &tenant, "Carla", date(2025, 5, 1)).unwrap();
        record_service(&conn, &tenant, "Carla", date(2025, 5, 1)).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 5, 2)).unwrap();
        record_service(&conn, &tenant, "Ana", date(2025, 5, 3)).unwrap();

        let totals = monthly_report(&conn, &tenant, 2025, 5).unwrap();
        assert_eq!(totals[0].seller_name, "Ana");
        assert_eq!(totals[1].seller_name, "Carla");
        assert!(monthly_report(&conn, &tenant, 2025, 6).unwrap().is_empty());
    }

    #[test]
    fn test_monthly_groups_names_case_insensitively() {
        let (mut conn, tenant) = setup();
        record_service(&conn, &tenant, "Ana", date(2025, 3, 1)).unwrap();
        let ana = get_seller(&conn, &tenant, "Ana").unwrap().unwrap();
        remove_seller(&mut conn, &tenant, &ana.id).unwrap();
        add_seller(&conn, &tenant, "ANA").unwrap();
        record_service(&conn, &tenant, "ANA", date(2025, 3, 2)).unwrap();

        let totals = monthly_report(&conn, &tenant, 2025, 3).unwrap();
        assert_eq!(
            totals,
            vec![MonthlyTotal { seller_name: "ANA".to_string(), total: 2 }]
        );

        // The daily board sees the same identity
        let overview = daily_overview(&conn, &tenant, date(2025, 3, 1)).unwrap();
        let ana_rows: Vec<_> = overview
            .iter()
            .filter(|r| r.seller_name.eq_ignore_ascii_case("ana"))
            .collect();
        assert_eq!(ana_rows.len(), 1);
        assert_eq!(ana_rows[0].seller_name, "ANA");
        assert_eq!(ana_rows[0].service_count, 1);
    }

    #[test]
    fn test_month_range() {
        assert_eq!(month_range(2024, 2).unwrap(), (date(2024, 2, 1), date(2024, 2, 29)));
        assert_eq!(month_range(2025, 12).unwrap(), (date(2025, 12, 1), date(2025, 12, 31)));
        assert!(matches!(
            month_range(2025, 13),
            Err(QueueError::InvalidPeriod { year: 2025, month: 13 })
        ));
        assert_eq!(year_month(date(2025, 7, 4)), (2025, 7));
    }
}
