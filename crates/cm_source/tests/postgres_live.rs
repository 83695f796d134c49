//! Live PostgreSQL tests for [`PgSource`]
//!
//! Ignored by default. Point `CM_TEST_PG_DSN` at a database the user may
//! create schemas in, then run `cargo test -p cm_source -- --ignored`.
//! Each test seeds its own throwaway schema and drops it afterwards.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use cm_source::{MachineStatusCounts, PgSource, QueryContext, SourceAccessor};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

const DSN_VAR: &str = "CM_TEST_PG_DSN";

const SCHEMA_DDL: [&str; 6] = [
    "CREATE TABLE miner_account (id BIGINT PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE machine (
        id BIGINT PRIMARY KEY,
        miner_account_id BIGINT NOT NULL,
        last_commit_solution BIGINT
    )",
    "CREATE TABLE epoch_distributor (
        miner_account_id BIGINT NOT NULL,
        epoch_time TIMESTAMPTZ NOT NULL,
        hash_count BIGINT,
        reward NUMERIC
    )",
    "CREATE TABLE distributor (
        miner_account_id BIGINT NOT NULL,
        distributor_date DATE NOT NULL,
        reward NUMERIC
    )",
    r#"CREATE TABLE block (height BIGINT PRIMARY KEY, "timestamp" BIGINT NOT NULL, proof_target BIGINT)"#,
    "CREATE TABLE solution (height BIGINT NOT NULL, reward BIGINT NOT NULL)",
];

/// 2024-03-10 04:00 on the +08:00 reward calendar
fn observed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 20, 0, 0).unwrap()
}

fn offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn ctx(cluster: &str) -> QueryContext {
    QueryContext::at(cluster, observed_at(), offset())
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// A seeded schema and a source whose only session is pinned to it
struct LiveSource {
    admin: PgPool,
    schema: String,
    source: PgSource,
}

impl LiveSource {
    /// `None` when no live database is configured
    async fn seeded(test_name: &str) -> Option<Self> {
        let Ok(dsn) = std::env::var(DSN_VAR) else {
            eprintln!("{DSN_VAR} not set, skipping {test_name}");
            return None;
        };

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let schema = format!("cm_test_{test_name}_{nanos}");

        let admin = PgPool::connect(&dsn).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .unwrap();

        let options = PgConnectOptions::from_str(&dsn)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        for ddl in SCHEMA_DDL {
            sqlx::query(ddl).execute(&pool).await.unwrap();
        }
        seed(&pool).await;

        Some(Self {
            admin,
            schema,
            source: PgSource::from_pool(pool),
        })
    }

    async fn drop_schema(self) {
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .unwrap();
    }
}

/// Cluster `alpha` owns accounts 1 and 2, `beta` owns account 3.
async fn seed(pool: &PgPool) {
    let now = observed_at();
    let now_secs = now.timestamp();

    for (id, name) in [(1_i64, "alpha"), (2, "alpha"), (3, "beta")] {
        sqlx::query("INSERT INTO miner_account (id, name) VALUES ($1, $2)")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    let machines: [(i64, i64, Option<i64>); 7] = [
        (1, 1, Some(now_secs - 10)),      // active
        (2, 1, Some(now_secs - 600)),     // active, boundary
        (3, 1, Some(now_secs - 601)),     // inactive
        (4, 2, Some(now_secs - 86_400)),  // inactive, boundary
        (5, 2, Some(now_secs - 86_401)),  // failed
        (6, 2, None),                     // invalid
        (7, 3, Some(now_secs - 5)),       // beta
    ];
    for (id, account, last) in machines {
        sqlx::query(
            "INSERT INTO machine (id, miner_account_id, last_commit_solution) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(account)
        .bind(last)
        .execute(pool)
        .await
        .unwrap();
    }

    // alpha: samples at t=0/10/20 minutes ending at the observed instant,
    // plus one from yesterday that falls outside every window
    let epochs: [(i64, DateTime<Utc>, i64, &str); 5] = [
        (1, now - Duration::hours(25), 5_000, "7"),
        (1, now - Duration::minutes(20), 1_000, "1"),
        (2, now - Duration::minutes(10), 100, "2"),
        (1, now, 300, "3"),
        (3, now - Duration::minutes(5), 900_000, "50"),
    ];
    for (account, at, hash_count, reward) in epochs {
        sqlx::query(
            "INSERT INTO epoch_distributor (miner_account_id, epoch_time, hash_count, reward) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(account)
        .bind(at)
        .bind(hash_count)
        .bind(dec(reward))
        .execute(pool)
        .await
        .unwrap();
    }

    let daily: [(i64, NaiveDate, &str); 4] = [
        (1, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), "12.5"),
        (2, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), "0.25"),
        (1, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(), "99"),
        (3, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), "1000"),
    ];
    for (account, date, reward) in daily {
        sqlx::query(
            "INSERT INTO distributor (miner_account_id, distributor_date, reward) VALUES ($1, $2, $3)",
        )
        .bind(account)
        .bind(date)
        .bind(dec(reward))
        .execute(pool)
        .await
        .unwrap();
    }

    let blocks: [(i64, i64, i64); 3] = [
        (1, now_secs - 100, 100),
        (2, now_secs - 200, 300),
        (3, now_secs - 90_000, 9_999),
    ];
    for (height, timestamp, proof_target) in blocks {
        sqlx::query(r#"INSERT INTO block (height, "timestamp", proof_target) VALUES ($1, $2, $3)"#)
            .bind(height)
            .bind(timestamp)
            .bind(proof_target)
            .execute(pool)
            .await
            .unwrap();
    }

    for (height, reward) in [(1_i64, 1_000_i64), (2, 3_000), (3, 1_000_000_000)] {
        sqlx::query("INSERT INTO solution (height, reward) VALUES ($1, $2)")
            .bind(height)
            .bind(reward)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore = "requires CM_TEST_PG_DSN"]
async fn test_machine_counts_partition_cluster_accounts() {
    let Some(live) = LiveSource::seeded("counts").await else {
        return;
    };

    let counts = live.source.machine_counts(&ctx("alpha")).await.unwrap();
    assert_eq!(
        counts,
        MachineStatusCounts {
            total: 6,
            active: 2,
            inactive: 2,
            failed: 1,
            invalid: 1,
        }
    );
    assert!(counts.is_partition());

    let beta = live.source.machine_counts(&ctx("beta")).await.unwrap();
    assert_eq!(beta.total, 1);
    assert_eq!(beta.active, 1);

    live.drop_schema().await;
}

#[tokio::test]
#[ignore = "requires CM_TEST_PG_DSN"]
async fn test_power_windows() {
    let Some(live) = LiveSource::seeded("power").await else {
        return;
    };
    let alpha = ctx("alpha");

    // the t=0 sample is dropped: 100 + 300 hashes over the 600s between t=10 and t=20
    let day = live.source.last_24h_power(&alpha).await.unwrap();
    assert_eq!(day, 400.0 / 600.0 / 1e6);

    let epoch = live.source.last_epoch_power(&alpha).await.unwrap();
    assert_eq!(epoch, 300.0 / 600.0 / 1e6);

    live.drop_schema().await;
}

#[tokio::test]
#[ignore = "requires CM_TEST_PG_DSN"]
async fn test_rewards_follow_reference_calendar() {
    let Some(live) = LiveSource::seeded("rewards").await else {
        return;
    };
    let alpha = ctx("alpha");

    let yesterday = live.source.yesterday_reward(&alpha).await.unwrap();
    assert_eq!(yesterday, 12.75);

    // 25h-old epoch is on 2024-03-09 local, not today
    let today = live.source.today_reward(&alpha).await.unwrap();
    assert_eq!(today, 6.0);

    live.drop_schema().await;
}

#[tokio::test]
#[ignore = "requires CM_TEST_PG_DSN"]
async fn test_unknown_cluster_is_all_zero() {
    let Some(live) = LiveSource::seeded("ghost").await else {
        return;
    };
    let ghost = ctx("ghost");

    let counts = live.source.machine_counts(&ghost).await.unwrap();
    assert_eq!(counts, MachineStatusCounts::default());
    assert_eq!(live.source.last_24h_power(&ghost).await.unwrap(), 0.0);
    assert_eq!(live.source.last_epoch_power(&ghost).await.unwrap(), 0.0);
    assert_eq!(live.source.yesterday_reward(&ghost).await.unwrap(), 0.0);
    assert_eq!(live.source.today_reward(&ghost).await.unwrap(), 0.0);

    live.drop_schema().await;
}

#[tokio::test]
#[ignore = "requires CM_TEST_PG_DSN"]
async fn test_network_parameters_trailing_day() {
    let Some(live) = LiveSource::seeded("network").await else {
        return;
    };

    let params = live.source.network_parameters(&ctx("alpha")).await.unwrap();
    assert_eq!(params.avg_reward, dec("0.002"));
    assert_eq!(params.avg_proof_target, Decimal::from(200));

    // an empty window averages to zero, not an error
    let later = QueryContext::at("alpha", observed_at() + Duration::days(3), offset());
    let params = live.source.network_parameters(&later).await.unwrap();
    assert_eq!(params.avg_reward, Decimal::ZERO);
    assert_eq!(params.avg_proof_target, Decimal::ZERO);

    live.drop_schema().await;
}
