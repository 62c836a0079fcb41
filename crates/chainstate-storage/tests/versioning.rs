//! Versioning and revert integration tests.
//!
//! Every scenario runs against each enabled backend (memory always, SQLite
//! with the `sqlite` feature) and checks the version-chain invariants after
//! the fact through `history`.

#![cfg(feature = "memory")]

use std::sync::Arc;

use chainstate_core::{
    row_data, Checkpoint, Column, Filter, Operator, Row, RowData, ScalarType, Schema,
    StoreConfig, StoreError, Table, Value, VersionedStore,
};
use chainstate_storage::InMemoryStore;

// ─── Helpers ──────────────────────────────────────────────────────────────────

const ACCOUNT: &str = "Account";

fn config() -> StoreConfig {
    let schema = Schema::new(vec![Table::new(
        ACCOUNT,
        vec![
            Column::id(ScalarType::Hex),
            Column::scalar("balance", ScalarType::BigInt),
            Column::scalar("label", ScalarType::String).nullable(),
            Column::scalar("delegate", ScalarType::Hex).nullable(),
        ],
    )]);
    StoreConfig::with_random_version(schema).unwrap()
}

async fn backends() -> Vec<(&'static str, Box<dyn VersionedStore>)> {
    backends_with(config).await
}

async fn backends_with(config: fn() -> StoreConfig) -> Vec<(&'static str, Box<dyn VersionedStore>)> {
    #[allow(unused_mut)]
    let mut stores: Vec<(&'static str, Box<dyn VersionedStore>)> =
        vec![("memory", Box::new(InMemoryStore::new(config())))];
    #[cfg(feature = "sqlite")]
    stores.push((
        "sqlite",
        Box::new(
            chainstate_storage::SqliteStore::in_memory(config())
                .await
                .unwrap(),
        ),
    ));
    stores
}

fn at(block: u64) -> Checkpoint {
    Checkpoint::block(1, block)
}

fn acct(n: u8) -> Value {
    Value::hex(format!("0x{n:02x}"))
}

fn balance(b: i128) -> RowData {
    row_data([("balance", Value::BigInt(b))])
}

/// Versions never overlap, are ordered, and only the last may be open.
fn assert_chain(name: &str, history: &[Row]) {
    for pair in history.windows(2) {
        assert!(
            pair[0].effective_to < pair[1].effective_from,
            "{name}: overlapping versions {:?}",
            pair
        );
        assert!(!pair[0].is_current(), "{name}: open version before the last");
    }
    for row in history {
        assert!(row.effective_from <= row.effective_to, "{name}: empty interval");
    }
}

/// The scripted workload used by the revert tests, as `(block, op)`.
async fn apply_workload(store: &dyn VersionedStore, up_to: u64) {
    let steps: Vec<(u64, &str, u8, i128)> = vec![
        (1, "create", 1, 100),
        (1, "create", 2, 200),
        (2, "update", 1, 150),
        (3, "delete", 2, 0),
        (3, "create", 3, 300),
        (4, "update", 1, 175),
        (4, "update", 1, 180),
        (5, "delete", 1, 0),
        (5, "upsert", 3, 350),
        (6, "upsert", 4, 400),
    ];
    for (block, op, n, value) in steps {
        if block > up_to {
            break;
        }
        let id = acct(n);
        match op {
            "create" => {
                store.create(ACCOUNT, id, at(block), balance(value)).await.unwrap();
            }
            "update" => {
                store.update(ACCOUNT, id, at(block), balance(value)).await.unwrap();
            }
            "upsert" => {
                store
                    .upsert(ACCOUNT, id, at(block), balance(value), balance(value))
                    .await
                    .unwrap();
            }
            "delete" => {
                assert!(store.delete(ACCOUNT, &id, at(block)).await.unwrap());
            }
            _ => unreachable!(),
        }
    }
}

async fn snapshot(store: &dyn VersionedStore, checkpoint: Checkpoint) -> Vec<Row> {
    store
        .find_many(ACCOUNT, &Filter::new().at(checkpoint))
        .await
        .unwrap()
}

// ─── Version chains ───────────────────────────────────────────────────────────

#[tokio::test]
async fn workload_keeps_chains_well_formed() {
    for (name, store) in backends().await {
        apply_workload(store.as_ref(), u64::MAX).await;
        for n in 1..=4 {
            let history = store.history(ACCOUNT, &acct(n)).await.unwrap();
            assert!(!history.is_empty(), "{name}: missing history for {n}");
            assert_chain(name, &history);
        }
    }
}

#[tokio::test]
async fn update_closes_at_previous_checkpoint() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        store.update(ACCOUNT, id.clone(), at(20), balance(2)).await.unwrap();

        let history = store.history(ACCOUNT, &id).await.unwrap();
        assert_eq!(history.len(), 2, "{name}");
        assert_eq!(history[0].effective_to, at(20).prev(), "{name}");
        assert_eq!(history[1].effective_from, at(20), "{name}");
        assert!(history[1].is_current(), "{name}");
    }
}

#[tokio::test]
async fn same_checkpoint_updates_collapse() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        store.update(ACCOUNT, id.clone(), at(10), balance(2)).await.unwrap();
        store
            .update(ACCOUNT, id.clone(), at(10), row_data([("label", "hot")]))
            .await
            .unwrap();

        let history = store.history(ACCOUNT, &id).await.unwrap();
        assert_eq!(history.len(), 1, "{name}");
        assert_eq!(history[0].get("balance"), Some(&Value::BigInt(2)), "{name}");
        assert_eq!(history[0].get("label"), Some(&Value::from("hot")), "{name}");
    }
}

#[tokio::test]
async fn born_and_died_leaves_no_trace() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        assert!(store.delete(ACCOUNT, &id, at(10)).await.unwrap());

        assert!(store.history(ACCOUNT, &id).await.unwrap().is_empty(), "{name}");
        assert!(store.find_unique(ACCOUNT, &id, at(10)).await.unwrap().is_none(), "{name}");
        // The id is free again.
        store.create(ACCOUNT, id, at(11), balance(2)).await.unwrap();
    }
}

#[tokio::test]
async fn delete_keeps_history() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        assert!(store.delete(ACCOUNT, &id, at(15)).await.unwrap());
        assert!(!store.delete(ACCOUNT, &id, at(16)).await.unwrap(), "{name}");

        assert!(store.find_latest(ACCOUNT, &id).await.unwrap().is_none(), "{name}");
        let old = store.find_unique(ACCOUNT, &id, at(14)).await.unwrap().unwrap();
        assert_eq!(old.effective_to, at(15).prev(), "{name}");
    }
}

#[tokio::test]
async fn create_over_open_or_overlapping_version_fails() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        let err = store.create(ACCOUNT, id.clone(), at(12), balance(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordAlreadyExists { .. }), "{name}: {err}");

        store.delete(ACCOUNT, &id, at(20)).await.unwrap();
        // Version ends at 19; a create at 15 would overlap it.
        let err = store.create(ACCOUNT, id.clone(), at(15), balance(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordAlreadyExists { .. }), "{name}: {err}");
        store.create(ACCOUNT, id, at(20), balance(1)).await.unwrap();
    }
}

#[tokio::test]
async fn writes_before_current_version_are_rejected() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();

        let err = store.update(ACCOUNT, id.clone(), at(9), balance(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::TemporalOrderViolation { .. }), "{name}");
        let err = store
            .upsert(ACCOUNT, id.clone(), at(9), balance(2), balance(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TemporalOrderViolation { .. }), "{name}");
        let err = store.delete(ACCOUNT, &id, at(9)).await.unwrap_err();
        assert!(matches!(err, StoreError::TemporalOrderViolation { .. }), "{name}");

        assert_eq!(store.history(ACCOUNT, &id).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn update_of_missing_record_fails() {
    for (name, store) in backends().await {
        let err = store.update(ACCOUNT, acct(9), at(1), balance(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    for (name, store) in backends().await {
        let err = store
            .create(ACCOUNT, Value::Int(1), at(1), balance(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData { .. }), "{name}");

        let err = store
            .create(ACCOUNT, acct(1), at(1), row_data([("label", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData { .. }), "{name}");

        let err = store.find_latest("Missing", &acct(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)), "{name}");
    }
}

#[tokio::test]
async fn hex_spellings_address_one_entity() {
    for (name, store) in backends().await {
        let created = store
            .create(
                ACCOUNT,
                Value::Hex("0xAB".into()),
                at(1),
                row_data([
                    ("balance", Value::BigInt(1)),
                    ("delegate", Value::Hex("0XCD".into())),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(created.id, Value::hex("0xab"), "{name}");
        assert_eq!(created.get("delegate"), Some(&Value::hex("0xcd")), "{name}");

        for spelling in [Value::hex("0xab"), Value::Hex("0xAB".into()), Value::Hex("ab".into())] {
            let row = store.find_latest(ACCOUNT, &spelling).await.unwrap();
            assert_eq!(row.map(|r| r.id), Some(Value::hex("0xab")), "{name}: {spelling:?}");
        }

        let err = store
            .create(ACCOUNT, Value::hex("0xab"), at(1), balance(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordAlreadyExists { .. }), "{name}");

        store
            .update(ACCOUNT, Value::Hex("0xAb".into()), at(2), balance(3))
            .await
            .unwrap();
        let history = store.history(ACCOUNT, &Value::Hex("0XAB".into())).await.unwrap();
        assert_eq!(history.len(), 2, "{name}");
        assert_chain(name, &history);

        let stored = store.find_latest(ACCOUNT, &Value::hex("0xab")).await.unwrap().unwrap();
        assert_eq!(stored.get("delegate"), Some(&Value::hex("0xcd")), "{name}");

        for filter in [
            Filter::new().eq("id", Value::Hex("0xAB".into())),
            Filter::new().eq("delegate", Value::Hex("0xCd".into())),
            Filter::new().condition("delegate", Operator::StartsWith("0xC".into())),
        ] {
            let rows = store.find_many(ACCOUNT, &filter).await.unwrap();
            assert_eq!(rows.len(), 1, "{name}: {filter:?}");
        }

        assert!(store.delete(ACCOUNT, &Value::Hex("0xAB".into()), at(3)).await.unwrap());
        assert!(store.find_latest(ACCOUNT, &Value::hex("0xab")).await.unwrap().is_none());
    }
}

fn priced_config() -> StoreConfig {
    let schema = Schema::new(vec![Table::new(
        "Pool",
        vec![
            Column::id(ScalarType::String),
            Column::scalar("price", ScalarType::Float),
            Column::scalar("last", ScalarType::Float).nullable(),
        ],
    )]);
    StoreConfig::with_random_version(schema).unwrap()
}

#[tokio::test]
async fn non_finite_floats_are_rejected_everywhere() {
    for (name, store) in backends_with(priced_config).await {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = store
                .create("Pool", "p".into(), at(1), row_data([("price", Value::Float(bad))]))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidData { .. }), "{name}: {bad} gave {err}");

            let err = store
                .create(
                    "Pool",
                    "q".into(),
                    at(1),
                    row_data([("price", Value::Float(1.0)), ("last", Value::Float(bad))]),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidData { .. }), "{name}: {bad} gave {err}");
        }
        assert!(store.find_latest("Pool", &"p".into()).await.unwrap().is_none(), "{name}");

        store
            .create("Pool", "p".into(), at(1), row_data([("price", Value::Float(2.5))]))
            .await
            .unwrap();
        let err = store
            .update("Pool", "p".into(), at(2), row_data([("last", Value::Float(f64::NAN))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData { .. }), "{name}");
        let row = store.find_latest("Pool", &"p".into()).await.unwrap().unwrap();
        assert_eq!(row.get("price"), Some(&Value::Float(2.5)), "{name}");
        assert_eq!(row.get("last"), Some(&Value::Null), "{name}");
    }
}

// ─── Point-in-time reads ──────────────────────────────────────────────────────

#[tokio::test]
async fn past_reads_are_stable_under_later_writes() {
    for (name, store) in backends().await {
        apply_workload(store.as_ref(), 3).await;
        let before: Vec<Vec<Row>> = {
            let mut snaps = Vec::new();
            for block in 0..=3 {
                snaps.push(snapshot(store.as_ref(), at(block)).await);
            }
            snaps
        };

        // Apply the rest of the workload on top.
        store.update(ACCOUNT, acct(1), at(4), balance(175)).await.unwrap();
        store.delete(ACCOUNT, &acct(1), at(5)).await.unwrap();
        store
            .upsert(ACCOUNT, acct(3), at(5), balance(350), balance(350))
            .await
            .unwrap();

        for block in 0..=3u64 {
            let after = snapshot(store.as_ref(), at(block)).await;
            let expected: Vec<(Value, RowData)> = before[block as usize]
                .iter()
                .map(|r| (r.id.clone(), r.data.clone()))
                .collect();
            let actual: Vec<(Value, RowData)> =
                after.iter().map(|r| (r.id.clone(), r.data.clone())).collect();
            assert_eq!(actual, expected, "{name}: read at block {block} changed");
        }
    }
}

// ─── Revert ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn revert_matches_never_having_written() {
    for safe in 0..=6u64 {
        for ((name, reverted), (_, replayed)) in backends().await.into_iter().zip(backends().await) {
            apply_workload(reverted.as_ref(), u64::MAX).await;
            reverted.revert(at(safe)).await.unwrap();
            apply_workload(replayed.as_ref(), safe).await;

            for block in (0..=safe).chain([u64::MAX]) {
                let checkpoint = if block == u64::MAX { Checkpoint::LATEST } else { at(block) };
                assert_eq!(
                    snapshot(reverted.as_ref(), checkpoint).await,
                    snapshot(replayed.as_ref(), checkpoint).await,
                    "{name}: safe={safe} read at {block}"
                );
            }
            for n in 1..=4 {
                assert_eq!(
                    reverted.history(ACCOUNT, &acct(n)).await.unwrap(),
                    replayed.history(ACCOUNT, &acct(n)).await.unwrap(),
                    "{name}: safe={safe} history of {n}"
                );
            }
        }
    }
}

#[tokio::test]
async fn revert_is_idempotent() {
    for (name, store) in backends().await {
        apply_workload(store.as_ref(), u64::MAX).await;
        let first = store.revert(at(3)).await.unwrap();
        assert!(first.deleted > 0, "{name}");
        let latest = snapshot(store.as_ref(), Checkpoint::LATEST).await;

        let second = store.revert(at(3)).await.unwrap();
        assert_eq!(second.deleted, 0, "{name}");
        assert_eq!(second.reopened, 0, "{name}");
        assert_eq!(snapshot(store.as_ref(), Checkpoint::LATEST).await, latest, "{name}");
    }
}

#[tokio::test]
async fn revert_keeps_writes_at_the_safe_checkpoint() {
    for (name, store) in backends().await {
        let id = acct(1);
        store.create(ACCOUNT, id.clone(), at(10), balance(1)).await.unwrap();
        store.update(ACCOUNT, id.clone(), at(12), balance(2)).await.unwrap();
        store.update(ACCOUNT, id.clone(), at(14), balance(3)).await.unwrap();

        store.revert_table(ACCOUNT, at(12)).await.unwrap();
        let latest = store.find_latest(ACCOUNT, &id).await.unwrap().unwrap();
        assert_eq!(latest.get("balance"), Some(&Value::BigInt(2)), "{name}");
        assert_eq!(latest.effective_from, at(12), "{name}");

        store.revert_table(ACCOUNT, at(11)).await.unwrap();
        let latest = store.find_latest(ACCOUNT, &id).await.unwrap().unwrap();
        assert_eq!(latest.get("balance"), Some(&Value::BigInt(1)), "{name}");
        assert!(latest.is_current(), "{name}");
    }
}

#[tokio::test]
async fn revert_before_creation_removes_entity() {
    for (name, store) in backends().await {
        store.create(ACCOUNT, acct(1), at(10), balance(1)).await.unwrap();
        let summary = store.revert(at(9)).await.unwrap();
        assert_eq!(summary.deleted, 1, "{name}");
        assert!(store.history(ACCOUNT, &acct(1)).await.unwrap().is_empty(), "{name}");
    }
}

// ─── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_upserts_leave_one_version() {
    for (name, store) in backends().await {
        let id = acct(7);
        let writes = (0..16i128).map(|i| {
            store.upsert(
                ACCOUNT,
                id.clone(),
                at(10),
                balance(i),
                row_data([("label", format!("w{i}"))]),
            )
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let history = store.history(ACCOUNT, &id).await.unwrap();
        assert_eq!(history.len(), 1, "{name}");
        assert!(history[0].is_current(), "{name}");
    }
}

#[tokio::test]
async fn concurrent_writes_to_distinct_ids() {
    for (name, store) in backends().await {
        let writes = (0..32u8).map(|n| store.create(ACCOUNT, acct(n), at(u64::from(n)), balance(1)));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }
        assert_eq!(snapshot(store.as_ref(), Checkpoint::LATEST).await.len(), 32, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revert_is_exclusive_against_in_flight_writes() {
    const IDS: u8 = 8;
    const FIRST: u64 = 10;
    const LAST: u64 = 29;
    let safe = at(3);

    for (name, store) in backends().await {
        let store: Arc<dyn VersionedStore> = Arc::from(store);
        for n in 0..IDS {
            store.create(ACCOUNT, acct(n), at(1), balance(1)).await.unwrap();
            store.update(ACCOUNT, acct(n), at(5), balance(5)).await.unwrap();
        }

        // One sequential writer per id, alternating update and upsert.
        let writers: Vec<_> = (0..IDS)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for block in FIRST..=LAST {
                        let data = balance(i128::from(block));
                        let result = if block % 2 == 0 {
                            store.update(ACCOUNT, acct(n), at(block), data).await
                        } else {
                            store.upsert(ACCOUNT, acct(n), at(block), data.clone(), data).await
                        };
                        result.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        tokio::task::yield_now().await;
        let summary = store.revert(safe).await.unwrap();
        for writer in writers {
            writer.await.unwrap();
        }
        assert!(summary.deleted >= u64::from(IDS), "{name}: {summary:?}");

        for n in 0..IDS {
            let history = store.history(ACCOUNT, &acct(n)).await.unwrap();
            assert_chain(name, &history);

            // The pre-revert version survives untouched; nothing from the
            // discarded block 5 does.
            assert_eq!(history[0].effective_from, at(1), "{name}");
            assert_eq!(history[0].get("balance"), Some(&Value::BigInt(1)), "{name}");
            assert!(history.iter().all(|r| r.effective_from != at(5)), "{name}");

            // Whatever lies past the safe point was written after the revert:
            // an unbroken run of this writer's blocks ending at its last write.
            let kept: Vec<u64> = history
                .iter()
                .filter(|r| r.effective_from > safe)
                .map(|r| r.effective_from.block_number)
                .collect();
            if let Some(&start) = kept.first() {
                assert!(start >= FIRST, "{name}: {kept:?}");
                assert_eq!(kept, (start..=LAST).collect::<Vec<_>>(), "{name}");
            }
            let expected = kept.last().map_or(1, |&b| i128::from(b));
            let latest = store.find_latest(ACCOUNT, &acct(n)).await.unwrap().unwrap();
            assert_eq!(latest.get("balance"), Some(&Value::BigInt(expected)), "{name}");
        }
    }
}
