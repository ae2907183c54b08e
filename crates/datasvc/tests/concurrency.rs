use std::sync::Arc;
use std::time::Duration;

use datasvc::dataset::{DatasetMetadata, QueryOptions};
use datasvc::errors::DatasvcError;
use datasvc::query::{Dialect, QueryEngine};
use datasvc::registry::{DatasetRegistry, DatasetSource};
use datasvc::scalar::Scalar;
use datasvc::storage::persist::DatasetStorage;
use datasvc::table::TabularTable;
use tokio_util::sync::CancellationToken;

const SLOW_QUERY: &str = "SELECT n % 7 AS k, count(*), sum(n) FROM big GROUP BY n % 7 ORDER BY k";

fn meta(id: &str) -> DatasetMetadata {
    DatasetMetadata {
        id: id.to_string(),
        name: id.to_string(),
        dataset_type: "inline".to_string(),
        description: String::new(),
    }
}

fn big_table(rows: i64) -> TabularTable {
    TabularTable::try_new(
        vec!["n".to_string()],
        (0..rows).map(|n| vec![Scalar::Int(n)]).collect(),
    )
    .unwrap()
}

async fn registry_with_big(rows: i64) -> Arc<DatasetRegistry> {
    logutil::init_test();
    let registry = Arc::new(DatasetRegistry::new(Arc::new(DatasetStorage::in_memory())));
    registry
        .create(meta("big"), DatasetSource::Table(big_table(rows)))
        .await
        .unwrap();
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_same_id() {
    logutil::init_test();
    let registry = Arc::new(DatasetRegistry::new(Arc::new(DatasetStorage::in_memory())));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let table = TabularTable::try_new(
                    vec!["i".to_string()],
                    vec![vec![Scalar::Int(i)]],
                )
                .unwrap();
                registry.create(meta("shared"), DatasetSource::Table(table)).await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(DatasvcError::DuplicateId { id }) => assert_eq!("shared", id),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(1, created);
    assert_eq!(1, registry.len().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_snapshot() {
    let registry = registry_with_big(1_000).await;
    let engine = QueryEngine::default();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let dataset = registry.get("big").await?;
                dataset
                    .query(&engine, SLOW_QUERY, Dialect::Sql, QueryOptions::default())
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(7, results[0].num_rows());
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_during_query() {
    let registry = registry_with_big(500_000).await;
    let dataset = registry.get("big").await.unwrap();
    let engine = QueryEngine::new(None, 16);

    let query = {
        let dataset = dataset.clone();
        tokio::spawn(async move {
            dataset
                .query(&engine, SLOW_QUERY, Dialect::Sql, QueryOptions::default())
                .await
        })
    };

    registry.delete("big").await.unwrap();

    // The query either finished on its snapshot or noticed the delete.
    match query.await.unwrap() {
        Ok(table) => assert_eq!(7, table.num_rows()),
        Err(DatasvcError::DatasetGone { id }) => assert_eq!("big", id),
        Err(e) => panic!("unexpected error: {e}"),
    }

    // Handles held from before the delete can't start new queries.
    let err = dataset
        .query(&engine, "SELECT * FROM big", Dialect::Sql, QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DatasvcError::DatasetGone { .. }), "{err}");

    let err = registry.get("big").await.unwrap_err();
    assert!(matches!(err, DatasvcError::NotFound { .. }), "{err}");
}

#[tokio::test]
async fn query_timeout() {
    let registry = registry_with_big(200_000).await;
    let dataset = registry.get("big").await.unwrap();
    let engine = QueryEngine::new(None, 1);

    let err = dataset
        .query(
            &engine,
            SLOW_QUERY,
            Dialect::Sql,
            QueryOptions {
                timeout: Some(Duration::from_millis(1)),
                cancel: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DatasvcError::QueryTimeout { .. }), "{err}");

    // Dataset still usable afterwards.
    let out = dataset
        .query(&engine, "SELECT count(*) FROM big", Dialect::Sql, QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(&[vec![Scalar::Int(200_000)]], out.rows());
}

#[tokio::test]
async fn configured_timeout_applies() {
    let registry = registry_with_big(200_000).await;
    let dataset = registry.get("big").await.unwrap();
    let engine = QueryEngine::new(Some(Duration::ZERO), 1);

    let err = dataset
        .query(&engine, SLOW_QUERY, Dialect::Sql, QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DatasvcError::QueryTimeout { .. }), "{err}");
}

#[tokio::test]
async fn caller_cancellation() {
    let registry = registry_with_big(10).await;
    let dataset = registry.get("big").await.unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = dataset
        .query(
            &QueryEngine::default(),
            "SELECT * FROM big",
            Dialect::Sql,
            QueryOptions {
                timeout: None,
                cancel: Some(token),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DatasvcError::QueryCancelled), "{err}");
}
