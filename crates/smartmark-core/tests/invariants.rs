//! Property tests for cache ordering and view projection.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use smartmark_core::{
    normalize_url, BookmarkRecord, LinkConfig, LocalCache, MemoryFeed, MemoryStore, OwnerId,
    SyncSession, ViewFilter,
};

#[derive(Debug, Clone)]
enum CacheOp {
    Upsert { id: u8, created: i64 },
    Remove { id: u8 },
    RemoveRestore { id: u8 },
    Touch { id: u8 },
    Replace(Vec<(u8, i64, bool)>),
}

fn cache_op() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        4 => (0u8..12, 0i64..20).prop_map(|(id, created)| CacheOp::Upsert { id, created }),
        2 => (0u8..12).prop_map(|id| CacheOp::Remove { id }),
        2 => (0u8..12).prop_map(|id| CacheOp::RemoveRestore { id }),
        1 => (0u8..12).prop_map(|id| CacheOp::Touch { id }),
        1 => prop::collection::vec((0u8..12, 0i64..20, any::<bool>()), 0..10).prop_map(CacheOp::Replace),
    ]
}

fn record(owner: &str, id: u8, created: i64) -> BookmarkRecord {
    BookmarkRecord {
        id: format!("b{}", id).into(),
        owner_id: owner.into(),
        title: format!("Bookmark {}", id),
        url: format!("https://b{}.example/", id),
        favicon: None,
        last_visited: None,
        created_at: Utc.timestamp_opt(created, 0).unwrap(),
    }
}

fn assert_well_formed(cache: &LocalCache, owner: &OwnerId) -> Result<(), TestCaseError> {
    let records = cache.records();
    prop_assert!(
        records.windows(2).all(|w| w[0].created_at >= w[1].created_at),
        "cache not newest first"
    );
    let mut ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    prop_assert_eq!(ids.len(), records.len(), "duplicate id in cache");
    prop_assert!(records.iter().all(|r| &r.owner_id == owner));
    Ok(())
}

proptest! {
    #[test]
    fn cache_stays_sorted_and_unique(ops in prop::collection::vec(cache_op(), 1..40)) {
        let owner: OwnerId = "u1".into();
        let mut cache = LocalCache::new();
        for op in ops {
            match op {
                CacheOp::Upsert { id, created } => cache.upsert(record("u1", id, created)),
                CacheOp::Remove { id } => {
                    cache.remove(&format!("b{}", id).into());
                }
                CacheOp::RemoveRestore { id } => {
                    let before = cache.clone();
                    if let Some(removed) = cache.remove(&format!("b{}", id).into()) {
                        cache.restore(removed);
                        prop_assert_eq!(&cache, &before);
                    }
                }
                CacheOp::Touch { id } => {
                    cache.touch(&format!("b{}", id).into(), Utc::now());
                }
                CacheOp::Replace(rows) => {
                    let records = rows
                        .into_iter()
                        .map(|(id, created, foreign)| {
                            record(if foreign { "u2" } else { "u1" }, id, created)
                        })
                        .collect();
                    cache.replace_all(&owner, records);
                }
            }
            assert_well_formed(&cache, &owner)?;
        }
    }

    #[test]
    fn filter_projection_is_ordered_subset(
        rows in prop::collection::vec((0u8..30, 0i64..50), 0..20),
        needle in "[a-zA-Z0-9]{0,3}",
    ) {
        let owner: OwnerId = "u1".into();
        let cache = LocalCache::from_records(
            &owner,
            rows.into_iter().map(|(id, created)| record("u1", id, created)).collect(),
        );
        let filter = ViewFilter::new(needle.clone());
        let projected: Vec<_> = filter.project(cache.records()).collect();

        let expected: Vec<_> = cache.records().iter().filter(|r| filter.matches(r)).collect();
        prop_assert_eq!(&projected, &expected);

        let lower = needle.to_lowercase();
        for r in &projected {
            prop_assert!(
                r.title.to_lowercase().contains(&lower) || r.url.to_lowercase().contains(&lower)
            );
        }
    }

    #[test]
    fn bare_hosts_normalize_to_https(host in "[a-z]{1,12}\\.(com|org|dev)") {
        let url = normalize_url(&host, &LinkConfig::default()).unwrap();
        prop_assert_eq!(url.scheme(), "https");
        prop_assert_eq!(url.host_str(), Some(host.as_str()));
    }

    #[test]
    fn session_adds_keep_view_newest_first(hosts in prop::collection::vec("[a-z]{1,8}\\.example", 1..8)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let feed = Arc::new(MemoryFeed::new());
            let store = Arc::new(MemoryStore::with_feed(Arc::clone(&feed)));
            let session = SyncSession::new(store.clone(), feed.clone());
            session.start("u1").await.unwrap();

            let mut ids = Vec::new();
            for host in &hosts {
                ids.push(session.add_bookmark("", host).await.unwrap().id);
            }
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }

            let view = session.current_view();
            ids.reverse();
            let view_ids: Vec<_> = view.iter().map(|r| r.id.clone()).collect();
            assert_eq!(view_ids, ids);
            assert!(view.windows(2).all(|w| w[0].created_at > w[1].created_at));
            session.stop();
        });
    }
}
