// tests/property/pending_table_test.rs

//! Property-based tests for the pending table
//! Tests that every registered request resolves at most once

use proptest::prelude::*;
use spinel_bridge::BridgeError;
use spinel_bridge::core::commands::RequestType;
use spinel_bridge::core::pending::{PendingEntry, PendingTable};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tokio::time::Instant;

fn entry(request_id: u64) -> PendingEntry {
    PendingEntry {
        request_id,
        kind: RequestType::GetString,
        submitted_at: Instant::now(),
        deadline: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_concurrent_resolvers_complete_once(
        tokens in prop::collection::hash_set(any::<u64>(), 1..50),
        resolvers in 2usize..6
    ) {
        let table = Arc::new(PendingTable::new());
        let mut registered = Vec::new();
        for token in &tokens {
            let id = table.next_request_id();
            table.register(*token, entry(id)).unwrap();
            registered.push((*token, id));
        }
        let registered = Arc::new(registered);
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..resolvers)
            .map(|_| {
                let table = Arc::clone(&table);
                let registered = Arc::clone(&registered);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    for (token, id) in registered.iter() {
                        if table.resolve(*token, *id).is_some() {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        prop_assert_eq!(wins.load(Ordering::Relaxed), tokens.len());
        prop_assert!(table.is_empty());
    }

    #[test]
    fn test_stale_request_id_never_resolves(
        token in any::<u64>(),
        reuses in 1usize..10
    ) {
        let table = PendingTable::new();
        let mut previous = Vec::new();
        for _ in 0..reuses {
            let id = table.next_request_id();
            table.register(token, entry(id)).unwrap();
            for stale in &previous {
                prop_assert!(table.resolve(token, *stale).is_none());
            }
            prop_assert_eq!(table.resolve(token, id).map(|e| e.request_id), Some(id));
            previous.push(id);
        }
        prop_assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_registration_keeps_the_first_entry(
        token in any::<u64>()
    ) {
        let table = PendingTable::new();
        let first = table.next_request_id();
        let second = table.next_request_id();
        table.register(token, entry(first)).unwrap();
        prop_assert_eq!(
            table.register(token, entry(second)),
            Err(BridgeError::DuplicateToken(token))
        );
        prop_assert!(table.resolve(token, second).is_none());
        prop_assert!(table.resolve(token, first).is_some());
    }

    #[test]
    fn test_drain_all_returns_every_pending_token(
        tokens in prop::collection::hash_set(any::<u64>(), 0..100)
    ) {
        let table = PendingTable::new();
        for token in &tokens {
            table.register(*token, entry(table.next_request_id())).unwrap();
        }
        let drained: HashSet<u64> = table.drain_all().into_iter().map(|(t, _)| t).collect();
        prop_assert_eq!(drained, tokens);
        prop_assert!(table.is_empty());
    }
}
