// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! End-to-end lock scenarios driven through `LockSys`.

use std::sync::Arc;
use std::time::Duration;

use cinderdb::dict::{Index, Table};
use cinderdb::lock::{
    LockError, LockFlags, LockMode, LockStatus, LockSys, LockSysConfig, OpFlags,
};
use cinderdb::page::{Block, PAGE_HEAP_NO_INFIMUM, PAGE_HEAP_NO_SUPREMUM};
use cinderdb::trx::{IsolationLevel, QueState, TrxId};

const RR: IsolationLevel = IsolationLevel::RepeatableRead;
const SHORT: Option<Duration> = Some(Duration::from_millis(200));

struct Env {
    sys: LockSys,
    table: Arc<Table>,
    index: Arc<Index>,
}

fn env() -> Env {
    env_with(LockSysConfig::default())
}

fn env_with(config: LockSysConfig) -> Env {
    let table = Table::new(7, "shop/orders");
    let index = Index::clustered(70, "PRIMARY", &table);
    Env {
        sys: LockSys::create(config),
        table,
        index,
    }
}

/// A page with `n` user records, heap numbers 2 to n + 1.
fn page(page_no: u32, n: usize) -> Block {
    let mut block = Block::new(0, page_no);
    for i in 0..n {
        block.insert(format!("k{i:04}"), TrxId(0));
    }
    block
}

fn rec_not_gap() -> LockFlags {
    LockFlags::REC_NOT_GAP
}

#[test]
fn test_s_then_x_on_same_row() {
    let Env { sys, index, .. } = env();
    let block = page(10, 6);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);

    let status = sys.rec_lock(LockMode::S, rec_not_gap(), &block, 7, &index, t1).unwrap();
    assert_eq!(status, LockStatus::Granted);
    let status = sys.rec_lock(LockMode::X, rec_not_gap(), &block, 7, &index, t2).unwrap();
    assert_eq!(status, LockStatus::Waiting);
    sys.validate().unwrap();

    sys.commit(t1).unwrap();
    sys.wait_for_grant(t2, SHORT).unwrap();

    let kernel = sys.kernel();
    let id = kernel.rec_first(block.id(), 7).unwrap();
    assert_eq!(kernel.lock(id).trx(), t2);
    assert!(!kernel.lock(id).is_wait());
    assert_eq!(kernel.trx_sys()[t2].que_state(), QueState::Running);
}

#[test]
fn test_two_inserts_into_gap_deadlock() {
    let Env { sys, index, .. } = env();
    let mut block = Block::new(0, 10);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    // t1 has done more work and is the more expensive one to roll back.
    sys.trx_add_undo(t1, 10);

    let gap = LockFlags::GAP;
    assert_eq!(
        sys.rec_lock(LockMode::X, gap, &block, PAGE_HEAP_NO_SUPREMUM, &index, t1).unwrap(),
        LockStatus::Granted
    );
    assert_eq!(
        sys.rec_lock(LockMode::X, gap, &block, PAGE_HEAP_NO_SUPREMUM, &index, t2).unwrap(),
        LockStatus::Granted
    );

    let (status, inherit) = sys
        .rec_insert_check_and_lock(OpFlags::NONE, &mut block, PAGE_HEAP_NO_INFIMUM, &index, t1)
        .unwrap();
    assert_eq!(status, LockStatus::Waiting);
    assert!(inherit);

    let err = sys
        .rec_insert_check_and_lock(OpFlags::NONE, &mut block, PAGE_HEAP_NO_INFIMUM, &index, t2)
        .unwrap_err();
    assert!(matches!(err, LockError::Deadlock));
    assert!(sys.kernel().deadlock_found());
    assert!(sys.latest_deadlock().contains("*** WE ROLL BACK TRANSACTION (2)"));
    let info = sys.deadlock_info(t2).unwrap();
    assert_eq!(info.table.name(), "shop/orders");

    sys.rollback(t2).unwrap();
    sys.wait_for_grant(t1, SHORT).unwrap();
    sys.validate().unwrap();
}

#[test]
fn test_page_split_moves_locks() {
    let Env { sys, index, .. } = env();
    let mut left = page(10, 6);
    let t1 = sys.trx_begin(RR);
    sys.rec_lock(LockMode::S, rec_not_gap(), &left, 5, &index, t1).unwrap();

    let mut right = Block::new(0, 11);
    left.copy_rec_list_end_to(5, &mut right);
    sys.move_rec_list_end(&right, &left, 5);
    left.delete_rec_list_end(5);
    sys.update_split_right(&right, &left);

    let key = format!("k{:04}", 3);
    let new_heap = right.rec_by_key(key.as_bytes()).unwrap().heap_no();
    let kernel = sys.kernel();
    let id = kernel.rec_first(right.id(), new_heap).unwrap();
    assert_eq!(kernel.lock(id).trx(), t1);
    assert!(kernel.lock(id).is_rec_not_gap());
    assert!(kernel.rec_first(left.id(), 5).is_none());
}

#[test]
fn test_release_wakes_compatible_waiters_in_order() {
    let Env { sys, index, .. } = env();
    let block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    let t3 = sys.trx_begin(RR);

    sys.rec_lock(LockMode::X, LockFlags::ORDINARY, &block, 3, &index, t1).unwrap();
    for trx in [t2, t3] {
        let status = sys.rec_lock(LockMode::S, LockFlags::ORDINARY, &block, 3, &index, trx).unwrap();
        assert_eq!(status, LockStatus::Waiting);
    }

    sys.commit(t1).unwrap();
    for trx in [t2, t3] {
        sys.wait_for_grant(trx, SHORT).unwrap();
    }

    let kernel = sys.kernel();
    let owners: Vec<TrxId> = kernel
        .bit_locks(block.id(), 3)
        .into_iter()
        .map(|id| kernel.lock(id).trx())
        .collect();
    assert_eq!(owners, vec![t2, t3]);
    for trx in [t2, t3] {
        assert_eq!(kernel.trx_sys()[trx].que_state(), QueState::Running);
        assert!(kernel.trx_sys()[trx].wait_lock().is_none());
    }
}

#[test]
fn test_lighter_transaction_is_victim() {
    let Env { sys, index, .. } = env();
    let block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);

    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 2, &index, t1).unwrap();
    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 3, &index, t2).unwrap();
    let status = sys.rec_lock(LockMode::X, rec_not_gap(), &block, 3, &index, t1).unwrap();
    assert_eq!(status, LockStatus::Waiting);

    // Two lock structs each: t1 weighs 5, t2 weighs 10.
    sys.trx_add_undo(t1, 3);
    sys.trx_add_undo(t2, 8);

    let status = sys.rec_lock(LockMode::X, rec_not_gap(), &block, 2, &index, t2).unwrap();
    assert_eq!(status, LockStatus::Waiting);
    assert!(sys.latest_deadlock().contains("*** WE ROLL BACK TRANSACTION (1)"));

    let err = sys.wait_for_grant(t1, SHORT).unwrap_err();
    assert!(matches!(err, LockError::Deadlock));
    assert!(sys.deadlock_info(t1).is_some());
    assert!(sys.kernel().trx_sys()[t1].wait_lock().is_none());

    sys.rollback(t1).unwrap();
    sys.wait_for_grant(t2, SHORT).unwrap();
    assert_eq!(sys.number_of_rows_locked(t2), 2);
}

#[test]
fn test_equal_weights_roll_back_requester() {
    let Env { sys, index, .. } = env();
    let block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);

    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 2, &index, t1).unwrap();
    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 3, &index, t2).unwrap();
    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 3, &index, t1).unwrap();
    let err = sys
        .rec_lock(LockMode::X, rec_not_gap(), &block, 2, &index, t2)
        .unwrap_err();
    assert!(matches!(err, LockError::Deadlock));

    // The survivor keeps waiting until the victim rolls back.
    assert_eq!(sys.kernel().trx_sys()[t1].que_state(), QueState::LockWait);
    sys.rollback(t2).unwrap();
    sys.wait_for_grant(t1, SHORT).unwrap();
}

#[test]
fn test_implicit_lock_is_converted_for_reader() {
    let Env { sys, index, .. } = env();
    let mut block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);

    // t1 updated the row in place: only its id on the record locks it.
    block.set_trx_id(3, t1);
    assert!(!sys.rec_expl_exist_on_page(block.id()));

    let status = sys
        .clust_rec_read_check_and_lock(
            OpFlags::NONE,
            &block,
            3,
            &index,
            LockMode::S,
            rec_not_gap(),
            t2,
        )
        .unwrap();
    assert_eq!(status, LockStatus::Waiting);
    {
        let kernel = sys.kernel();
        let first = kernel.rec_first(block.id(), 3).unwrap();
        let lock = kernel.lock(first);
        assert_eq!(lock.trx(), t1);
        assert_eq!(lock.mode(), LockMode::X);
        assert!(lock.is_rec_not_gap());
    }
    sys.validate().unwrap();

    sys.commit(t1).unwrap();
    sys.wait_for_grant(t2, SHORT).unwrap();
}

/// Builds a waits-for chain t1 -> t2 -> ... -> tn, then lets `start` request
/// the row of t1.
fn chain(sys: &LockSys, index: &Arc<Index>, n: usize) -> (TrxId, Result<LockStatus, LockError>) {
    let block = page(10, n);
    let trxs: Vec<TrxId> = (0..n).map(|_| sys.trx_begin(RR)).collect();
    for (i, &trx) in trxs.iter().enumerate() {
        sys.rec_lock(LockMode::X, rec_not_gap(), &block, i + 2, index, trx).unwrap();
    }
    for i in (0..n - 1).rev() {
        let status = sys
            .rec_lock(LockMode::X, rec_not_gap(), &block, i + 3, index, trxs[i])
            .unwrap();
        assert_eq!(status, LockStatus::Waiting);
    }
    let start = sys.trx_begin(RR);
    let result = sys.rec_lock(LockMode::X, rec_not_gap(), &block, 2, index, start);
    (start, result)
}

#[test]
fn test_deadlock_search_depth_limit() {
    let Env { sys, index, .. } = env();
    let (_, result) = chain(&sys, &index, 201);
    assert_eq!(result.unwrap(), LockStatus::Waiting);

    let Env { sys, index, .. } = env();
    let (start, result) = chain(&sys, &index, 202);
    assert!(matches!(result, Err(LockError::Deadlock)));
    assert!(sys
        .latest_deadlock()
        .starts_with("TOO DEEP OR LONG SEARCH IN THE LOCK TABLE WAITS-FOR GRAPH"));
    assert!(sys.kernel().trx_sys()[start].wait_lock().is_none());
}

#[test]
fn test_configured_depth_limit() {
    let Env { sys, index, .. } = env_with(LockSysConfig::default().with_deadlock_limits(1_000_000, 3));
    let (_, result) = chain(&sys, &index, 5);
    assert!(matches!(result, Err(LockError::Deadlock)));
}

#[test]
fn test_supremum_gap_coexists() {
    let Env { sys, index, .. } = env();
    let block = page(10, 2);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    let t3 = sys.trx_begin(RR);

    sys.rec_lock(LockMode::X, LockFlags::ORDINARY, &block, PAGE_HEAP_NO_SUPREMUM, &index, t1)
        .unwrap();
    for (trx, mode) in [(t2, LockMode::X), (t3, LockMode::S)] {
        let status = sys
            .rec_lock(mode, LockFlags::ORDINARY, &block, PAGE_HEAP_NO_SUPREMUM, &index, trx)
            .unwrap();
        assert_eq!(status, LockStatus::Granted);
    }
    assert_eq!(sys.kernel().bit_locks(block.id(), PAGE_HEAP_NO_SUPREMUM).len(), 3);
}

#[test]
fn test_insert_intention_does_not_block_gap_locks() {
    let Env { sys, index, .. } = env();
    let mut block = page(10, 2);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    let t3 = sys.trx_begin(RR);

    // Gap before the last user record.
    sys.rec_lock(LockMode::X, LockFlags::GAP, &block, 3, &index, t1).unwrap();
    let (status, _) = sys
        .rec_insert_check_and_lock(OpFlags::NONE, &mut block, 2, &index, t2)
        .unwrap();
    assert_eq!(status, LockStatus::Waiting);

    let status = sys.rec_lock(LockMode::S, LockFlags::GAP, &block, 3, &index, t3).unwrap();
    assert_eq!(status, LockStatus::Granted);

    // Only locks queued ahead of the insert count: t3's gap lock came later.
    sys.commit(t1).unwrap();
    sys.wait_for_grant(t2, SHORT).unwrap();
    assert_eq!(sys.number_of_rows_locked(t2), 1);
}

#[test]
fn test_table_lock_queue() {
    let Env { sys, table, .. } = env();
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    let t3 = sys.trx_begin(RR);

    assert_eq!(sys.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap(), LockStatus::Granted);
    assert_eq!(sys.lock_table(OpFlags::NONE, &table, LockMode::S, t2).unwrap(), LockStatus::Waiting);
    // IS is compatible with both the granted IX and the waiting S.
    assert_eq!(sys.lock_table(OpFlags::NONE, &table, LockMode::IS, t3).unwrap(), LockStatus::Granted);
    assert_eq!(
        sys.lock_table(OpFlags::NO_LOCKING, &table, LockMode::X, t3).unwrap(),
        LockStatus::Granted
    );

    sys.commit(t1).unwrap();
    sys.wait_for_grant(t2, SHORT).unwrap();
    sys.validate().unwrap();

    sys.remove_all_on_table(table.id(), true);
    assert!(sys.kernel().table_queue(table.id()).is_empty());
}

#[test]
fn test_monitor_output() {
    let Env { sys, table, index } = env_with(LockSysConfig::default().with_lock_monitor(true));
    let block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    sys.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 2, &index, t1).unwrap();
    sys.rec_lock(LockMode::S, LockFlags::ORDINARY, &block, 2, &index, t2).unwrap();

    let mut out = String::new();
    assert!(sys.print_info_summary(&mut out, false).unwrap());
    sys.print_info_all_transactions(&mut out).unwrap();
    assert!(out.contains("TRANSACTIONS"));
    assert!(out.contains("LOCK WAIT"));
    assert!(out.contains("TABLE LOCK table `shop`.`orders`"));
    assert!(out.contains("lock_mode X locks rec but not gap"));
    assert!(out.contains("lock mode S waiting"));
}

#[test]
fn test_heir_is_reset_before_inheriting() {
    let Env { sys, index, .. } = env();
    let block = page(10, 3);
    let t1 = sys.trx_begin(RR);
    let t2 = sys.trx_begin(RR);
    sys.rec_lock(LockMode::S, LockFlags::ORDINARY, &block, 3, &index, t1).unwrap();
    sys.rec_lock(LockMode::X, rec_not_gap(), &block, 4, &index, t2).unwrap();

    sys.rec_reset_and_inherit_gap_locks(&block, &block, 4, 3);

    let kernel = sys.kernel();
    let donor: Vec<TrxId> = kernel
        .bit_locks(block.id(), 3)
        .into_iter()
        .map(|id| kernel.lock(id).trx())
        .collect();
    assert_eq!(donor, vec![t1]);
    let heir: Vec<(TrxId, bool)> = kernel
        .bit_locks(block.id(), 4)
        .into_iter()
        .map(|id| (kernel.lock(id).trx(), kernel.lock(id).is_gap()))
        .collect();
    assert_eq!(heir, vec![(t1, true)]);
    drop(kernel);
    assert_eq!(sys.number_of_rows_locked(t2), 0);
}
