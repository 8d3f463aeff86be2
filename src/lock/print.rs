// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Monitor output and lock introspection.

use std::fmt::{self, Write};
use std::mem;
use std::time::Instant;

use crate::page::PageId;
use crate::trx::{ConcState, QueState, TrxId};

use super::kernel::Kernel;
use super::mode::LockMode;
use super::object::{Lock, LockId};

/// Locks printed per transaction in the all-transactions report.
const MAX_LOCKS_PRINTED: usize = 10;

/// Writes `database/table` as `` `database`.`table` ``.
fn write_table_name(out: &mut impl Write, name: &str) -> fmt::Result {
    match name.split_once('/') {
        Some((db, table)) => write!(out, "`{db}`.`{table}`"),
        None => write!(out, "`{name}`"),
    }
}

impl Lock {
    /// Returns the mode as shown in lock monitor tables, e.g. `"X,GAP"`.
    pub fn mode_str(&self) -> &'static str {
        let gap = self.is_record() && self.is_gap();
        match (self.mode(), gap) {
            (LockMode::S, true) => "S,GAP",
            (LockMode::S, false) => "S",
            (LockMode::X, true) => "X,GAP",
            (LockMode::X, false) => "X",
            (LockMode::IS, true) => "IS,GAP",
            (LockMode::IS, false) => "IS",
            (LockMode::IX, true) => "IX,GAP",
            (LockMode::IX, false) => "IX",
            (LockMode::AutoInc, _) => "AUTO_INC",
        }
    }

    pub fn type_str(&self) -> &'static str {
        if self.is_record() {
            "RECORD"
        } else {
            "TABLE"
        }
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        self.table().name()
    }

    /// Returns the index name of a record lock.
    #[inline]
    pub fn index_name(&self) -> Option<&str> {
        self.index().map(|index| index.name())
    }

    #[inline]
    pub fn space_id(&self) -> Option<u32> {
        self.page().map(|page| page.space)
    }

    #[inline]
    pub fn page_no(&self) -> Option<u32> {
        self.page().map(|page| page.page_no)
    }

    /// Returns the in-memory size of a lock struct.
    pub const fn size() -> usize {
        mem::size_of::<Lock>()
    }
}

impl Kernel {
    /// Writes a one-line description of a table lock.
    pub fn table_print(&self, out: &mut impl Write, id: LockId) -> fmt::Result {
        let lock = &self.locks[id];
        debug_assert!(lock.is_table());
        out.write_str("TABLE LOCK table ")?;
        write_table_name(out, lock.table_name())?;
        write!(out, " trx id {}", lock.trx)?;
        match lock.mode() {
            LockMode::AutoInc => out.write_str(" lock mode AUTO-INC")?,
            mode => write!(out, " lock mode {mode}")?,
        }
        if lock.is_wait() {
            out.write_str(" waiting")?;
        }
        out.write_char('\n')
    }

    /// Writes a record lock and the heap numbers it covers.
    pub fn rec_print(&self, out: &mut impl Write, id: LockId) -> fmt::Result {
        let lock = &self.locks[id];
        let rec = lock.rec();
        write!(
            out,
            "RECORD LOCKS {} n bits {} index `{}` of table ",
            rec.page,
            rec.n_bits(),
            rec.index.display_name()
        )?;
        write_table_name(out, lock.table_name())?;
        write!(out, " trx id {}", lock.trx)?;
        match lock.mode() {
            LockMode::X => out.write_str(" lock_mode X")?,
            mode => write!(out, " lock mode {mode}")?,
        }
        if lock.is_gap() {
            out.write_str(" locks gap before rec")?;
        }
        if lock.is_rec_not_gap() {
            out.write_str(" locks rec but not gap")?;
        }
        if lock.is_insert_intention() {
            out.write_str(" insert intention")?;
        }
        if lock.is_wait() {
            out.write_str(" waiting")?;
        }
        out.write_char('\n')?;
        for heap_no in rec.bitmap.iter_ones() {
            writeln!(out, "Record lock, heap no {heap_no}")?;
        }
        Ok(())
    }

    pub(crate) fn lock_print(&self, out: &mut impl Write, id: LockId) -> fmt::Result {
        if self.locks[id].is_record() {
            self.rec_print(out, id)
        } else {
            self.table_print(out, id)
        }
    }

    /// Writes the state line and lock counts of a transaction.
    pub(crate) fn trx_print(&self, out: &mut impl Write, trx: TrxId) -> fmt::Result {
        let Some(t) = self.trx_sys.get(trx) else {
            return writeln!(out, "TRANSACTION {trx}, not registered");
        };
        write!(out, "TRANSACTION {trx}, {}", t.conc_state().as_str())?;
        if t.conc_state() != ConcState::NotStarted {
            if let Some(start) = t.start_time {
                write!(out, " {} sec", Instant::now().duration_since(start).as_secs())?;
            }
        }
        match t.que_state() {
            QueState::Running => {}
            QueState::LockWait => out.write_str(", LOCK WAIT")?,
            QueState::RollingBack => out.write_str(", rolling back")?,
        }
        out.write_char('\n')?;

        let n_locks = t.n_locks();
        if n_locks > 0 {
            write!(
                out,
                "{n_locks} lock struct(s), {} row lock(s)",
                self.number_of_rows_locked(trx)
            )?;
        }
        if t.undo_no() > 0 {
            if n_locks > 0 {
                out.write_str(", ")?;
            }
            write!(out, "undo log entries {}", t.undo_no())?;
        }
        if n_locks > 0 || t.undo_no() > 0 {
            out.write_char('\n')?;
        }
        Ok(())
    }

    /// Counts the records `trx` holds or waits for explicit locks on.
    pub fn number_of_rows_locked(&self, trx: TrxId) -> usize {
        self.trx_locks(trx)
            .into_iter()
            .filter_map(|id| self.locks[id].as_rec())
            .map(|rec| rec.bitmap.count_ones())
            .sum()
    }

    /// Returns true if any explicit record lock exists on the page.
    pub fn rec_expl_exist_on_page(&self, page: PageId) -> bool {
        self.rec_first_on_page(page).is_some()
    }

    /// Writes the header of the transaction section of the monitor output.
    pub fn print_info_summary(&self, out: &mut impl Write) -> fmt::Result {
        if self.deadlock_found {
            out.write_str("------------------------\nLATEST DETECTED DEADLOCK\n------------------------\n")?;
            out.write_str(&self.latest_deadlock)?;
        }
        out.write_str("------------\nTRANSACTIONS\n------------\n")?;
        writeln!(out, "Trx id counter {}", self.trx_sys.max_trx_id())?;
        writeln!(
            out,
            "Total number of lock structs in row lock hash table {}",
            self.n_rec_locks()
        )
    }

    /// Writes every transaction, its read view and lock wait, and with the
    /// lock monitor on, up to ten of its locks.
    pub fn print_info_all_transactions(&self, out: &mut impl Write) -> fmt::Result {
        out.write_str("LIST OF TRANSACTIONS FOR EACH SESSION:\n")?;

        for trx in self.trx_sys.client_list() {
            if self.trx_sys[trx].conc_state() == ConcState::NotStarted {
                out.write_str("---")?;
                self.trx_print(out, trx)?;
            }
        }

        for trx in self.trx_sys.trx_list() {
            let t = &self.trx_sys[trx];
            out.write_str("---")?;
            self.trx_print(out, trx)?;

            if let Some(view) = t.read_view() {
                writeln!(
                    out,
                    "Trx read view will not see trx with id >= {}, sees < {}",
                    view.low_limit_id(),
                    view.up_limit_id()
                )?;
            }

            if t.que_state() == QueState::LockWait {
                let waited = t
                    .wait_started
                    .map_or(0, |s| Instant::now().duration_since(s).as_secs());
                writeln!(
                    out,
                    "------- TRX HAS BEEN WAITING {waited} SEC FOR THIS LOCK TO BE GRANTED:"
                )?;
                if let Some(wait_lock) = t.wait_lock() {
                    self.lock_print(out, wait_lock)?;
                }
                out.write_str("------------------\n")?;
            }

            if !self.config.print_lock_monitor {
                continue;
            }
            for (n, id) in self.trx_locks(trx).into_iter().enumerate() {
                self.lock_print(out, id)?;
                if n + 1 >= MAX_LOCKS_PRINTED {
                    out.write_str("10 LOCKS PRINTED FOR THIS TRX: SUPPRESSING FURTHER PRINTS\n")?;
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dict::{Index, Table};
    use crate::lock::config::LockSysConfig;
    use crate::lock::mode::{LockFlags, OpFlags};
    use crate::lock::wait::ThreadParker;
    use crate::page::Block;
    use crate::trx::IsolationLevel;

    struct Fixture {
        k: Kernel,
        table: Arc<Table>,
        index: Arc<Index>,
        block: Block,
    }

    fn fixture(config: LockSysConfig) -> Fixture {
        let table = Table::new(1, "test/t1");
        let index = Index::clustered(1, "PRIMARY", &table);
        let mut block = Block::new(0, 10);
        for key in ["a", "b", "c"] {
            block.insert(key, TrxId(0));
        }
        Fixture {
            k: Kernel::new(config, Arc::new(ThreadParker::new())),
            table,
            index,
            block,
        }
    }

    #[test]
    fn test_mode_and_type_str() {
        let Fixture {
            mut k,
            table,
            index,
            block,
        } = fixture(LockSysConfig::default());
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        k.rec_lock(false, LockMode::X | LockFlags::GAP, &block, 2, &index, t1)
            .unwrap();

        let locks = k.trx_locks(t1);
        let tab = k.lock(locks[0]);
        let rec = k.lock(locks[1]);
        assert_eq!((tab.type_str(), tab.mode_str()), ("TABLE", "IX"));
        assert_eq!((rec.type_str(), rec.mode_str()), ("RECORD", "X,GAP"));
        assert_eq!(rec.index_name(), Some("PRIMARY"));
        assert_eq!(rec.space_id(), Some(0));
        assert_eq!(rec.page_no(), Some(10));
        assert_eq!(tab.page_no(), None);
        assert_eq!(tab.table_name(), "test/t1");
        assert!(Lock::size() > 0);
    }

    #[test]
    fn test_table_and_rec_print() {
        let Fixture {
            mut k,
            table,
            index,
            block,
        } = fixture(LockSysConfig::default());
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.lock_table(OpFlags::NONE, &table, LockMode::AutoInc, t1).unwrap();
        let s = LockMode::S | LockFlags::REC_NOT_GAP;
        k.rec_lock(false, s, &block, 2, &index, t1).unwrap();
        k.rec_lock(false, s, &block, 4, &index, t1).unwrap();

        let locks = k.trx_locks(t1);
        let mut out = String::new();
        k.table_print(&mut out, locks[0]).unwrap();
        assert_eq!(
            out,
            format!("TABLE LOCK table `test`.`t1` trx id {t1} lock mode AUTO-INC\n")
        );

        out.clear();
        k.rec_print(&mut out, locks[1]).unwrap();
        let mut lines = out.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("RECORD LOCKS space id 0 page no 10 n bits "));
        assert!(header.ends_with("lock mode S locks rec but not gap"));
        assert_eq!(lines.next(), Some("Record lock, heap no 2"));
        assert_eq!(lines.next(), Some("Record lock, heap no 4"));
        assert_eq!(lines.next(), None);
        assert_eq!(k.number_of_rows_locked(t1), 2);
        assert!(k.rec_expl_exist_on_page(block.id()));
        assert!(!k.rec_expl_exist_on_page(PageId::new(0, 11)));
    }

    #[test]
    fn test_trx_print() {
        let Fixture {
            mut k,
            table,
            block,
            index,
        } = fixture(LockSysConfig::default());
        let idle = k.trx_sys.create(IsolationLevel::RepeatableRead);
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.trx_sys.add_undo(t1, 3);
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        k.rec_lock(false, LockMode::X.into(), &block, 3, &index, t1)
            .unwrap();

        let mut out = String::new();
        k.trx_print(&mut out, idle).unwrap();
        assert_eq!(out, format!("TRANSACTION {idle}, not started\n"));

        out.clear();
        k.trx_print(&mut out, t1).unwrap();
        let mut lines = out.lines();
        assert!(lines.next().unwrap().starts_with(&format!("TRANSACTION {t1}, ACTIVE ")));
        assert_eq!(
            lines.next(),
            Some("2 lock struct(s), 1 row lock(s), undo log entries 3")
        );
    }

    #[test]
    fn test_summary_and_all_transactions() {
        let Fixture {
            mut k,
            table,
            index,
            block,
        } = fixture(LockSysConfig::default().with_lock_monitor(true));
        let idle = k.trx_sys.create(IsolationLevel::RepeatableRead);
        let t1 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        let t2 = k.trx_sys.begin(IsolationLevel::RepeatableRead);
        k.trx_sys.open_read_view(t2);
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t1).unwrap();
        for heap_no in 2..5 {
            k.rec_lock(false, LockMode::X.into(), &block, heap_no, &index, t1)
                .unwrap();
        }
        k.lock_table(OpFlags::NONE, &table, LockMode::IX, t2).unwrap();
        k.rec_lock(false, LockMode::S.into(), &block, 2, &index, t2)
            .unwrap();

        let mut out = String::new();
        k.print_info_summary(&mut out).unwrap();
        assert!(!out.contains("LATEST DETECTED DEADLOCK"));
        assert!(out.contains(&format!("Trx id counter {}", k.trx_sys.max_trx_id())));
        assert!(out.ends_with("Total number of lock structs in row lock hash table 2\n"));

        out.clear();
        k.print_info_all_transactions(&mut out).unwrap();
        assert!(out.starts_with("LIST OF TRANSACTIONS FOR EACH SESSION:\n"));
        assert!(out.contains(&format!("---TRANSACTION {idle}, not started")));
        assert!(out.contains("Trx read view will not see trx with id >= "));
        assert!(out.contains("------- TRX HAS BEEN WAITING 0 SEC FOR THIS LOCK TO BE GRANTED:"));
        assert!(out.contains("lock mode S waiting"));
        assert!(out.contains("TABLE LOCK table `test`.`t1`"));
    }
}
