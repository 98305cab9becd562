//! Nested transaction log of compensating operations.
//!
//! A frame stack where each frame holds the compensations recorded since the
//! matching `begin`. `rollback` hands the frame's compensations back in LIFO
//! order for the owner to apply; `commit` appends them to the parent frame so
//! a later parent-level rollback still undoes them. Frames must be finished
//! in LIFO order; violating the protocol is a bug in the engine, not a match
//! failure, and panics.

/// Token identifying an open transaction. Obtained from [`TransactionLog::begin`]
/// and consumed by exactly one `commit` or `rollback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tx {
    depth: usize,
}

#[derive(Debug)]
pub struct TransactionLog<Op> {
    // frames[0] is the sentinel "no transaction" frame; it never rolls back
    // and compensations committed into it are dropped.
    frames: Vec<Vec<Op>>,
}

impl<Op> TransactionLog<Op> {
    pub fn new() -> Self {
        TransactionLog {
            frames: vec![Vec::new()],
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn begin(&mut self) -> Tx {
        self.frames.push(Vec::new());
        Tx {
            depth: self.frames.len() - 1,
        }
    }

    /// Records a compensating operation in the innermost open transaction.
    /// Outside any transaction the operation is dropped: there is nothing to
    /// roll back to.
    pub fn record(&mut self, op: Op) {
        if self.frames.len() > 1 {
            self.frames.last_mut().expect("frames is never empty").push(op);
        }
    }

    fn finish(&mut self, tx: Tx) -> Vec<Op> {
        assert!(
            tx.depth == self.frames.len() - 1,
            "transaction order violation: finishing a transaction with live children"
        );
        assert!(tx.depth > 0, "cannot finish the sentinel transaction frame");
        self.frames.pop().expect("frame checked above")
    }

    /// Commits: the transaction's compensations become the parent's.
    pub fn commit(&mut self, tx: Tx) {
        let ops = self.finish(tx);
        if self.frames.len() > 1 {
            self.frames
                .last_mut()
                .expect("frames is never empty")
                .extend(ops);
        }
    }

    /// Rolls back: returns the compensations in application (LIFO) order.
    #[must_use = "rollback compensations must be applied by the caller"]
    pub fn rollback(&mut self, tx: Tx) -> Vec<Op> {
        let mut ops = self.finish(tx);
        ops.reverse();
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_returns_lifo() {
        let mut log: TransactionLog<i32> = TransactionLog::new();
        let tx = log.begin();
        log.record(1);
        log.record(2);
        log.record(3);
        assert_eq!(log.rollback(tx), vec![3, 2, 1]);
        assert!(!log.in_transaction());
    }

    #[test]
    fn commit_inherits_into_parent() {
        let mut log: TransactionLog<i32> = TransactionLog::new();
        let outer = log.begin();
        log.record(1);

        let inner = log.begin();
        log.record(2);
        log.commit(inner);

        // A parent-level rollback still undoes the child's work.
        assert_eq!(log.rollback(outer), vec![2, 1]);
    }

    #[test]
    fn commit_into_sentinel_drops_ops() {
        let mut log: TransactionLog<i32> = TransactionLog::new();
        let tx = log.begin();
        log.record(7);
        log.commit(tx);
        assert!(!log.in_transaction());

        // Nothing recorded outside a transaction.
        log.record(9);
        let tx = log.begin();
        assert_eq!(log.rollback(tx), Vec::<i32>::new());
    }

    #[test]
    #[should_panic(expected = "transaction order violation")]
    fn out_of_order_commit_panics() {
        let mut log: TransactionLog<i32> = TransactionLog::new();
        let outer = log.begin();
        let _inner = log.begin();
        log.commit(outer);
    }

    #[test]
    #[should_panic(expected = "sentinel")]
    fn finishing_sentinel_panics() {
        let mut log: TransactionLog<i32> = TransactionLog::new();
        let tx = log.begin();
        log.commit(tx);
        // Forged token pointing at the sentinel frame.
        let _ = log.rollback(Tx { depth: 0 });
    }
}
