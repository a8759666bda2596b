use super::cleanup::AbortHandle;
use super::error::RegistryError;

/// Observable state of an entry's cleanup round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    /// At least one release token is outstanding.
    Live,
    /// No references and no round in flight. Seen between a zero crossing and the start
    /// of its round, or after a cleanup initiator or abort handle failed.
    Idle,
    /// The cleanup initiator for round `epoch` has not returned yet.
    AwaitingSyncCompletion { epoch: u64 },
    /// The initiator returned without completing; round `epoch` can still be aborted.
    AwaitingAsyncCompletion { epoch: u64 },
}

enum Round {
    Live,
    Idle,
    AwaitingSync { epoch: u64 },
    AwaitingAsync { epoch: u64, abort: AbortHandle },
}

/// The registry's record for one resident key.
pub struct Entry<V> {
    value: V,
    refs: usize,
    round: Round,
}
impl<V> Entry<V> {
    /// Entry created for the first consumer of a key
    pub(crate) fn new(value: V) -> Self {
        Self {
            value,
            refs: 1,
            round: Round::Live,
        }
    }
    pub fn value(&self) -> &V {
        &self.value
    }
    pub fn ref_count(&self) -> usize {
        self.refs
    }
    pub fn round_state(&self) -> RoundState {
        match self.round {
            Round::Live => RoundState::Live,
            Round::Idle => RoundState::Idle,
            Round::AwaitingSync { epoch } => RoundState::AwaitingSyncCompletion { epoch },
            Round::AwaitingAsync { epoch, .. } => RoundState::AwaitingAsyncCompletion { epoch },
        }
    }
    /// Adds a reference to an entry that is already in use.
    pub(crate) fn share(&mut self) {
        assert!(self.refs > 0);
        self.refs += 1;
    }
    /// Clears the pending round of an unreferenced entry so it can be revived. Returns the
    /// abort handle that must be invoked before the entry is handed out again.
    pub(crate) fn take_abort(&mut self) -> Result<Option<AbortHandle>, RegistryError> {
        assert_eq!(self.refs, 0);
        match std::mem::replace(&mut self.round, Round::Idle) {
            Round::AwaitingAsync { abort, .. } => Ok(Some(abort)),
            Round::Idle => Ok(None),
            Round::AwaitingSync { epoch } => {
                // the initiator of this round is still running and has asked for the key back
                self.round = Round::AwaitingSync { epoch };
                Err(RegistryError::Reentrant)
            }
            Round::Live => unreachable!("unreferenced entry marked live"),
        }
    }
    /// Revives an idle entry with a single reference.
    pub(crate) fn revive(&mut self) {
        assert_eq!(self.refs, 0);
        assert!(matches!(self.round, Round::Idle));
        self.refs = 1;
        self.round = Round::Live;
    }
    /// Gives up one reference. Returns true when that was the last one, leaving the entry
    /// idle until its cleanup round starts.
    pub(crate) fn drop_reference(&mut self) -> bool {
        assert!(self.refs > 0, "reference released on an unreferenced entry");
        self.refs -= 1;
        if self.refs == 0 {
            self.round = Round::Idle;
        }
        self.refs == 0
    }
    pub(crate) fn begin_round(&mut self, epoch: u64) {
        assert!(matches!(self.round, Round::Idle));
        self.round = Round::AwaitingSync { epoch };
    }
    /// Publishes the abort handle of a round whose initiator returned without completing.
    /// Hands the abort handle back if round `epoch` is no longer the current one.
    pub(crate) fn publish_abort(&mut self, epoch: u64, abort: AbortHandle) -> Result<(), AbortHandle> {
        match self.round {
            Round::AwaitingSync { epoch: current } if current == epoch => {
                self.round = Round::AwaitingAsync { epoch, abort };
                Ok(())
            }
            _ => Err(abort),
        }
    }
    /// Marks round `epoch` as abandoned after its initiator failed.
    pub(crate) fn stall(&mut self, epoch: u64) {
        if self.is_current_round(epoch) {
            self.round = Round::Idle;
        }
    }
    pub(crate) fn is_current_round(&self, epoch: u64) -> bool {
        match self.round {
            Round::AwaitingSync { epoch: current } | Round::AwaitingAsync { epoch: current, .. } => {
                current == epoch
            }
            Round::Live | Round::Idle => false,
        }
    }
    /// The entry is live exactly when it is referenced.
    #[cfg_attr(not(feature = "state_validation"), allow(dead_code))]
    pub(crate) fn check_state(&self) {
        assert_eq!(
            self.ref_count() > 0,
            self.round_state() == RoundState::Live,
            "entry with {} references in round state {:?}",
            self.ref_count(),
            self.round_state()
        );
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};
    fn released(value: &'static str) -> Entry<&'static str> {
        let mut entry = Entry::new(value);
        assert!(entry.drop_reference());
        entry
    }
    #[test]
    fn new_entry_is_live() {
        let entry = Entry::new(5);
        assert_eq!(*entry.value(), 5);
        assert_eq!(entry.ref_count(), 1);
        assert_eq!(entry.round_state(), RoundState::Live);
        entry.check_state();
    }
    #[test]
    fn shared_entry_stays_live() {
        let mut entry = Entry::new(5);
        entry.share();
        assert!(!entry.drop_reference());
        assert_eq!(entry.round_state(), RoundState::Live);
        assert_eq!(entry.ref_count(), 1);
        assert!(entry.drop_reference());
        assert_eq!(entry.round_state(), RoundState::Idle);
        entry.check_state();
    }
    #[test]
    fn published_round_can_be_aborted() {
        let mut entry = released("pool");
        entry.begin_round(3);
        assert_eq!(
            entry.round_state(),
            RoundState::AwaitingSyncCompletion { epoch: 3 }
        );
        let aborted = Rc::new(Cell::new(false));
        let a = aborted.clone();
        assert!(entry
            .publish_abort(
                3,
                AbortHandle::new(move || {
                    a.set(true);
                    Ok(())
                })
            )
            .is_ok());
        assert_eq!(
            entry.round_state(),
            RoundState::AwaitingAsyncCompletion { epoch: 3 }
        );
        assert!(entry.is_current_round(3));
        entry.take_abort().unwrap().unwrap().abort().unwrap();
        assert!(aborted.get());
        assert!(!entry.is_current_round(3));
        entry.revive();
        assert_eq!(entry.ref_count(), 1);
        entry.check_state();
    }
    #[test]
    fn stale_round_gets_abort_back() {
        let mut entry = released("pool");
        entry.begin_round(1);
        entry.stall(1);
        assert_eq!(entry.round_state(), RoundState::Idle);
        assert!(entry.publish_abort(1, AbortHandle::noop()).is_err());
        assert!(entry.take_abort().unwrap().is_none());
    }
    #[test]
    #[should_panic]
    fn releasing_unreferenced_entry_panics() {
        let mut entry = released("pool");
        entry.drop_reference();
    }
    #[test]
    fn reviving_during_initiator_is_reentrant() {
        let mut entry = released("pool");
        entry.begin_round(9);
        match entry.take_abort() {
            Err(RegistryError::Reentrant) => (),
            _ => panic!("expected reentrant error"),
        }
        assert_eq!(
            entry.round_state(),
            RoundState::AwaitingSyncCompletion { epoch: 9 }
        );
    }
}
