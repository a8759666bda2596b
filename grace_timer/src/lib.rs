use generational_arena::{Arena, Index as ArenaIndex};
use linger::{AbortHandle, Cleanup, Completion};
use log::debug;
use std::{cell::RefCell, rc::Rc};

struct Scheduled {
    deadline: u64,
    /// scheduling order, breaks ties between equal deadlines
    seq: u64,
    completion: Completion,
}
#[derive(Default)]
struct TimerState {
    now: u64,
    next_seq: u64,
    scheduled: Arena<Scheduled>,
}
impl TimerState {
    /// Removes the earliest entry due at or before `until`
    fn pop_due(&mut self, until: u64) -> Option<Scheduled> {
        let index = self
            .scheduled
            .iter()
            .filter(|(_index, s)| s.deadline <= until)
            .min_by_key(|(_index, s)| (s.deadline, s.seq))
            .map(|(index, _s)| index)?;
        self.scheduled.remove(index)
    }
}
/// Grace window scheduler driven by explicit ticks.
///
/// Completions handed to [`GraceTimer::schedule`] fire once the timer has advanced past
/// their delay. Clones share the same schedule.
/// ```
/// # use grace_timer::GraceTimer;
/// # use linger::Completion;
/// # use std::{cell::Cell, rc::Rc};
/// let timer = GraceTimer::default();
/// let fired = Rc::new(Cell::new(false));
/// let f = fired.clone();
/// let _abort = timer.schedule(3, Completion::new(move || f.set(true)));
/// assert_eq!(timer.advance(2), 0);
/// assert!(!fired.get());
/// assert_eq!(timer.advance(1), 1);
/// assert!(fired.get());
/// ```
#[derive(Clone, Default)]
pub struct GraceTimer {
    state: Rc<RefCell<TimerState>>,
}
impl GraceTimer {
    pub fn now(&self) -> u64 {
        self.state.borrow().now
    }
    /// Number of completions waiting for their deadline
    pub fn pending(&self) -> usize {
        self.state.borrow().scheduled.len()
    }
    /// Schedules `completion` to fire `delay` ticks from now. A delay of zero completes
    /// before returning.
    ///
    /// The returned handle cancels the completion if it has not fired yet.
    /// ```
    /// # use grace_timer::GraceTimer;
    /// # use linger::Completion;
    /// let timer = GraceTimer::default();
    /// let abort = timer.schedule(5, Completion::new(|| panic!("aborted completion fired")));
    /// assert_eq!(timer.pending(), 1);
    /// abort.abort().unwrap();
    /// assert_eq!(timer.pending(), 0);
    /// assert_eq!(timer.advance(10), 0);
    /// ```
    pub fn schedule(&self, delay: u64, completion: Completion) -> AbortHandle {
        if delay == 0 {
            completion.complete();
            return AbortHandle::noop();
        }
        let index = {
            let mut state = self.state.borrow_mut();
            let deadline = state.now + delay;
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!("scheduled completion for tick {}", deadline);
            state.scheduled.insert(Scheduled {
                deadline,
                seq,
                completion,
            })
        };
        self.abort_handle(index)
    }
    fn abort_handle(&self, index: ArenaIndex) -> AbortHandle {
        let state = Rc::downgrade(&self.state);
        AbortHandle::new(move || {
            if let Some(state) = state.upgrade() {
                // a fired or reused slot no longer matches the index generation
                if let Some(scheduled) = state.borrow_mut().scheduled.remove(index) {
                    debug!("cancelled completion due at tick {}", scheduled.deadline);
                }
            }
            Ok(())
        })
    }
    /// Moves time forward by `ticks`, firing every completion that comes due in deadline
    /// order. Returns how many completions fired.
    pub fn advance(&self, ticks: u64) -> usize {
        let until = self.state.borrow().now + ticks;
        let mut fired = 0;
        loop {
            let due = {
                let mut state = self.state.borrow_mut();
                let due = state.pop_due(until);
                if let Some(scheduled) = due.as_ref() {
                    state.now = scheduled.deadline;
                }
                due
            };
            match due {
                Some(scheduled) => {
                    scheduled.completion.complete();
                    fired += 1;
                }
                None => break,
            }
        }
        self.state.borrow_mut().now = until;
        fired
    }
    /// Cleanup initiator that lets every released key linger for `delay` ticks
    pub fn cleanup(&self, delay: u64) -> GraceCleanup {
        GraceCleanup {
            timer: self.clone(),
            delay,
        }
    }
}
pub struct GraceCleanup {
    timer: GraceTimer,
    delay: u64,
}
impl<K> Cleanup<K> for GraceCleanup {
    fn begin(&self, _key: &K, done: Completion) -> anyhow::Result<AbortHandle> {
        Ok(self.timer.schedule(self.delay, done))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use linger::{Registry, RoundState};
    use std::cell::Cell;
    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Completion {
        let log = log.clone();
        Completion::new(move || log.borrow_mut().push(name))
    }
    #[test]
    fn fires_in_deadline_order() {
        let timer = GraceTimer::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        timer.schedule(4, recorder(&log, "late"));
        timer.schedule(2, recorder(&log, "early"));
        timer.schedule(2, recorder(&log, "early tie"));
        assert_eq!(timer.pending(), 3);
        assert_eq!(timer.advance(10), 3);
        assert_eq!(*log.borrow(), vec!["early", "early tie", "late"]);
        assert_eq!(timer.now(), 10);
        assert_eq!(timer.pending(), 0);
    }
    #[test]
    fn zero_delay_completes_immediately() {
        let timer = GraceTimer::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        timer.schedule(0, recorder(&log, "now"));
        assert_eq!(*log.borrow(), vec!["now"]);
        assert_eq!(timer.pending(), 0);
    }
    #[test]
    fn abort_after_fire_is_noop() {
        let timer = GraceTimer::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let stale = timer.schedule(1, recorder(&log, "first"));
        assert_eq!(timer.advance(1), 1);
        // reuses the freed arena slot
        let _live = timer.schedule(1, recorder(&log, "second"));
        stale.abort().unwrap();
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.advance(1), 1);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }
    #[test]
    fn completion_may_schedule_more() {
        let timer = GraceTimer::default();
        let count = Rc::new(Cell::new(0));
        let (t, c) = (timer.clone(), count.clone());
        timer.schedule(
            1,
            Completion::new(move || {
                c.set(c.get() + 1);
                let c = c.clone();
                t.schedule(1, Completion::new(move || c.set(c.get() + 1)));
            }),
        );
        assert_eq!(timer.advance(5), 2);
        assert_eq!(count.get(), 2);
    }
    #[test]
    fn registry_lingers_for_grace_window() {
        let timer = GraceTimer::default();
        let created = Rc::new(Cell::new(0));
        let c = created.clone();
        let registry: Registry<&'static str, u32> = Registry::with_hash_map(
            move |_key: &&'static str| {
                c.set(c.get() + 1);
                Ok(c.get())
            },
            timer.cleanup(3),
        );
        let (_, mut release) = registry.obtain("pool").unwrap();
        release.release().unwrap();
        assert_eq!(timer.advance(2), 0);
        assert_eq!(
            registry.round_state(&"pool"),
            Some(RoundState::AwaitingAsyncCompletion { epoch: 1 })
        );

        // reclaimed inside the window, so the resource is reused
        let (value, mut release) = registry.obtain("pool").unwrap();
        assert_eq!(value, 1);
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance(5), 0);
        assert!(registry.contains(&"pool"));

        release.release().unwrap();
        assert_eq!(timer.advance(3), 1);
        assert!(registry.is_empty());
        let (value, _release) = registry.obtain("pool").unwrap();
        assert_eq!(value, 2);
    }
    #[test]
    fn zero_grace_removes_on_release() {
        let timer = GraceTimer::default();
        let registry: Registry<u32, u32> =
            Registry::with_hash_map(|key: &u32| Ok(*key), timer.cleanup(0));
        let (_, mut release) = registry.obtain(8).unwrap();
        release.release().unwrap();
        assert!(registry.is_empty());
        assert_eq!(timer.pending(), 0);
    }
}
