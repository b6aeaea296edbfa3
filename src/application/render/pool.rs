use super::worker::Worker;

/// State of one worker position. A slot is in exactly one state, so a worker
/// can never be idle and busy at once.
#[derive(Debug)]
pub(crate) enum Slot {
    Idle(Worker),
    /// Checked out to a running job.
    Busy,
    Closed,
}

/// Arena of worker slots owned by the cluster.
#[derive(Debug, Default)]
pub(crate) struct WorkerPool {
    slots: Vec<Slot>,
}

impl WorkerPool {
    pub(crate) fn new(workers: Vec<Worker>) -> Self {
        Self {
            slots: workers.into_iter().map(Slot::Idle).collect(),
        }
    }

    /// Takes the first idle worker, leaving its slot busy.
    pub(crate) fn checkout(&mut self) -> Option<(usize, Worker)> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Idle(_)))?;
        match std::mem::replace(&mut self.slots[index], Slot::Busy) {
            Slot::Idle(worker) => Some((index, worker)),
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    pub(crate) fn checkin(&mut self, slot: usize, worker: Worker) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Slot::Idle(worker);
        }
    }

    pub(crate) fn mark_closed(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Slot::Closed;
        }
    }

    /// Removes every idle worker, closing its slot.
    pub(crate) fn take_idle(&mut self) -> Vec<Worker> {
        let mut workers = Vec::new();
        for slot in &mut self.slots {
            if matches!(slot, Slot::Idle(_))
                && let Slot::Idle(worker) = std::mem::replace(slot, Slot::Closed)
            {
                workers.push(worker);
            }
        }
        workers
    }

    pub(crate) fn idle(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Idle(_)))
    }

    pub(crate) fn busy(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Busy))
    }

    /// Idle plus busy workers.
    pub(crate) fn live(&self) -> usize {
        self.count(|slot| !matches!(slot, Slot::Closed))
    }

    fn count(&self, predicate: impl Fn(&Slot) -> bool) -> usize {
        self.slots.iter().filter(|slot| predicate(slot)).count()
    }
}
