use std::time::Duration;

use tokio::task::JoinHandle;

/// A single replaceable timer. Arming aborts whatever was armed before, and
/// every arm or cancel moves the generation on, so a tick that was already
/// queued by a superseded timer can be recognised and ignored.
#[derive(Debug, Default)]
pub struct TimerSlot {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `fire` once after `delay` with the generation it was armed under.
    pub fn arm_once<F>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation);
        }));
        generation
    }

    /// Calls `tick` every `period` until it returns `false`.
    pub fn arm_interval<F>(&mut self, period: Duration, mut tick: F) -> u64
    where
        F: FnMut(u64) -> bool + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if !tick(generation) {
                    break;
                }
            }
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && self.generation == generation
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
