use anyhow::{Result, anyhow};
use log::error;
use std::thread::{self, JoinHandle};

use super::{PeriodicTask, TaskReport};

/// One OS thread per periodic task.
pub struct ThreadedExecutor {
    handles: Vec<(String, JoinHandle<TaskReport>)>,
}

impl ThreadedExecutor {
    pub fn run(tasks: Vec<PeriodicTask>) -> Result<ThreadedExecutor> {
        let mut exec = ThreadedExecutor { handles: vec![] };

        for task in tasks.into_iter() {
            let name = task.name().to_string();

            let handle = thread::Builder::new()
                .name(format!("sample-{name}"))
                .spawn(move || task.run())?;

            exec.handles.push((name, handle));
        }

        Ok(exec)
    }

    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, h)| h.is_finished())
    }

    /// Waits for every task to stop. A task that panicked is reported as an
    /// error once all the others have been joined.
    pub fn join(self) -> Result<Vec<TaskReport>> {
        let mut reports = vec![];
        let mut res = Ok(());

        for (name, h) in self.handles {
            match h.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    error!("Sampling task '{name}' panicked");
                    res = Err(anyhow!("Sampling task '{name}' panicked"));
                }
            }
        }

        res.map(|_| reports)
    }
}
