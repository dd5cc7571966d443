use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// At most one execution at a time. A trigger while a run is in flight gets
/// `None` and does nothing; the guard releases the slot on drop, including
/// on panic.
#[derive(Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<FlightGuard> {
        if self.running.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(FlightGuard {
                running: self.running.clone(),
            })
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_refused_until_guard_drops() {
        let flight = SingleFlight::new();

        let guard = flight.try_begin();
        assert!(guard.is_some());
        assert!(flight.try_begin().is_none());
        assert!(flight.is_running());

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_begin().is_some());
    }

    #[tokio::test]
    async fn rapid_double_trigger_runs_exactly_once() {
        use std::sync::atomic::AtomicU32;

        let flight = SingleFlight::new();
        let executions = Arc::new(AtomicU32::new(0));

        // Two triggers land while the first body is still in flight; only
        // one body task is spawned.
        let mut handles = Vec::new();
        for _ in 0..2 {
            if let Some(guard) = flight.try_begin() {
                let executions = executions.clone();
                handles.push(tokio::spawn(async move {
                    let _guard = guard;
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
