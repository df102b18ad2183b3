//! Background watcher for contract events.
//!
//! A plain thread polls the ledger for new logs of one event, walking the
//! chain in bounded block ranges, and hands each log to a callback exactly
//! once. The thread sleeps on a stop channel between polls, so `stop()`
//! returns without waiting out the interval.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alloy::primitives::{Address, B256};

use super::ledger::{LedgerClient, LedgerError};
use crate::domain::{LedgerEvent, LogQuery, RawLog};
use crate::ports::{ContractStore, Ledger};

/// Event the contract emits for every recorded action.
pub const DEFAULT_EVENT: &str = "ActionLogged";

/// Polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub event: String,
    pub poll_interval: Duration,
    /// Most blocks requested in one `eth_getLogs` call
    pub max_block_range: u64,
    /// First block to scan; `None` starts after the current head
    pub start_block: Option<u64>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            poll_interval: Duration::from_secs(10),
            max_block_range: 1_000,
            start_block: None,
        }
    }
}

/// Cursor over one event's logs.
#[derive(Debug)]
pub struct EventPoller {
    name: String,
    address: Address,
    topic0: B256,
    next_block: u64,
    max_block_range: u64,
}

impl EventPoller {
    /// Resolve the event against the loaded contract and place the cursor.
    ///
    /// # Errors
    /// `ContractNotLoaded`, `UnknownFunction` for a missing event, or
    /// `ChainConnection`/`ReadFailed` if the head cannot be read.
    pub fn new<L, C>(client: &LedgerClient<L, C>, settings: &WatchSettings) -> Result<Self, LedgerError>
    where
        L: Ledger,
        C: ContractStore,
    {
        let (address, event) = client.event(&settings.event)?;
        let next_block = match settings.start_block {
            Some(block) => block,
            None => head(client.ledger()?.as_ref())? + 1,
        };

        Ok(Self {
            name: settings.event.clone(),
            address,
            topic0: event.selector(),
            next_block,
            max_block_range: settings.max_block_range.max(1),
        })
    }

    /// Next block that has not been scanned.
    #[must_use]
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Scan every block up to the current head and dispatch new logs.
    ///
    /// The cursor moves past a range only after all its logs were handed
    /// over, so a failed poll rescans the same range next time.
    ///
    /// # Errors
    /// `ReadFailed` if the node cannot be queried.
    pub fn poll<L, F>(&mut self, ledger: &L, dispatch: &mut F) -> Result<usize, LedgerError>
    where
        L: Ledger,
        F: FnMut(LedgerEvent),
    {
        let head = head(ledger)?;
        let mut dispatched = 0;

        while self.next_block <= head {
            let to_block = head.min(self.next_block.saturating_add(self.max_block_range - 1));
            let query = LogQuery {
                address: self.address,
                topic0: Some(self.topic0),
                from_block: self.next_block,
                to_block,
            };

            let mut logs = ledger.logs(&query).map_err(|e| LedgerError::ReadFailed {
                function: format!("logs {}", self.name),
                reason: e.to_string(),
            })?;
            logs.sort_by_key(|log: &RawLog| (log.block_number, log.log_index));

            for log in logs {
                dispatch(LedgerEvent {
                    name: self.name.clone(),
                    log,
                });
                dispatched += 1;
            }
            self.next_block = to_block + 1;
        }

        Ok(dispatched)
    }
}

fn head<L: Ledger>(ledger: &L) -> Result<u64, LedgerError> {
    ledger.block_number().map_err(|e| LedgerError::ReadFailed {
        function: "blockNumber".to_string(),
        reason: e.to_string(),
    })
}

/// Handle to a running watcher.
pub struct EventWatcherHandle {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EventWatcherHandle {
    /// Ask the watcher to stop and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Event watcher thread panicked");
            }
        }
    }
}

impl Drop for EventWatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns event polling threads.
pub struct EventWatcher;

impl EventWatcher {
    /// Start polling; `on_event` runs on the watcher thread.
    ///
    /// # Errors
    /// Fails up front if the event cannot be resolved or the node is
    /// offline; later RPC failures are logged and retried on the next poll.
    pub fn spawn<L, C, F>(
        client: Arc<LedgerClient<L, C>>,
        settings: WatchSettings,
        mut on_event: F,
    ) -> Result<EventWatcherHandle, LedgerError>
    where
        L: Ledger + 'static,
        C: ContractStore + 'static,
        F: FnMut(LedgerEvent) + Send + 'static,
    {
        let mut poller = EventPoller::new(&client, &settings)?;
        let ledger = Arc::clone(client.ledger()?);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        tracing::info!(
            event = %settings.event,
            from_block = poller.next_block(),
            interval_ms = settings.poll_interval.as_millis() as u64,
            "Event watcher started"
        );

        let handle = thread::spawn(move || loop {
            match poller.poll(ledger.as_ref(), &mut on_event) {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, next_block = poller.next_block(), "Events dispatched"),
                Err(e) => tracing::warn!(error = %e, "Event poll failed, retrying"),
            }

            match stop_rx.recv_timeout(settings.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!(event = %settings.event, "Event watcher stopped");
                    break;
                }
            }
        });

        Ok(EventWatcherHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::LedgerSettings;
    use crate::application::test_support::*;
    use std::time::Instant;

    fn client(ledger: &Arc<FakeLedger>) -> Arc<LedgerClient<FakeLedger, MemoryContractStore>> {
        let client = LedgerClient::new(
            Arc::clone(ledger),
            MemoryContractStore::holding(test_reference()),
            LedgerSettings::default(),
        )
        .expect("Should connect");
        client.load_contract();
        Arc::new(client)
    }

    fn settings(start_block: Option<u64>) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(10),
            max_block_range: 2,
            start_block,
            ..WatchSettings::default()
        }
    }

    #[test]
    fn test_each_log_dispatched_once() {
        let ledger = Arc::new(FakeLedger::default());
        let client = client(&ledger);
        let mut poller = EventPoller::new(&client, &settings(Some(1))).expect("Should resolve event");

        ledger.push_log(2, 0);
        ledger.push_log(2, 1);
        ledger.push_log(5, 0);

        let mut seen = Vec::new();
        let mut collect = |event: LedgerEvent| seen.push(event);
        assert_eq!(poller.poll(ledger.as_ref(), &mut collect).expect("Should poll"), 3);
        assert_eq!(poller.poll(ledger.as_ref(), &mut collect).expect("Should poll"), 0);

        ledger.push_log(6, 0);
        assert_eq!(poller.poll(ledger.as_ref(), &mut collect).expect("Should poll"), 1);
        assert_eq!(poller.next_block(), 7);

        let order: Vec<_> = seen
            .iter()
            .map(|e| (e.log.block_number, e.log.log_index))
            .collect();
        assert_eq!(
            order,
            vec![(Some(2), Some(0)), (Some(2), Some(1)), (Some(5), Some(0)), (Some(6), Some(0))]
        );
        assert!(seen.iter().all(|e| e.name == DEFAULT_EVENT));
    }

    #[test]
    fn test_ranges_are_bounded() {
        let ledger = Arc::new(FakeLedger::default());
        let client = client(&ledger);
        let mut poller = EventPoller::new(&client, &settings(Some(1))).expect("Should resolve event");
        ledger.push_log(7, 0);

        let before = ledger.calls().iter().filter(|c| **c == "eth_getLogs").count();
        poller.poll(ledger.as_ref(), &mut |_: LedgerEvent| {}).expect("Should poll");
        let after = ledger.calls().iter().filter(|c| **c == "eth_getLogs").count();

        // Blocks 1..=7 in ranges of two.
        assert_eq!(after - before, 4);
    }

    #[test]
    fn test_default_start_skips_history() {
        let ledger = Arc::new(FakeLedger::default());
        ledger.push_log(3, 0);
        let client = client(&ledger);

        let mut poller = EventPoller::new(&client, &settings(None)).expect("Should resolve event");
        assert_eq!(poller.next_block(), 4);
        assert_eq!(poller.poll(ledger.as_ref(), &mut |_: LedgerEvent| {}).expect("Should poll"), 0);
    }

    #[test]
    fn test_failed_poll_keeps_cursor() {
        let ledger = Arc::new(FakeLedger::default());
        let client = client(&ledger);
        let mut poller = EventPoller::new(&client, &settings(Some(1))).expect("Should resolve event");
        ledger.push_log(2, 0);

        ledger.state.lock().expect("Lock failed").unreachable = true;
        assert!(matches!(
            poller.poll(ledger.as_ref(), &mut |_: LedgerEvent| {}),
            Err(LedgerError::ReadFailed { .. })
        ));
        assert_eq!(poller.next_block(), 1);

        ledger.state.lock().expect("Lock failed").unreachable = false;
        assert_eq!(poller.poll(ledger.as_ref(), &mut |_: LedgerEvent| {}).expect("Should poll"), 1);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let ledger = Arc::new(FakeLedger::default());
        let client = client(&ledger);
        let settings = WatchSettings {
            event: "NoSuchEvent".to_string(),
            ..settings(Some(1))
        };
        assert!(matches!(
            EventWatcher::spawn(client, settings, |_| {}),
            Err(LedgerError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_watcher_thread_dispatches_and_stops() {
        let ledger = Arc::new(FakeLedger::default());
        let client = client(&ledger);
        let (tx, rx) = mpsc::channel();

        let handle = EventWatcher::spawn(client, settings(Some(1)), move |event| {
            let _ = tx.send(event);
        })
        .expect("Should spawn");

        ledger.push_log(2, 0);
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("Should receive event");
        assert_eq!(event.log.block_number, Some(2));

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
