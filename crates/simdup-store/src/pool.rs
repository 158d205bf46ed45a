use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::StoreError;
use crate::backend::{BackendConnection, VectorBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    pub in_use: usize,
    pub idle: usize,
    pub created: usize,
    pub reuse: bool,
}

struct PoolState {
    idle: Vec<Box<dyn BackendConnection>>,
    in_use: usize,
    created: usize,
}

/// Bounded set of backend connections.
///
/// At most `max_connections` handles are checked out at once. Callers beyond
/// that wait up to the acquire timeout. With `reuse` off every release closes
/// the handle instead of parking it.
pub struct ConnectionPool {
    backend: Arc<dyn VectorBackend>,
    state: Mutex<PoolState>,
    released: Condvar,
    max_connections: usize,
    acquire_timeout: Duration,
    reuse: bool,
}

impl ConnectionPool {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        max_connections: usize,
        acquire_timeout: Duration,
        reuse: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                in_use: 0,
                created: 0,
            }),
            released: Condvar::new(),
            max_connections: max_connections.max(1),
            acquire_timeout,
            reuse,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Blocks until a connection is free or the acquire timeout elapses.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StoreError> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;
        let mut state = self.lock_state()?;

        loop {
            if state.in_use < self.max_connections {
                state.in_use += 1;
                let parked = state.idle.pop();
                drop(state);
                return self.check_out(parked);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    max_connections = self.max_connections,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(StoreError::PoolTimeout {
                    waited_ms: started.elapsed().as_millis(),
                });
            }

            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|_| StoreError::LockPoisoned("connection pool"))?;
            state = guard;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            max_connections: self.max_connections,
            in_use: state.in_use,
            idle: state.idle.len(),
            created: state.created,
            reuse: self.reuse,
        }
    }

    fn check_out(
        self: &Arc<Self>,
        parked: Option<Box<dyn BackendConnection>>,
    ) -> Result<PooledConnection, StoreError> {
        let connection = match parked {
            Some(connection) => connection,
            None => match self.backend.connect() {
                Ok(connection) => {
                    self.state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .created += 1;
                    connection
                }
                Err(err) => {
                    self.release(None);
                    return Err(err);
                }
            },
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            connection: Some(connection),
        })
    }

    fn release(&self, connection: Option<Box<dyn BackendConnection>>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_use = state.in_use.saturating_sub(1);
        if self.reuse
            && let Some(connection) = connection
        {
            state.idle.push(connection);
        }
        drop(state);
        self.released.notify_one();
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("connection pool"))
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.backend_name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection. Dropping it hands the handle back to the pool.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Option<Box<dyn BackendConnection>>,
}

impl PooledConnection {
    pub fn get(&mut self) -> Result<&mut (dyn BackendConnection + 'static), StoreError> {
        match self.connection.as_mut() {
            Some(connection) => Ok(connection.as_mut()),
            None => Err(StoreError::ConnectionReleased),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.connection.take());
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::MemoryBackend;

    fn pool(max: usize, timeout_ms: u64, reuse: bool) -> Arc<ConnectionPool> {
        ConnectionPool::new(
            Arc::new(MemoryBackend::new()),
            max,
            Duration::from_millis(timeout_ms),
            reuse,
        )
    }

    #[test]
    fn exhausted_pool_times_out_and_recovers_after_release() {
        let pool = pool(1, 50, true);

        let held = pool.acquire().expect("first connection");
        let err = match pool.acquire() {
            Ok(_) => panic!("pool should be exhausted"),
            Err(err) => err,
        };
        assert!(matches!(err, StoreError::PoolTimeout { .. }));

        drop(held);
        let again = pool.acquire().expect("connection after release");
        drop(again);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.created, 1);
    }

    #[test]
    fn waiting_caller_is_woken_by_release() {
        let pool = pool(1, 2_000, true);
        let held = pool.acquire().expect("first connection");

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        waiter
            .join()
            .expect("waiter thread")
            .expect("waiter acquires after release");
    }

    #[test]
    fn without_reuse_connections_are_not_parked() {
        let pool = pool(2, 50, false);
        drop(pool.acquire().expect("first"));
        drop(pool.acquire().expect("second"));

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.created, 2);
    }
}
