//! Pinned connection pool
//!
//! A dump holds one consistent-snapshot transaction per pooled connection
//! for its whole duration; every table chunk runs on one of these pinned
//! connections. The pool is a bounded FIFO: `get_conn` blocks while every
//! connection is handed out.

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::{DumpError, Result};

/// Open a connection pinned to a repeatable-read consistent snapshot.
pub async fn create_conn_with_consistency(opts: Opts) -> Result<Conn> {
    let mut conn = Conn::new(opts)
        .await
        .map_err(|e| DumpError::connection(e.to_string()))?;

    let query = "SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ";
    conn.query_drop(query)
        .await
        .map_err(|e| DumpError::query(query, e))?;

    let query = "START TRANSACTION /*!40108 WITH CONSISTENT SNAPSHOT */";
    conn.query_drop(query)
        .await
        .map_err(|e| DumpError::query(query, e))?;

    Ok(conn)
}

/// Bounded FIFO of pinned connections.
pub struct ConnectionPool {
    tx: mpsc::Sender<Conn>,
    rx: Mutex<mpsc::Receiver<Conn>>,
}

impl ConnectionPool {
    /// Open `size` consistent-snapshot connections against `opts`.
    pub async fn with_consistency(opts: Opts, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(size);
        for _ in 0..size {
            let conn = create_conn_with_consistency(opts.clone()).await?;
            tx.send(conn)
                .await
                .map_err(|_| DumpError::connection("connection pool is closed"))?;
        }
        info!(connections = size, "consistent snapshot pool ready");
        Ok(Self {
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Build a pool from already-prepared connections.
    pub async fn from_conns(conns: Vec<Conn>) -> Self {
        let (tx, rx) = mpsc::channel(conns.len().max(1));
        for conn in conns {
            // capacity matches the connection count, so this never blocks
            let _ = tx.send(conn).await;
        }
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Take a connection; blocks while all are handed out.
    pub async fn get_conn(&self) -> Result<Conn> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| DumpError::connection("connection pool is closed"))
    }

    /// Return a connection to the pool.
    pub async fn release_conn(&self, conn: Conn) {
        // capacity equals the number of pooled connections
        let _ = self.tx.send(conn).await;
    }

    /// Disconnect every pooled connection.
    pub async fn close(self) -> Result<()> {
        let Self { tx, rx } = self;
        drop(tx);
        let mut rx = rx.into_inner();
        while let Some(conn) = rx.recv().await {
            debug!("disconnecting pooled connection");
            conn.disconnect()
                .await
                .map_err(|e| DumpError::connection(e.to_string()))?;
        }
        Ok(())
    }
}
