use crate::model::{Arguments, Binding, Exchange, ExchangeType, MsgQueue};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing::info;

const META_FILE: &str = "meta.db";

/// SQLite store for exchange, queue and binding definitions
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    /// Opens `<data_dir>/meta.db`.
    ///
    /// A database created by this call gets its tables and the durable DIRECT exchange
    /// `default_exchange`.
    pub fn open<P: AsRef<Path>>(data_dir: P, default_exchange: &str) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(META_FILE);
        let fresh = !db_path.exists();

        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS exchange (
                name TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                durable INTEGER NOT NULL,
                auto_delete INTEGER NOT NULL,
                arguments TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                name TEXT PRIMARY KEY,
                durable INTEGER NOT NULL,
                exclusive INTEGER NOT NULL,
                auto_delete INTEGER NOT NULL,
                arguments TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS binding (
                exchange_name TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                binding_key TEXT NOT NULL,
                PRIMARY KEY (exchange_name, queue_name)
            )",
            [],
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        if fresh {
            store.insert_exchange(&Exchange {
                name: default_exchange.to_string(),
                exchange_type: ExchangeType::Direct,
                durable: true,
                auto_delete: false,
                arguments: Arguments::new(),
            })?;
            info!("Initialized metadata store at {}", db_path.display());
        }
        Ok(store)
    }

    pub fn insert_exchange(&self, exchange: &Exchange) -> Result<()> {
        let arguments = serde_json::to_string(&exchange.arguments)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO exchange (name, type, durable, auto_delete, arguments)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                exchange.name,
                exchange.exchange_type.as_str(),
                exchange.durable,
                exchange.auto_delete,
                arguments
            ],
        )?;
        Ok(())
    }

    pub fn delete_exchange(&self, name: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM exchange WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn select_all_exchanges(&self) -> Result<Vec<Exchange>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, type, durable, auto_delete, arguments FROM exchange")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, kind, durable, auto_delete, arguments)| -> Result<Exchange> {
                Ok(Exchange {
                    name,
                    exchange_type: kind.parse()?,
                    durable,
                    auto_delete,
                    arguments: serde_json::from_str(&arguments)?,
                })
            })
            .collect()
    }

    pub fn insert_queue(&self, queue: &MsgQueue) -> Result<()> {
        let arguments = serde_json::to_string(&queue.arguments)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO queue (name, durable, exclusive, auto_delete, arguments)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                queue.name,
                queue.durable,
                queue.exclusive,
                queue.auto_delete,
                arguments
            ],
        )?;
        Ok(())
    }

    pub fn delete_queue(&self, name: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM queue WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn select_all_queues(&self) -> Result<Vec<MsgQueue>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, durable, exclusive, auto_delete, arguments FROM queue")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, durable, exclusive, auto_delete, arguments)| -> Result<MsgQueue> {
                Ok(MsgQueue::new(
                    name,
                    durable,
                    exclusive,
                    auto_delete,
                    serde_json::from_str(&arguments)?,
                ))
            })
            .collect()
    }

    pub fn insert_binding(&self, binding: &Binding) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO binding (exchange_name, queue_name, binding_key)
             VALUES (?1, ?2, ?3)",
            params![binding.exchange_name, binding.queue_name, binding.binding_key],
        )?;
        Ok(())
    }

    pub fn delete_binding(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM binding WHERE exchange_name = ?1 AND queue_name = ?2",
            params![exchange_name, queue_name],
        )?;
        Ok(())
    }

    pub fn select_all_bindings(&self) -> Result<Vec<Binding>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT exchange_name, queue_name, binding_key FROM binding")?;
        let bindings = stmt
            .query_map([], |row| {
                Ok(Binding {
                    exchange_name: row.get(0)?,
                    queue_name: row.get(1)?,
                    binding_key: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bindings)
    }
}
