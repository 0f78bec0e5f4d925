//! An in-process tool server for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::tool::ToolDescriptor;
use crate::transport::{ToolServer, ToolTransport, TransportError};

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct RunQueryArgs {
    #[schemars(description = "The SQL query to run.")]
    query: String,
}

/// `list_tables`, `run_query` and `slow_report` (which never finishes in
/// time).
pub fn employee_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_tables".to_owned(),
            description: "Lists the tables of the database.".to_owned(),
            input_schema: schema_for!(NoArgs).to_value(),
        },
        ToolDescriptor {
            name: "run_query".to_owned(),
            description: "Runs a SQL query.".to_owned(),
            input_schema: schema_for!(RunQueryArgs).to_value(),
        },
        ToolDescriptor {
            name: "slow_report".to_owned(),
            description: "Builds a report, slowly.".to_owned(),
            input_schema: schema_for!(NoArgs).to_value(),
        },
    ]
}

#[derive(Default)]
struct Stats {
    connections: AtomicUsize,
    closed: AtomicUsize,
    calls: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

/// A fake tool server answering from canned data.
#[derive(Clone)]
pub struct FakeToolServer {
    tools: Vec<ToolDescriptor>,
    delays: HashMap<String, Duration>,
    connect_delay: Duration,
    listing_delay: Duration,
    refuse_connections: bool,
    malformed_listing: bool,
    concurrent: bool,
    stats: Arc<Stats>,
}

impl FakeToolServer {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            delays: HashMap::new(),
            connect_delay: Duration::ZERO,
            listing_delay: Duration::ZERO,
            refuse_connections: false,
            malformed_listing: false,
            concurrent: true,
            stats: Arc::default(),
        }
    }

    pub fn refuse_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    pub fn malformed_listing(mut self) -> Self {
        self.malformed_listing = true;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Delays every call of `tool`.
    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_owned(), delay);
        self
    }

    /// Delays the handshake and the tool listing.
    pub fn with_discovery_delay(
        mut self,
        connect: Duration,
        listing: Duration,
    ) -> Self {
        self.connect_delay = connect;
        self.listing_delay = listing;
        self
    }

    pub fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Names of the tools called, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.stats.calls.lock().unwrap().clone()
    }

    /// Names of the tools called, in completion order.
    pub fn finished(&self) -> Vec<String> {
        self.stats.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolServer for FakeToolServer {
    fn name(&self) -> &str {
        "fake-sqlite"
    }

    async fn connect(&self) -> Result<Box<dyn ToolTransport>, TransportError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.refuse_connections {
            return Err(TransportError::Handshake(
                "server exited during initialize".to_owned(),
            ));
        }
        self.stats.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport(self.clone())))
    }
}

struct FakeTransport(FakeToolServer);

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        if !self.0.listing_delay.is_zero() {
            tokio::time::sleep(self.0.listing_delay).await;
        }
        if self.0.malformed_listing {
            return Err(TransportError::Malformed(
                "missing field `tools`".to_owned(),
            ));
        }
        Ok(self.0.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError> {
        let stats = &self.0.stats;
        stats.calls.lock().unwrap().push(name.to_owned());

        let delay = match name {
            "slow_report" => Duration::from_secs(3600),
            _ => self.0.delays.get(name).copied().unwrap_or_default(),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match name {
            "list_tables" => Ok(json!(["employees"])),
            "run_query" => {
                let query = arguments
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if query.contains("staff") {
                    Err(TransportError::ToolFailed(
                        "no such table: staff".to_owned(),
                    ))
                } else {
                    Ok(json!([{ "id": 1, "name": "Ada", "title": "Engineer" }]))
                }
            }
            "slow_report" => Ok(json!("done")),
            other => Err(TransportError::Server {
                code: -32602,
                message: format!("unknown tool {other}"),
            }),
        };
        stats.finished.lock().unwrap().push(name.to_owned());
        result
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.0.concurrent
    }

    async fn close(&self) {
        self.0.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}
