use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::protocol::{
    CallToolResult, Incoming, InitializeResult, ListToolsResult, Notification,
    Request, Response, initialize_params,
};
use crate::config::DEFAULT_CALL_TIMEOUT;
use crate::tool::ToolDescriptor;
use crate::transport::{ToolServer, ToolTransport, TransportError};

type PendingMap =
    Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Launch parameters of an MCP server speaking over its standard streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioServerConfig {
    /// The program to run.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout of the handshake and of each protocol request.
    #[serde(default = "default_timeout", with = "timeout_secs")]
    pub timeout: Duration,
}

impl StdioServerConfig {
    /// Creates a config that runs `command` without arguments.
    #[inline]
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Appends arguments.
    #[inline]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the server process.
    #[inline]
    pub fn with_env<K: Into<String>, V: Into<String>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the request timeout.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[inline]
fn default_timeout() -> Duration {
    DEFAULT_CALL_TIMEOUT
}

mod timeout_secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[async_trait]
impl ToolServer for StdioServerConfig {
    fn name(&self) -> &str {
        &self.command
    }

    async fn connect(&self) -> Result<Box<dyn ToolTransport>, TransportError> {
        let transport = StdioTransport::spawn(self).await?;
        Ok(Box::new(transport))
    }
}

/// A connection to a child process speaking newline-delimited JSON-RPC.
///
/// Responses are matched to requests by id, so any number of requests may
/// be in flight. The child is killed when the transport is dropped.
pub struct StdioTransport {
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Child>,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawns the server and performs the MCP handshake.
    pub async fn spawn(
        config: &StdioServerConfig,
    ) -> Result<Self, TransportError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: config.command.clone(),
                source,
            })?;
        debug!("spawned tool server `{}` ({:?})", config.command, child.id());

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TransportError::Handshake(
                "child process has no piped stdio".to_owned(),
            ));
        };

        let alive = Arc::new(AtomicBool::new(true));
        let pending = PendingMap::default();
        let (write_tx, write_rx) = mpsc::channel(64);

        tokio::spawn(run_writer(
            stdin,
            write_rx,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));
        tokio::spawn(run_reader(
            stdout,
            write_tx.clone(),
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));
        tokio::spawn(forward_stderr(stderr));

        let transport = Self {
            write_tx,
            pending,
            next_id: AtomicI64::new(1),
            alive,
            child: tokio::sync::Mutex::new(child),
            timeout: config.timeout,
        };
        transport.handshake().await?;
        Ok(transport)
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        let result = self
            .send_request("initialize", Some(initialize_params()))
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        debug!("tool server speaks protocol {}", init.protocol_version);

        self.send_notification("notifications/initialized", None)
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let line = serde_json::to_string(&Notification::new(method, params))?;
        self.write_tx
            .send(line)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&Request::new(id, method, params))?;
        trace!("-> {line}");

        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(id, tx);

        // The reader marks the connection dead before it drops the pending
        // requests, so checking again here closes the race with EOF.
        if !self.alive.load(Ordering::SeqCst)
            || self.write_tx.send(line).await.is_err()
        {
            self.pending_map().remove(&id);
            return Err(TransportError::Closed);
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            // The reader dropped every pending request on EOF.
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending_map().remove(&id);
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    #[inline]
    fn pending_map(
        &self,
    ) -> std::sync::MutexGuard<
        '_,
        HashMap<i64, oneshot::Sender<Result<Value, TransportError>>>,
    > {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let mut tools = vec![];
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.send_request("tools/list", Some(params)).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools.into_iter().map(ToolDescriptor::from));

            match page.next_cursor {
                Some(next) if Some(&next) != cursor.as_ref() => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.send_request("tools/call", Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(result)?;
        if result.is_error {
            return Err(TransportError::ToolFailed(result.text()));
        }
        Ok(result.content)
    }

    #[inline]
    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Err(err) = child.kill().await {
            debug!("failed to kill tool server: {err}");
        }
    }
}

async fn run_writer(
    mut stdin: ChildStdin,
    mut write_rx: mpsc::Receiver<String>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) {
    while let Some(mut line) = write_rx.recv().await {
        line.push('\n');
        let res = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = res {
            warn!("tool server write error: {err}");
            alive.store(false, Ordering::SeqCst);
            pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
            break;
        }
    }
}

async fn run_reader(
    stdout: ChildStdout,
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("tool server read error: {err}");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        trace!("<- {trimmed}");

        match Incoming::parse(trimmed) {
            Ok(Incoming::Response { id, payload }) => {
                let tx = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                let Some(tx) = tx else {
                    debug!("dropping response to unknown request {id}");
                    continue;
                };
                let result = payload.map_err(|err| TransportError::Server {
                    code: err.code,
                    message: err.message,
                });
                tx.send(result).ok();
            }
            Ok(Incoming::ServerMessage {
                id: Some(id),
                method,
            }) => {
                debug!("answering server request `{method}`");
                let reply = Response::to_server_request(&id, &method);
                match serde_json::to_string(&reply) {
                    Ok(line) => {
                        write_tx.send(line).await.ok();
                    }
                    Err(err) => warn!("cannot encode reply: {err}"),
                }
            }
            Ok(Incoming::ServerMessage { id: None, method }) => {
                debug!("ignoring server notification `{method}`");
            }
            Err(err) => {
                warn!("cannot parse tool server message: {err}");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "toolloop_core::mcp::server", "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const HANDSHAKE: &str = r#"read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
read line
"#;

    fn fake_server(script: &str) -> StdioServerConfig {
        StdioServerConfig::new("sh")
            .with_args(["-c", &format!("{HANDSHAKE}{script}")])
            .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_list_and_call() {
        let config = fake_server(
            r#"read line
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_tables","description":"List all tables","inputSchema":{"type":"object"}}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"[\"employees\"]"}],"isError":false}}'
read line
echo '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"no such table: staff"}],"isError":true}}'
read line
"#,
        );
        let transport = config.connect().await.unwrap();
        assert!(transport.supports_concurrent_calls());

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_tables");
        assert_eq!(tools[0].description, "List all tables");

        let payload =
            transport.call_tool("list_tables", json!({})).await.unwrap();
        assert_eq!(
            payload,
            json!([{ "type": "text", "text": "[\"employees\"]" }])
        );

        let err = transport
            .call_tool("read_query", json!({ "query": "SELECT * FROM staff" }))
            .await
            .unwrap_err();
        let TransportError::ToolFailed(msg) = err else {
            panic!("expected a tool failure, got {err:?}");
        };
        assert_eq!(msg, "no such table: staff");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_paginated_listing() {
        let config = fake_server(
            r#"read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_tables"}],"nextCursor":"page-2"}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"read_query"}]}}'
read line
"#,
        );
        let transport = config.connect().await.unwrap();
        let names: Vec<_> = transport
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["list_tables", "read_query"]);
    }

    #[tokio::test]
    async fn test_server_error_and_exit() {
        let config = fake_server(
            r#"read line
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}'
"#,
        );
        let transport = config.connect().await.unwrap();
        let err = transport.list_tools().await.unwrap_err();
        assert!(matches!(err, TransportError::Server { code: -32601, .. }));

        // The script has exited, so the connection is gone.
        let err = transport.call_tool("list_tables", json!({})).await;
        assert!(matches!(err, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_answers_server_ping() {
        // The listing is only sent once the ping has been answered.
        let config = fake_server(
            r#"read line
echo '{"jsonrpc":"2.0","id":"s1","method":"ping"}'
read reply
case "$reply" in
*'"id":"s1"'*'"result"'*)
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_tables"}]}}'
;;
esac
read line
"#,
        );
        let transport = config.connect().await.unwrap();
        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "list_tables");
    }

    #[tokio::test]
    async fn test_write_failure_fails_fast() {
        let config = fake_server("exec 0<&-\nsleep 5\n");
        let transport = config.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = tokio::time::Instant::now();
        let err = transport.list_tools().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = StdioServerConfig::new("/nonexistent/toolloop-server");
        let err = config.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let config = StdioServerConfig::new("sh")
            .with_args(["-c", "read line; exit 0"])
            .with_timeout(Duration::from_secs(5));
        let err = config.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::Handshake(_)));

        let config = StdioServerConfig::new("sh")
            .with_args(["-c", "read line; sleep 5"])
            .with_timeout(Duration::from_millis(200));
        let err = config.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::Handshake(_)));
    }
}
