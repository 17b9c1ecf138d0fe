//! In-memory engine honouring the native call contract.
//!
//! `MemoryEngine` implements every entry point of [`NativeEngine`] over plain
//! Rust collections and follows the same ownership rules as the real library:
//! error texts, cjson buffers, result sets and transactions are handed to the
//! caller and must come back exactly once. Every release is tracked, so a test
//! can assert that nothing leaked ([`live_error_texts`], [`live_cjson_buffers`],
//! [`live_result_sets`], [`live_transactions`]) and that nothing was released
//! twice or used after release ([`misuse_count`]).
//!
//! Queries are SQL text rather than the engine's binary query format:
//!
//! - `SELECT * FROM <ns> [WHERE <field> = <literal>]`
//! - `DELETE FROM <ns> [WHERE <field> = <literal>]`
//! - `UPDATE <ns> SET <field> = <literal> [WHERE <field> = <literal>]`
//!
//! Literals are JSON values or single-quoted strings. Items are JSON objects in
//! both data formats. Select payloads are `{"items":[...]}` in JSON mode and
//! otherwise a packed list of item references, see
//! [`decode_item_refs`](crate::fixtures::decode_item_refs).
//!
//! [`live_error_texts`]: MemoryEngine::live_error_texts
//! [`live_cjson_buffers`]: MemoryEngine::live_cjson_buffers
//! [`live_result_sets`]: MemoryEngine::live_result_sets
//! [`live_transactions`]: MemoryEngine::live_transactions
//! [`misuse_count`]: MemoryEngine::misuse_count

use parking_lot::{Condvar, Mutex, MutexGuard};
use rxbridge_codec::{PackedReader, PackedWriter};
use rxbridge_sys::{
    reindexer_buffer, reindexer_ctx_info, reindexer_error, reindexer_resbuffer, reindexer_ret,
    reindexer_string, reindexer_tx_ret, ConnectOpts, NativeEngine, RawHandle, StorageOpts,
    STORAGE_OPT_CREATE_IF_MISSING, STORAGE_OPT_ENABLED,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ffi::{c_char, CString};
use std::time::{Duration, Instant};

/// Engine error codes used by [`MemoryEngine`].
pub mod codes {
    /// Query text could not be parsed.
    pub const PARSE_SQL: i32 = 1;
    /// Invalid parameters.
    pub const PARAMS: i32 = 3;
    /// Call on an unknown or released handle.
    pub const LOGIC: i32 = 4;
    /// Item or index JSON could not be parsed.
    pub const PARSE_JSON: i32 = 5;
    /// Conflicting index definition.
    pub const CONFLICT: i32 = 7;
    /// Object in the wrong state.
    pub const NOT_VALID: i32 = 11;
    /// Missing namespace or meta key.
    pub const NOT_FOUND: i32 = 13;
}

const MODE_UPDATE: u64 = 0;
const MODE_INSERT: u64 = 1;
const MODE_UPSERT: u64 = 2;
const MODE_DELETE: u64 = 3;

/// What an embedded server does once started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerBehavior {
    /// Reports ready after the delay.
    ReadyAfter(Duration),
    /// Runs until stopped but never reports ready.
    NeverReady,
    /// `start_server` fails immediately.
    FailStart {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

impl Default for ServerBehavior {
    fn default() -> Self {
        ServerBehavior::ReadyAfter(Duration::ZERO)
    }
}

#[derive(Debug)]
struct Fail {
    code: i32,
    message: String,
}

impl Fail {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn no_namespace(ns: &str) -> Self {
        Self::new(codes::NOT_FOUND, format!("Namespace '{ns}' does not exist"))
    }
}

type Outcome<T> = Result<T, Fail>;

#[derive(Debug, Clone)]
struct Namespace {
    id: i32,
    open: bool,
    indexes: Vec<Value>,
    pk: Option<String>,
    items: BTreeMap<usize, Vec<u8>>,
}

impl Namespace {
    fn find(&self, field: &str, key: &Value) -> Option<usize> {
        self.items
            .iter()
            .find(|(_, bytes)| matches(bytes, Some((field, key))))
            .map(|(ptr, _)| *ptr)
    }
}

#[derive(Debug, Default)]
struct Instance {
    dsn: Option<String>,
    server: Option<RawHandle>,
    namespaces: HashMap<String, Namespace>,
    meta: HashMap<(String, String), String>,
    next_ns_id: i32,
}

impl Instance {
    fn open_ns(&mut self, ns: &str) -> Outcome<&mut Namespace> {
        match self.namespaces.get_mut(ns) {
            Some(n) if n.open => Ok(n),
            _ => Err(Fail::no_namespace(ns)),
        }
    }
}

#[derive(Debug, Clone)]
enum QueryKind {
    Select,
    Delete,
    Update { field: String, value: Value },
}

#[derive(Debug, Clone)]
struct Query {
    kind: QueryKind,
    ns: String,
    filter: Option<(String, Value)>,
}

#[derive(Debug)]
enum TxOp {
    Modify { mode: u64, item: Value, data: Vec<u8> },
    Query(Query),
}

#[derive(Debug)]
struct Tx {
    rx: RawHandle,
    ns: String,
    ops: Vec<TxOp>,
}

#[derive(Debug)]
struct ResultEntry {
    payload: Box<[u8]>,
    items: Vec<(usize, i32, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct ServerState {
    behavior: ServerBehavior,
    running: bool,
    ready: bool,
    stop: bool,
    yaml: Option<String>,
    databases: HashMap<String, RawHandle>,
}

#[derive(Debug, Default)]
struct State {
    next_handle: RawHandle,
    next_item: usize,
    next_result_id: RawHandle,
    instances: HashMap<RawHandle, Instance>,
    txs: HashMap<RawHandle, Tx>,
    results: HashMap<RawHandle, ResultEntry>,
    free_result_ids: BTreeSet<RawHandle>,
    error_texts: HashSet<usize>,
    cjson: HashMap<usize, Box<[u8]>>,
    servers: HashMap<RawHandle, ServerState>,
    server_behavior: ServerBehavior,
    failures: HashMap<String, VecDeque<(i32, String)>>,
    misuse: usize,
    contexts: Vec<reindexer_ctx_info>,
    last_versions: Option<Vec<i32>>,
}

/// An in-process engine for tests. See the [module docs](self).
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    server_cv: Condvar,
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Makes the next call of entry point `op` (e.g. `"commit_transaction"`)
    /// fail with `code` and `message`. Queued failures fire in order.
    pub fn inject_failure(&self, op: &str, code: i32, message: &str) {
        self.lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back((code, message.to_string()));
    }

    /// Sets how servers created from now on behave when started.
    pub fn set_server_behavior(&self, behavior: ServerBehavior) {
        self.lock().server_behavior = behavior;
    }

    /// Error texts handed out and not yet released.
    pub fn live_error_texts(&self) -> usize {
        self.lock().error_texts.len()
    }

    /// Cjson buffers handed out and not yet released.
    pub fn live_cjson_buffers(&self) -> usize {
        self.lock().cjson.len()
    }

    /// Result sets handed out and not yet released.
    pub fn live_result_sets(&self) -> usize {
        self.lock().results.len()
    }

    /// Transactions neither committed nor rolled back.
    pub fn live_transactions(&self) -> usize {
        self.lock().txs.len()
    }

    /// Engine instances created by `init` and not yet destroyed.
    pub fn live_instances(&self) -> usize {
        self.lock().instances.values().filter(|i| i.server.is_none()).count()
    }

    /// Servers not yet destroyed.
    pub fn live_servers(&self) -> usize {
        self.lock().servers.len()
    }

    /// Calls that named an unknown or already released handle or buffer.
    pub fn misuse_count(&self) -> usize {
        self.lock().misuse
    }

    /// Execution contexts received so far, in call order.
    pub fn seen_contexts(&self) -> Vec<reindexer_ctx_info> {
        self.lock().contexts.clone()
    }

    /// Payload versions passed to the last select.
    pub fn last_versions(&self) -> Option<Vec<i32>> {
        self.lock().last_versions.clone()
    }

    /// DSN an instance was connected with.
    pub fn connected_dsn(&self, rx: RawHandle) -> Option<String> {
        self.lock().instances.get(&rx).and_then(|i| i.dsn.clone())
    }

    /// YAML a server was started with.
    pub fn server_config(&self, svc: RawHandle) -> Option<String> {
        self.lock().servers.get(&svc).and_then(|s| s.yaml.clone())
    }

    /// Number of items in a namespace, `None` if it does not exist.
    pub fn item_count(&self, rx: RawHandle, ns: &str) -> Option<usize> {
        self.lock()
            .instances
            .get(&rx)
            .and_then(|i| i.namespaces.get(ns))
            .map(|n| n.items.len())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        for addr in st.error_texts.drain() {
            // Safety: every tracked address came from CString::into_raw.
            drop(unsafe { CString::from_raw(addr as *mut c_char) });
        }
    }
}

unsafe fn str_arg(s: reindexer_string) -> Outcome<String> {
    if s.n < 0 {
        return Err(Fail::new(codes::PARAMS, "negative string length"));
    }
    if s.n == 0 {
        return Ok(String::new());
    }
    let bytes = std::slice::from_raw_parts(s.p as *const u8, s.n as usize);
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Fail::new(codes::PARAMS, "string argument is not UTF-8"))
}

unsafe fn buf_arg(b: reindexer_buffer) -> Outcome<Vec<u8>> {
    if b.len < 0 {
        return Err(Fail::new(codes::PARAMS, "negative buffer length"));
    }
    if b.len == 0 {
        return Ok(Vec::new());
    }
    Ok(std::slice::from_raw_parts(b.data, b.len as usize).to_vec())
}

fn parse_item(data: &[u8]) -> Outcome<Value> {
    match serde_json::from_slice::<Value>(data) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(Fail::new(codes::PARSE_JSON, "item is not a JSON object")),
        Err(e) => Err(Fail::new(codes::PARSE_JSON, format!("invalid item JSON: {e}"))),
    }
}

fn matches(bytes: &[u8], filter: Option<(&str, &Value)>) -> bool {
    let Some((field, want)) = filter else {
        return true;
    };
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| v.get(field).cloned())
        .is_some_and(|v| &v == want)
}

fn parse_literal(s: &str) -> Option<Value> {
    if let Some(inner) = s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Some(Value::String(inner.to_string()));
    }
    serde_json::from_str(s).ok()
}

fn parse_assign(tokens: &[&str]) -> Option<(String, Value)> {
    let joined = tokens.join(" ");
    let (field, literal) = joined.split_once('=')?;
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    Some((field.to_string(), parse_literal(literal.trim())?))
}

fn parse_query(raw: &[u8]) -> Outcome<Query> {
    let text = std::str::from_utf8(raw).map_err(|_| Fail::new(codes::PARSE_SQL, "query is not UTF-8"))?;
    let err = || Fail::new(codes::PARSE_SQL, format!("cannot parse query '{text}'"));
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
    let kw = |i: usize, k: &str| upper.get(i).map(String::as_str) == Some(k);

    let where_at = upper.iter().position(|t| t == "WHERE");
    let head_end = where_at.unwrap_or(tokens.len());
    let filter = match where_at {
        Some(i) => Some(parse_assign(&tokens[i + 1..]).ok_or_else(err)?),
        None => None,
    };

    let (kind, ns) = if kw(0, "SELECT") && kw(1, "*") && kw(2, "FROM") && head_end == 4 {
        (QueryKind::Select, tokens[3])
    } else if kw(0, "DELETE") && kw(1, "FROM") && head_end == 3 {
        (QueryKind::Delete, tokens[2])
    } else if kw(0, "UPDATE") && kw(2, "SET") && head_end > 3 {
        let (field, value) = parse_assign(&tokens[3..head_end]).ok_or_else(err)?;
        (QueryKind::Update { field, value }, tokens[1])
    } else {
        return Err(err());
    };
    Ok(Query {
        kind,
        ns: ns.to_string(),
        filter,
    })
}

/// Packs `count, count × (item_ptr, ns_id)`.
fn encode_refs(items: &[(usize, i32, Vec<u8>)]) -> Box<[u8]> {
    let mut w = PackedWriter::new();
    w.put_varuint(items.len() as u64);
    for (ptr, ns_id, _) in items {
        w.put_varuint(*ptr as u64).put_varuint(*ns_id as u64);
    }
    w.into_bytes().into_boxed_slice()
}

fn encode_json(items: &[(usize, i32, Vec<u8>)]) -> Box<[u8]> {
    let values: Vec<Value> = items
        .iter()
        .map(|(_, _, bytes)| serde_json::from_slice(bytes).unwrap_or(Value::Null))
        .collect();
    serde_json::json!({ "items": values })
        .to_string()
        .into_bytes()
        .into_boxed_slice()
}

fn entry(items: Vec<(usize, i32, Vec<u8>)>) -> ResultEntry {
    ResultEntry {
        payload: encode_refs(&items),
        items,
    }
}

/// Applies one item modification, returning the affected items.
fn apply_modify(
    ns: &mut Namespace,
    next_item: &mut usize,
    mode: u64,
    item: &Value,
    data: &[u8],
) -> Outcome<Vec<(usize, i32, Vec<u8>)>> {
    let pk = ns
        .pk
        .clone()
        .ok_or_else(|| Fail::new(codes::PARAMS, "namespace has no primary key index"))?;
    let key = item
        .get(&pk)
        .cloned()
        .ok_or_else(|| Fail::new(codes::PARAMS, format!("item has no primary key field '{pk}'")))?;
    let existing = ns.find(&pk, &key);
    let affected = match (mode, existing) {
        (MODE_INSERT, Some(_)) | (MODE_UPDATE, None) | (MODE_DELETE, None) => Vec::new(),
        (MODE_DELETE, Some(ptr)) => {
            let old = ns.items.remove(&ptr).unwrap_or_default();
            vec![(ptr, ns.id, old)]
        }
        (MODE_UPDATE | MODE_UPSERT, Some(ptr)) => {
            ns.items.insert(ptr, data.to_vec());
            vec![(ptr, ns.id, data.to_vec())]
        }
        (MODE_INSERT | MODE_UPSERT, None) => {
            *next_item += 1;
            ns.items.insert(*next_item, data.to_vec());
            vec![(*next_item, ns.id, data.to_vec())]
        }
        _ => return Err(Fail::new(codes::PARAMS, format!("unknown modify mode {mode}"))),
    };
    Ok(affected)
}

/// Applies a delete or update query, returning the affected items.
fn apply_query(ns: &mut Namespace, query: &Query) -> Outcome<Vec<(usize, i32, Vec<u8>)>> {
    let filter = query.filter.as_ref().map(|(f, v)| (f.as_str(), v));
    let hits: Vec<usize> = ns
        .items
        .iter()
        .filter(|(_, bytes)| matches(bytes, filter))
        .map(|(ptr, _)| *ptr)
        .collect();
    let mut affected = Vec::with_capacity(hits.len());
    for ptr in hits {
        match &query.kind {
            QueryKind::Delete => {
                if let Some(old) = ns.items.remove(&ptr) {
                    affected.push((ptr, ns.id, old));
                }
            }
            QueryKind::Update { field, value } => {
                let Some(bytes) = ns.items.get_mut(&ptr) else {
                    continue;
                };
                let mut item = parse_item(bytes)?;
                if let Value::Object(map) = &mut item {
                    map.insert(field.clone(), value.clone());
                }
                *bytes = item.to_string().into_bytes();
                affected.push((ptr, ns.id, bytes.clone()));
            }
            QueryKind::Select => return Err(Fail::new(codes::PARAMS, "select is not a modifying query")),
        }
    }
    Ok(affected)
}

/// Reads the packed modification arguments that follow the namespace.
fn parse_args_tail(r: &mut PackedReader<'_>) -> Outcome<u64> {
    let bad = |e: rxbridge_codec::CodecError| Fail::new(codes::PARAMS, format!("bad item arguments: {e}"));
    let format = r.get_varuint().map_err(bad)?;
    if format > 1 {
        return Err(Fail::new(codes::PARAMS, format!("unknown data format {format}")));
    }
    let mode = r.get_varuint().map_err(bad)?;
    let _state_token = r.get_varuint().map_err(bad)?;
    let precepts = r.get_varuint().map_err(bad)?;
    for _ in 0..precepts {
        r.get_vstring().map_err(bad)?;
    }
    Ok(mode)
}

impl State {
    fn handle(&mut self) -> RawHandle {
        self.next_handle += 1;
        self.next_handle
    }

    fn misuse(&mut self, what: &str, handle: RawHandle) -> Fail {
        self.misuse += 1;
        Fail::new(codes::LOGIC, format!("unknown {what} {handle:#x}"))
    }

    fn injected(&mut self, op: &str) -> Outcome<()> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some((code, message)) => Err(Fail::new(code, message)),
            None => Ok(()),
        }
    }

    fn instance(&mut self, rx: RawHandle) -> Outcome<&mut Instance> {
        if !self.instances.contains_key(&rx) {
            return Err(self.misuse("engine instance", rx));
        }
        let inst = self
            .instances
            .get_mut(&rx)
            .ok_or_else(|| Fail::new(codes::LOGIC, "engine instance vanished"))?;
        if inst.dsn.is_none() {
            return Err(Fail::new(codes::NOT_VALID, "engine instance is not connected"));
        }
        Ok(inst)
    }

    fn error_text(&mut self, message: &str) -> *const c_char {
        let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
        let ptr = text.into_raw();
        self.error_texts.insert(ptr as usize);
        ptr
    }

    fn status(&mut self, res: Outcome<()>) -> reindexer_error {
        match res {
            Ok(()) => reindexer_error::ok(),
            Err(f) => reindexer_error {
                what: self.error_text(&f.message),
                code: f.code,
            },
        }
    }

    fn data(&mut self, res: Outcome<Option<ResultEntry>>) -> reindexer_ret {
        match res {
            Ok(None) => reindexer_ret {
                out: reindexer_resbuffer {
                    results_ptr: 0,
                    data: 0,
                    len: 0,
                },
                err_code: 0,
            },
            Ok(Some(entry)) => {
                let id = match self.free_result_ids.pop_first() {
                    Some(id) => id,
                    None => {
                        self.next_result_id += 1;
                        self.next_result_id
                    }
                };
                let data = entry.payload.as_ptr() as usize;
                let len = entry.payload.len() as i32;
                self.results.insert(id, entry);
                reindexer_ret {
                    out: reindexer_resbuffer {
                        results_ptr: id,
                        data,
                        len,
                    },
                    err_code: 0,
                }
            }
            Err(f) => reindexer_ret {
                out: reindexer_resbuffer {
                    results_ptr: 0,
                    data: self.error_text(&f.message) as usize,
                    len: 0,
                },
                err_code: f.code,
            },
        }
    }

    fn connect(&mut self, rx: RawHandle, dsn: &str) -> Outcome<()> {
        if !self.instances.contains_key(&rx) {
            return Err(self.misuse("engine instance", rx));
        }
        self.injected("connect")?;
        if dsn.is_empty() {
            return Err(Fail::new(codes::PARAMS, "empty DSN"));
        }
        if let Some(inst) = self.instances.get_mut(&rx) {
            inst.dsn = Some(dsn.to_string());
        }
        Ok(())
    }

    fn open_namespace(&mut self, rx: RawHandle, ns: &str, opts: StorageOpts) -> Outcome<()> {
        self.injected("open_namespace")?;
        if ns.is_empty() {
            return Err(Fail::new(codes::PARAMS, "empty namespace name"));
        }
        let inst = self.instance(rx)?;
        if let Some(existing) = inst.namespaces.get_mut(ns) {
            existing.open = true;
            return Ok(());
        }
        let enabled = opts.options & STORAGE_OPT_ENABLED != 0;
        let create = opts.options & STORAGE_OPT_CREATE_IF_MISSING != 0;
        if enabled && !create {
            return Err(Fail::no_namespace(ns));
        }
        inst.next_ns_id += 1;
        let id = inst.next_ns_id;
        inst.namespaces.insert(
            ns.to_string(),
            Namespace {
                id,
                open: true,
                indexes: Vec::new(),
                pk: None,
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn close_namespace(&mut self, rx: RawHandle, ns: &str) -> Outcome<()> {
        self.injected("close_namespace")?;
        self.instance(rx)?.open_ns(ns)?.open = false;
        Ok(())
    }

    fn drop_namespace(&mut self, rx: RawHandle, ns: &str) -> Outcome<()> {
        self.injected("drop_namespace")?;
        let inst = self.instance(rx)?;
        if inst.namespaces.remove(ns).is_none() {
            return Err(Fail::no_namespace(ns));
        }
        inst.meta.retain(|(n, _), _| n != ns);
        Ok(())
    }

    fn add_index(&mut self, rx: RawHandle, ns: &str, json: &str) -> Outcome<()> {
        self.injected("add_index")?;
        let def: Value = serde_json::from_str(json)
            .map_err(|e| Fail::new(codes::PARSE_JSON, format!("invalid index definition: {e}")))?;
        let name = def
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Fail::new(codes::PARAMS, "index definition has no name"))?
            .to_string();
        let namespace = self.instance(rx)?.open_ns(ns)?;
        if let Some(existing) = namespace.indexes.iter().find(|i| i["name"] == name.as_str()) {
            if *existing == def {
                return Ok(());
            }
            return Err(Fail::new(
                codes::CONFLICT,
                format!("Index '{ns}.{name}' already exists with different settings"),
            ));
        }
        if def.get("is_pk").and_then(Value::as_bool) == Some(true) {
            if namespace.pk.is_some() {
                return Err(Fail::new(codes::CONFLICT, format!("Namespace '{ns}' already has a primary key")));
            }
            let field = def
                .get("json_paths")
                .and_then(|p| p.get(0))
                .and_then(Value::as_str)
                .unwrap_or(name.as_str())
                .to_string();
            namespace.pk = Some(field);
        }
        namespace.indexes.push(def);
        Ok(())
    }

    fn modify_item(&mut self, rx: RawHandle, args: &[u8], data: &[u8]) -> Outcome<Option<ResultEntry>> {
        self.injected("modify_item_packed")?;
        let mut r = PackedReader::new(args);
        let ns = r
            .get_vstring()
            .map_err(|e| Fail::new(codes::PARAMS, format!("bad item arguments: {e}")))?
            .to_string();
        let mode = parse_args_tail(&mut r)?;
        let item = parse_item(data)?;
        let mut next_item = self.next_item;
        let namespace = self.instance(rx)?.open_ns(&ns)?;
        let affected = apply_modify(namespace, &mut next_item, mode, &item, data)?;
        self.next_item = next_item;
        Ok(Some(entry(affected)))
    }

    fn start_transaction(&mut self, rx: RawHandle, ns: &str) -> Outcome<RawHandle> {
        self.injected("start_transaction")?;
        self.instance(rx)?.open_ns(ns)?;
        let tx = self.handle();
        self.txs.insert(
            tx,
            Tx {
                rx,
                ns: ns.to_string(),
                ops: Vec::new(),
            },
        );
        Ok(tx)
    }

    fn tx(&mut self, rx: RawHandle, tx: RawHandle) -> Outcome<&mut Tx> {
        if !self.txs.get(&tx).is_some_and(|t| t.rx == rx) {
            return Err(self.misuse("transaction", tx));
        }
        self.txs
            .get_mut(&tx)
            .ok_or_else(|| Fail::new(codes::LOGIC, "transaction vanished"))
    }

    fn modify_item_tx(&mut self, rx: RawHandle, tx: RawHandle, args: &[u8], data: &[u8]) -> Outcome<Option<ResultEntry>> {
        self.tx(rx, tx)?;
        self.injected("modify_item_packed_tx")?;
        let mode = parse_args_tail(&mut PackedReader::new(args))?;
        if mode > MODE_DELETE {
            return Err(Fail::new(codes::PARAMS, format!("unknown modify mode {mode}")));
        }
        let item = parse_item(data)?;
        self.tx(rx, tx)?.ops.push(TxOp::Modify {
            mode,
            item,
            data: data.to_vec(),
        });
        Ok(None)
    }

    fn query_tx(&mut self, op: &str, rx: RawHandle, tx: RawHandle, raw: &[u8]) -> Outcome<Option<ResultEntry>> {
        self.tx(rx, tx)?;
        self.injected(op)?;
        let query = parse_query(raw)?;
        let t = self.tx(rx, tx)?;
        let expected = match query.kind {
            QueryKind::Delete => op == "delete_query_tx",
            QueryKind::Update { .. } => op == "update_query_tx",
            QueryKind::Select => false,
        };
        if !expected || query.ns != t.ns {
            return Err(Fail::new(codes::PARAMS, format!("query does not fit {op} on '{}'", t.ns)));
        }
        t.ops.push(TxOp::Query(query));
        Ok(None)
    }

    fn commit(&mut self, rx: RawHandle, tx: RawHandle) -> Outcome<()> {
        self.tx(rx, tx)?;
        // The transaction is consumed whatever happens next.
        let t = self
            .txs
            .remove(&tx)
            .ok_or_else(|| Fail::new(codes::LOGIC, "transaction vanished"))?;
        self.injected("commit_transaction")?;
        let mut next_item = self.next_item;
        let namespace = self.instance(rx)?.open_ns(&t.ns)?;
        let mut staged = namespace.clone();
        for op in &t.ops {
            match op {
                TxOp::Modify { mode, item, data } => {
                    apply_modify(&mut staged, &mut next_item, *mode, item, data)?;
                }
                TxOp::Query(q) => {
                    apply_query(&mut staged, q)?;
                }
            }
        }
        *namespace = staged;
        self.next_item = next_item;
        Ok(())
    }

    fn rollback(&mut self, rx: RawHandle, tx: RawHandle) -> Outcome<()> {
        self.tx(rx, tx)?;
        self.txs.remove(&tx);
        self.injected("rollback_transaction")
    }

    fn select(&mut self, rx: RawHandle, raw: &[u8], as_json: bool) -> Outcome<Option<ResultEntry>> {
        self.injected("select_query")?;
        let query = parse_query(raw)?;
        if !matches!(query.kind, QueryKind::Select) {
            return Err(Fail::new(codes::PARAMS, "select_query needs a SELECT"));
        }
        let namespace = self.instance(rx)?.open_ns(&query.ns)?;
        let filter = query.filter.as_ref().map(|(f, v)| (f.as_str(), v));
        let items: Vec<_> = namespace
            .items
            .iter()
            .filter(|(_, bytes)| matches(bytes, filter))
            .map(|(ptr, bytes)| (*ptr, namespace.id, bytes.clone()))
            .collect();
        let payload = if as_json {
            encode_json(&items)
        } else {
            encode_refs(&items)
        };
        Ok(Some(ResultEntry { payload, items }))
    }

    fn modify_query(&mut self, op: &str, rx: RawHandle, raw: &[u8]) -> Outcome<Option<ResultEntry>> {
        self.injected(op)?;
        let query = parse_query(raw)?;
        let expected = match query.kind {
            QueryKind::Delete => op == "delete_query",
            QueryKind::Update { .. } => op == "update_query",
            QueryKind::Select => false,
        };
        if !expected {
            return Err(Fail::new(codes::PARAMS, format!("query does not fit {op}")));
        }
        let namespace = self.instance(rx)?.open_ns(&query.ns)?;
        Ok(Some(entry(apply_query(namespace, &query)?)))
    }

    fn put_meta(&mut self, rx: RawHandle, ns: &str, key: &str, value: &str) -> Outcome<()> {
        self.injected("put_meta")?;
        let inst = self.instance(rx)?;
        inst.open_ns(ns)?;
        inst.meta.insert((ns.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn get_meta(&mut self, rx: RawHandle, ns: &str, key: &str) -> Outcome<Option<ResultEntry>> {
        self.injected("get_meta")?;
        let inst = self.instance(rx)?;
        inst.open_ns(ns)?;
        let value = inst
            .meta
            .get(&(ns.to_string(), key.to_string()))
            .ok_or_else(|| Fail::new(codes::NOT_FOUND, format!("Meta key '{key}' not found in '{ns}'")))?;
        Ok(Some(ResultEntry {
            payload: value.as_bytes().to_vec().into_boxed_slice(),
            items: Vec::new(),
        }))
    }

    fn track_cjson(&mut self, bytes: &[u8]) -> reindexer_buffer {
        // At least one byte so every buffer has a distinct address.
        let mut storage = vec![0u8; bytes.len().max(1)].into_boxed_slice();
        storage[..bytes.len()].copy_from_slice(bytes);
        let data = storage.as_mut_ptr();
        self.cjson.insert(data as usize, storage);
        reindexer_buffer {
            data,
            len: bytes.len() as i32,
        }
    }

    fn server(&mut self, svc: RawHandle) -> Outcome<&mut ServerState> {
        if !self.servers.contains_key(&svc) {
            return Err(self.misuse("server", svc));
        }
        self.servers
            .get_mut(&svc)
            .ok_or_else(|| Fail::new(codes::LOGIC, "server vanished"))
    }

    fn get_instance(&mut self, svc: RawHandle, db: &str) -> Outcome<RawHandle> {
        self.injected("get_instance")?;
        if db.is_empty() {
            return Err(Fail::new(codes::PARAMS, "empty database name"));
        }
        let server = self.server(svc)?;
        if !server.ready {
            return Err(Fail::new(codes::NOT_VALID, "server is not running"));
        }
        if let Some(rx) = server.databases.get(db) {
            return Ok(*rx);
        }
        let rx = self.handle();
        self.instances.insert(
            rx,
            Instance {
                dsn: Some(format!("builtinserver://{db}")),
                server: Some(svc),
                ..Instance::default()
            },
        );
        self.server(svc)?.databases.insert(db.to_string(), rx);
        Ok(rx)
    }
}

impl NativeEngine for MemoryEngine {
    fn init(&self) -> RawHandle {
        let mut st = self.lock();
        let rx = st.handle();
        st.instances.insert(rx, Instance::default());
        rx
    }

    unsafe fn destroy(&self, rx: RawHandle) {
        let mut st = self.lock();
        match st.instances.get(&rx) {
            Some(inst) if inst.server.is_none() => {
                st.instances.remove(&rx);
            }
            _ => st.misuse += 1,
        }
    }

    unsafe fn connect(&self, rx: RawHandle, dsn: reindexer_string, _opts: ConnectOpts, _version: reindexer_string) -> reindexer_error {
        let dsn = str_arg(dsn);
        let mut st = self.lock();
        let res = dsn.and_then(|dsn| st.connect(rx, &dsn));
        st.status(res)
    }

    unsafe fn open_namespace(&self, rx: RawHandle, ns: reindexer_string, opts: StorageOpts, ctx: reindexer_ctx_info) -> reindexer_error {
        let ns = str_arg(ns);
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = ns.and_then(|ns| st.open_namespace(rx, &ns, opts));
        st.status(res)
    }

    unsafe fn close_namespace(&self, rx: RawHandle, ns: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_error {
        let ns = str_arg(ns);
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = ns.and_then(|ns| st.close_namespace(rx, &ns));
        st.status(res)
    }

    unsafe fn drop_namespace(&self, rx: RawHandle, ns: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_error {
        let ns = str_arg(ns);
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = ns.and_then(|ns| st.drop_namespace(rx, &ns));
        st.status(res)
    }

    unsafe fn add_index(&self, rx: RawHandle, ns: reindexer_string, index_def_json: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_error {
        let args = str_arg(ns).and_then(|ns| Ok((ns, str_arg(index_def_json)?)));
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = args.and_then(|(ns, def)| st.add_index(rx, &ns, &def));
        st.status(res)
    }

    unsafe fn modify_item_packed(&self, rx: RawHandle, args: reindexer_buffer, data: reindexer_buffer, ctx: reindexer_ctx_info) -> reindexer_ret {
        let bufs = buf_arg(args).and_then(|a| Ok((a, buf_arg(data)?)));
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = bufs.and_then(|(a, d)| st.modify_item(rx, &a, &d));
        st.data(res)
    }

    unsafe fn start_transaction(&self, rx: RawHandle, ns: reindexer_string) -> reindexer_tx_ret {
        let ns = str_arg(ns);
        let mut st = self.lock();
        match ns.and_then(|ns| st.start_transaction(rx, &ns)) {
            Ok(tx_id) => reindexer_tx_ret {
                tx_id,
                err: reindexer_error::ok(),
            },
            Err(f) => reindexer_tx_ret {
                tx_id: 0,
                err: st.status(Err(f)),
            },
        }
    }

    unsafe fn modify_item_packed_tx(&self, rx: RawHandle, tx: RawHandle, args: reindexer_buffer, data: reindexer_buffer) -> reindexer_ret {
        let bufs = buf_arg(args).and_then(|a| Ok((a, buf_arg(data)?)));
        let mut st = self.lock();
        let res = bufs.and_then(|(a, d)| st.modify_item_tx(rx, tx, &a, &d));
        st.data(res)
    }

    unsafe fn commit_transaction(&self, rx: RawHandle, tx: RawHandle, ctx: reindexer_ctx_info) -> reindexer_error {
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = st.commit(rx, tx);
        st.status(res)
    }

    unsafe fn rollback_transaction(&self, rx: RawHandle, tx: RawHandle) -> reindexer_error {
        let mut st = self.lock();
        let res = st.rollback(rx, tx);
        st.status(res)
    }

    unsafe fn select_query(
        &self,
        rx: RawHandle,
        query: reindexer_buffer,
        as_json: i32,
        pt_versions: *mut i32,
        pt_versions_count: i32,
        ctx: reindexer_ctx_info,
    ) -> reindexer_ret {
        let query = buf_arg(query);
        let versions = if pt_versions.is_null() || pt_versions_count <= 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(pt_versions, pt_versions_count as usize).to_vec()
        };
        let mut st = self.lock();
        st.contexts.push(ctx);
        st.last_versions = Some(versions);
        let res = query.and_then(|q| st.select(rx, &q, as_json != 0));
        st.data(res)
    }

    unsafe fn delete_query(&self, rx: RawHandle, query: reindexer_buffer, ctx: reindexer_ctx_info) -> reindexer_ret {
        let query = buf_arg(query);
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = query.and_then(|q| st.modify_query("delete_query", rx, &q));
        st.data(res)
    }

    unsafe fn delete_query_tx(&self, rx: RawHandle, tx: RawHandle, query: reindexer_buffer) -> reindexer_ret {
        let query = buf_arg(query);
        let mut st = self.lock();
        let res = query.and_then(|q| st.query_tx("delete_query_tx", rx, tx, &q));
        st.data(res)
    }

    unsafe fn update_query(&self, rx: RawHandle, query: reindexer_buffer, ctx: reindexer_ctx_info) -> reindexer_ret {
        let query = buf_arg(query);
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = query.and_then(|q| st.modify_query("update_query", rx, &q));
        st.data(res)
    }

    unsafe fn update_query_tx(&self, rx: RawHandle, tx: RawHandle, query: reindexer_buffer) -> reindexer_ret {
        let query = buf_arg(query);
        let mut st = self.lock();
        let res = query.and_then(|q| st.query_tx("update_query_tx", rx, tx, &q));
        st.data(res)
    }

    unsafe fn cptr2cjson(&self, results: RawHandle, cptr: usize, ns_id: i32) -> reindexer_buffer {
        let mut st = self.lock();
        let bytes = match st.results.get(&results) {
            Some(entry) => entry
                .items
                .iter()
                .find(|(ptr, id, _)| *ptr == cptr && *id == ns_id)
                .map(|(_, _, bytes)| bytes.clone())
                .unwrap_or_default(),
            None => {
                st.misuse += 1;
                return reindexer_buffer::empty();
            }
        };
        st.track_cjson(&bytes)
    }

    unsafe fn free_cjson(&self, buffer: reindexer_buffer) {
        if buffer.data.is_null() {
            return;
        }
        let mut st = self.lock();
        if st.cjson.remove(&(buffer.data as usize)).is_none() {
            st.misuse += 1;
        }
    }

    unsafe fn free_buffer(&self, results: reindexer_resbuffer) {
        let mut st = self.lock();
        if st.results.remove(&results.results_ptr).is_some() {
            st.free_result_ids.insert(results.results_ptr);
        } else {
            st.misuse += 1;
        }
    }

    unsafe fn put_meta(
        &self,
        rx: RawHandle,
        ns: reindexer_string,
        key: reindexer_string,
        data: reindexer_string,
        ctx: reindexer_ctx_info,
    ) -> reindexer_error {
        let args = str_arg(ns).and_then(|ns| Ok((ns, str_arg(key)?, str_arg(data)?)));
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = args.and_then(|(ns, key, value)| st.put_meta(rx, &ns, &key, &value));
        st.status(res)
    }

    unsafe fn get_meta(&self, rx: RawHandle, ns: reindexer_string, key: reindexer_string, ctx: reindexer_ctx_info) -> reindexer_ret {
        let args = str_arg(ns).and_then(|ns| Ok((ns, str_arg(key)?)));
        let mut st = self.lock();
        st.contexts.push(ctx);
        let res = args.and_then(|(ns, key)| st.get_meta(rx, &ns, &key));
        st.data(res)
    }

    fn init_server(&self) -> RawHandle {
        let mut st = self.lock();
        let svc = st.handle();
        let behavior = st.server_behavior.clone();
        st.servers.insert(
            svc,
            ServerState {
                behavior,
                ..ServerState::default()
            },
        );
        svc
    }

    unsafe fn destroy_server(&self, svc: RawHandle) {
        let mut st = self.lock();
        match st.servers.remove(&svc) {
            Some(server) => {
                if server.running {
                    st.misuse += 1;
                }
                st.instances.retain(|_, i| i.server != Some(svc));
            }
            None => st.misuse += 1,
        }
    }

    unsafe fn start_server(&self, svc: RawHandle, yaml_config: reindexer_string) -> reindexer_error {
        let yaml = str_arg(yaml_config);
        let mut st = self.lock();
        let started = yaml.and_then(|yaml| {
            st.injected("start_server")?;
            let server = st.server(svc)?;
            if let ServerBehavior::FailStart { code, message } = &server.behavior {
                return Err(Fail::new(*code, message.clone()));
            }
            server.yaml = Some(yaml);
            server.running = true;
            Ok(match server.behavior {
                ServerBehavior::ReadyAfter(delay) => Some(Instant::now() + delay),
                _ => None,
            })
        });
        let ready_at = match started {
            Ok(at) => at,
            Err(f) => return st.status(Err(f)),
        };
        loop {
            let Some(server) = st.servers.get_mut(&svc) else {
                break;
            };
            if server.stop {
                server.running = false;
                server.ready = false;
                break;
            }
            let now = Instant::now();
            match ready_at {
                Some(at) if now >= at => {
                    server.ready = true;
                    self.server_cv.wait(&mut st);
                }
                Some(at) => {
                    self.server_cv.wait_for(&mut st, at - now);
                }
                None => self.server_cv.wait(&mut st),
            }
        }
        reindexer_error::ok()
    }

    unsafe fn stop_server(&self, svc: RawHandle) -> reindexer_error {
        let mut st = self.lock();
        let res = st.injected("stop_server").and_then(|()| {
            st.server(svc)?.stop = true;
            Ok(())
        });
        self.server_cv.notify_all();
        st.status(res)
    }

    unsafe fn check_server_ready(&self, svc: RawHandle) -> i32 {
        let mut st = self.lock();
        match st.servers.get(&svc) {
            Some(server) => i32::from(server.ready),
            None => {
                st.misuse += 1;
                0
            }
        }
    }

    unsafe fn get_instance(
        &self,
        svc: RawHandle,
        db_name: reindexer_string,
        _user: reindexer_string,
        _pass: reindexer_string,
        out_rx: *mut RawHandle,
    ) -> reindexer_error {
        let db = str_arg(db_name);
        let mut st = self.lock();
        match db.and_then(|db| st.get_instance(svc, &db)) {
            Ok(rx) => {
                if !out_rx.is_null() {
                    *out_rx = rx;
                }
                reindexer_error::ok()
            }
            Err(f) => st.status(Err(f)),
        }
    }

    unsafe fn free_error_text(&self, what: *const c_char) {
        if what.is_null() {
            return;
        }
        let mut st = self.lock();
        if st.error_texts.remove(&(what as usize)) {
            drop(CString::from_raw(what as *mut c_char));
        } else {
            st.misuse += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn s(v: &str) -> reindexer_string {
        reindexer_string {
            p: v.as_ptr() as *mut _,
            n: v.len() as i32,
            reserved: [0; 4],
        }
    }

    fn b(v: &[u8]) -> reindexer_buffer {
        reindexer_buffer {
            data: v.as_ptr() as *mut u8,
            len: v.len() as i32,
        }
    }

    const CTX: reindexer_ctx_info = reindexer_ctx_info {
        ctx_id: 1,
        exec_timeout: 0,
    };

    fn connected(engine: &MemoryEngine) -> RawHandle {
        let rx = engine.init();
        let err = unsafe { engine.connect(rx, s("/tmp/db"), ConnectOpts::default(), s("v2.14.1")) };
        assert_eq!(err.code, 0);
        rx
    }

    #[test]
    fn error_text_is_tracked_until_freed() {
        let engine = MemoryEngine::new();
        let rx = connected(&engine);
        let err = unsafe { engine.drop_namespace(rx, s("missing"), CTX) };
        assert_eq!(err.code, codes::NOT_FOUND);
        let text = unsafe { CStr::from_ptr(err.what) }.to_str().unwrap().to_string();
        assert_eq!(text, "Namespace 'missing' does not exist");
        assert_eq!(engine.live_error_texts(), 1);

        unsafe { engine.free_error_text(err.what) };
        assert_eq!(engine.live_error_texts(), 0);
        unsafe { engine.free_error_text(err.what) };
        assert_eq!(engine.misuse_count(), 1);
    }

    #[test]
    fn result_ids_are_reused() {
        let engine = MemoryEngine::new();
        let rx = connected(&engine);
        unsafe { engine.open_namespace(rx, s("items"), StorageOpts { options: 0b101 }, CTX) };

        let first = unsafe { engine.select_query(rx, b(b"SELECT * FROM items"), 0, std::ptr::null_mut(), 0, CTX) };
        assert_eq!(first.err_code, 0);
        unsafe { engine.free_buffer(first.out) };
        let second = unsafe { engine.select_query(rx, b(b"SELECT * FROM items"), 0, std::ptr::null_mut(), 0, CTX) };
        assert_eq!(second.out.results_ptr, first.out.results_ptr);
        unsafe { engine.free_buffer(second.out) };
        assert_eq!(engine.live_result_sets(), 0);
        assert_eq!(engine.misuse_count(), 0);
    }

    #[test]
    fn query_parser() {
        let q = parse_query(b"select * from items where name = 'bob'").unwrap();
        assert!(matches!(q.kind, QueryKind::Select));
        assert_eq!(q.ns, "items");
        assert_eq!(q.filter, Some(("name".to_string(), Value::from("bob"))));

        let q = parse_query(b"UPDATE items SET price=10 WHERE id = 2").unwrap();
        match q.kind {
            QueryKind::Update { field, value } => {
                assert_eq!(field, "price");
                assert_eq!(value, Value::from(10));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.filter, Some(("id".to_string(), Value::from(2))));

        assert!(parse_query(b"DELETE FROM").is_err());
        assert!(parse_query(b"SELECT id FROM items").is_err());
    }

    #[test]
    fn unknown_handles_count_as_misuse() {
        let engine = MemoryEngine::new();
        unsafe {
            engine.free_buffer(reindexer_resbuffer {
                results_ptr: 99,
                data: 0,
                len: 0,
            });
            engine.destroy(42);
        }
        assert_eq!(engine.misuse_count(), 2);
    }
}
