//! In-process kernel for tests.
//!
//! [`ScriptedKernel`] speaks the kernel protocol over channels instead of a
//! child process, so engine behaviour can be tested without an interpreter
//! installed. It runs a tiny line-oriented language:
//!
//! | Line | Effect |
//! |------|--------|
//! | `x = 1 + 2` | assign an integer expression |
//! | `x * 2` | evaluate; the last line produces an `execute_result` |
//! | `print("hi")`, `print(x)` | `stream` output, one line |
//! | `raise ValueError("boom")` | `error` output, stops the cell |
//! | `spin()` | block until interrupted, then raise `KeyboardInterrupt` |
//! | `stall()` | block forever, ignoring interrupts |
//! | `sleep(50)` | wait 50 ms |
//! | `late("text")` | emit a `stream` event after the cell reports idle |
//! | `exit()` | terminate the kernel without finishing the cell |

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio::task::AbortHandle;

use crate::error::Result;
use crate::kernel::protocol::KernelMessage;
use crate::kernel::{KernelConnection, KernelLauncher, KernelProcess};

/// Launcher for in-process scripted kernels.
#[derive(Debug, Default)]
pub struct ScriptedKernel {
    unresponsive: bool,
    launches: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl ScriptedKernel {
    /// A kernel that answers the readiness probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// A kernel that never reports ready.
    pub fn unresponsive() -> Self {
        Self {
            unresponsive: true,
            ..Self::default()
        }
    }

    /// Kernels launched so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Kernels launched and not yet terminated.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl KernelLauncher for ScriptedKernel {
    fn launch(&self) -> Result<KernelConnection> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let interrupt = Arc::new(Notify::new());

        self.launches.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());

        let task = tokio::spawn(serve(
            request_rx,
            event_tx,
            interrupt.clone(),
            self.unresponsive,
            guard,
        ));

        Ok(KernelConnection {
            requests: request_tx,
            events: event_rx,
            process: Box::new(ScriptedProcess {
                task: task.abort_handle(),
                interrupt,
            }),
        })
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedProcess {
    task: AbortHandle,
    interrupt: Arc<Notify>,
}

impl KernelProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn interrupt(&mut self) -> Result<()> {
        self.interrupt.notify_waiters();
        Ok(())
    }

    fn kill(&mut self) {
        self.task.abort();
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Events = mpsc::UnboundedSender<KernelMessage>;

fn emit(events: &Events, parent: Option<&str>, msg_type: &str, content: serde_json::Value) {
    let mut message = KernelMessage::request(msg_type, content);
    message.parent_header.msg_id = parent.map(str::to_string);
    let _ = events.send(message);
}

async fn serve(
    mut requests: mpsc::UnboundedReceiver<KernelMessage>,
    events: Events,
    interrupt: Arc<Notify>,
    unresponsive: bool,
    guard: LiveGuard,
) {
    let _guard = guard;
    let mut interpreter = Interpreter::default();

    // Unsolicited, like a real kernel announcing itself.
    emit(&events, None, "status", json!({ "execution_state": "starting" }));

    while let Some(request) = requests.recv().await {
        let parent = request.msg_id().to_string();
        match request.msg_type() {
            "kernel_info_request" if !unresponsive => {
                emit(&events, Some(&parent), "status", json!({ "execution_state": "busy" }));
                emit(
                    &events,
                    Some(&parent),
                    "kernel_info_reply",
                    json!({ "status": "ok", "implementation": "scripted" }),
                );
                emit(&events, Some(&parent), "status", json!({ "execution_state": "idle" }));
            }
            "execute_request" => {
                let code = request
                    .content
                    .get("code")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Flow::Exit = interpreter.execute(&code, &parent, &events, &interrupt).await {
                    return;
                }
            }
            "shutdown_request" => {
                emit(&events, Some(&parent), "shutdown_reply", json!({ "status": "ok" }));
                return;
            }
            _ => {}
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

enum Effect {
    Nothing,
    Print(String),
    Value(i64),
    Late(String),
    Exit,
}

struct Raised {
    ename: String,
    evalue: String,
}

impl Raised {
    fn new(ename: &str, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.to_string(),
            evalue: evalue.into(),
        }
    }

    fn syntax(line: &str) -> Self {
        Self::new("SyntaxError", format!("invalid syntax: {}", line))
    }
}

#[derive(Default)]
struct Interpreter {
    vars: FxHashMap<String, i64>,
    count: u32,
}

impl Interpreter {
    async fn execute(&mut self, code: &str, parent: &str, events: &Events, interrupt: &Notify) -> Flow {
        self.count += 1;
        let count = self.count;
        emit(events, Some(parent), "status", json!({ "execution_state": "busy" }));
        emit(
            events,
            Some(parent),
            "execute_input",
            json!({ "code": code, "execution_count": count }),
        );

        let lines: Vec<&str> = code
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        let mut late = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let is_last = i + 1 == lines.len();
            match self.step(line, is_last, interrupt).await {
                Ok(Effect::Nothing) => {}
                Ok(Effect::Print(text)) => emit(
                    events,
                    Some(parent),
                    "stream",
                    json!({ "name": "stdout", "text": text }),
                ),
                Ok(Effect::Value(value)) => emit(
                    events,
                    Some(parent),
                    "execute_result",
                    json!({
                        "execution_count": count,
                        "data": { "text/plain": value.to_string() },
                        "metadata": {},
                    }),
                ),
                Ok(Effect::Late(text)) => late.push(text),
                Ok(Effect::Exit) => return Flow::Exit,
                Err(raised) => {
                    emit(
                        events,
                        Some(parent),
                        "error",
                        json!({
                            "ename": raised.ename,
                            "evalue": raised.evalue,
                            "traceback": [format!("{}: {}", raised.ename, raised.evalue)],
                        }),
                    );
                    break;
                }
            }
        }

        emit(events, Some(parent), "status", json!({ "execution_state": "idle" }));
        for text in late {
            emit(
                events,
                Some(parent),
                "stream",
                json!({ "name": "stdout", "text": text }),
            );
        }
        Flow::Continue
    }

    async fn step(&mut self, line: &str, is_last: bool, interrupt: &Notify) -> std::result::Result<Effect, Raised> {
        if let Some(arg) = call_argument(line, "print") {
            let text = match unquote(arg) {
                Some(text) => text.to_string(),
                None => self.eval(arg)?.to_string(),
            };
            return Ok(Effect::Print(format!("{}\n", text)));
        }
        if let Some(rest) = line.strip_prefix("raise ") {
            let (ename, arg) = rest
                .split_once('(')
                .and_then(|(name, arg)| Some((name.trim(), arg.strip_suffix(')')?)))
                .ok_or_else(|| Raised::syntax(line))?;
            return Err(Raised::new(ename, unquote(arg.trim()).unwrap_or_default()));
        }
        if let Some(arg) = call_argument(line, "late") {
            let text = unquote(arg).ok_or_else(|| Raised::syntax(line))?;
            return Ok(Effect::Late(text.to_string()));
        }
        if let Some(arg) = call_argument(line, "sleep") {
            let millis = self.eval(arg)?.max(0) as u64;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            return Ok(Effect::Nothing);
        }
        match line {
            "spin()" => {
                interrupt.notified().await;
                return Err(Raised::new("KeyboardInterrupt", ""));
            }
            "stall()" => {
                std::future::pending::<()>().await;
                return Ok(Effect::Nothing);
            }
            "exit()" => return Ok(Effect::Exit),
            _ => {}
        }
        if let Some((name, expr)) = line.split_once('=') {
            let name = name.trim();
            if !is_identifier(name) || expr.starts_with('=') {
                return Err(Raised::syntax(line));
            }
            let value = self.eval(expr)?;
            self.vars.insert(name.to_string(), value);
            return Ok(Effect::Nothing);
        }

        let value = self.eval(line)?;
        Ok(if is_last {
            Effect::Value(value)
        } else {
            Effect::Nothing
        })
    }

    fn eval(&self, expr: &str) -> std::result::Result<i64, Raised> {
        let tokens = tokenize(expr).ok_or_else(|| Raised::syntax(expr))?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            vars: &self.vars,
        };
        let value = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(Raised::syntax(expr));
        }
        Ok(value)
    }
}

fn call_argument<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

fn unquote(arg: &str) -> Option<&str> {
    ['"', '\'']
        .into_iter()
        .find_map(|q| arg.strip_prefix(q)?.strip_suffix(q))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Name(String),
    Op(char),
    Open,
    Close,
}

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' => {
                let mut n: i64 = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    n = n.checked_mul(10)?.checked_add(i64::from(d))?;
                    chars.next();
                }
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek().filter(|c| c.is_ascii_alphanumeric() || **c == '_') {
                    name.push(c);
                    chars.next();
                }
                tokens.push(Token::Name(name));
            }
            '+' | '-' | '*' | '%' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '/' => {
                chars.next();
                // `//` and `/` both floor-divide integers.
                if chars.peek() == Some(&'/') {
                    chars.next();
                }
                tokens.push(Token::Op('/'));
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            _ => return None,
        }
    }
    Some(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: &'a FxHashMap<String, i64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> std::result::Result<i64, Raised> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' {
                value.checked_add(rhs)
            } else {
                value.checked_sub(rhs)
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<i64, Raised> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op != '*' && rhs == 0 {
                return Err(Raised::new("ZeroDivisionError", "division by zero"));
            }
            value = match op {
                '*' => value.checked_mul(rhs),
                '/' => Some(value.div_euclid(rhs)),
                _ => Some(value.rem_euclid(rhs)),
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn unary(&mut self) -> std::result::Result<i64, Raised> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return self.unary()?.checked_neg().ok_or_else(overflow);
        }
        self.atom()
    }

    fn atom(&mut self) -> std::result::Result<i64, Raised> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Name(name)) => self.vars.get(&name).copied().ok_or_else(|| {
                Raised::new("NameError", format!("name '{}' is not defined", name))
            }),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(Raised::syntax("unbalanced parenthesis")),
                }
            }
            _ => Err(Raised::syntax("unexpected end of expression")),
        }
    }
}

fn overflow() -> Raised {
    Raised::new("OverflowError", "integer overflow")
}
