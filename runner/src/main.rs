mod backend;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use reedline::{DefaultPrompt, Reedline, Signal};
use tracing_subscriber::EnvFilter;
use wasmpl::{Answer, Config, Error, GuestModule, Prolog, QueryOptions, Term};

use backend::Backend;

// ── Command line ──

#[derive(Parser, Debug)]
#[command(name = "wasmpl", version, about = "Prolog REPL on a sandboxed WebAssembly engine")]
struct Cli {
    /// Engine module (.wasm); defaults to $WASMPL_MODULE or ./tpl.wasm
    #[arg(long, value_name = "WASM")]
    module: Option<PathBuf>,

    /// Guest-side library directory passed to the engine
    #[arg(long, value_name = "DIR")]
    library: Option<String>,

    /// Expose a host directory to the guest, e.g. --map-dir /data=./data
    #[arg(long = "map-dir", value_name = "ALIAS=DIR", value_parser = parse_map_dir)]
    map_dir: Vec<(String, PathBuf)>,

    /// Host directory exposed to the guest as /
    #[arg(long, value_name = "DIR")]
    preopen: Option<PathBuf>,

    /// Run the engine with tracing enabled
    #[arg(long)]
    trace: bool,

    /// Suppress engine warnings
    #[arg(long)]
    quiet: bool,

    /// Compute backend for :compute predicates
    #[arg(long, env = "WASMPL_COMPUTE_ADDR", value_name = "HOST:PORT")]
    compute: Option<String>,

    /// Give up on a query after this long (checked between answers)
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Stop listing answers after this many
    #[arg(long, default_value_t = 10)]
    max_solutions: usize,

    /// Print answers as JSON
    #[arg(long)]
    json: bool,
}

fn parse_map_dir(arg: &str) -> std::result::Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((alias, dir)) if !alias.is_empty() && !dir.is_empty() => {
            Ok((alias.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected ALIAS=DIR, got {:?}", arg)),
    }
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::new()
            .trace(self.trace)
            .quiet(self.quiet)
            .stdout_sink(|s| print!("{}", s))
            .stderr_sink(|s| eprint!("{}", s));
        if let Some(path) = &self.module {
            config = config.module(GuestModule::from_file(path)?);
        }
        if let Some(lib) = &self.library {
            config = config.library_path(lib.clone());
        }
        if let Some(dir) = &self.preopen {
            config = config.preopen_dir(dir);
        }
        for (alias, dir) in &self.map_dir {
            config = config.map_dir(alias.clone(), dir);
        }
        Ok(config)
    }
}

// ── REPL ──

struct Settings {
    timeout: Option<Duration>,
    max_solutions: usize,
    json: bool,
}

enum Step {
    Continue(Vec<String>),
    Quit,
}

struct Repl {
    /// Engine stack: `:fork` pushes a clone, `:unfork` pops back.
    engines: Vec<Prolog>,
    backend: Arc<Mutex<Backend>>,
    settings: Settings,
}

impl Repl {
    fn new(engine: Prolog, backend: Backend, settings: Settings) -> Self {
        Repl {
            engines: vec![engine],
            backend: Arc::new(Mutex::new(backend)),
            settings,
        }
    }

    fn current(&self) -> &Prolog {
        // never empty: :unfork keeps the root engine
        &self.engines[self.engines.len() - 1]
    }

    fn execute(&mut self, input: &str) -> Step {
        let input = input.trim();
        if input.is_empty() {
            return Step::Continue(Vec::new());
        }

        let lines = match input {
            ":quit" | ":q" => return Step::Quit,
            ":help" | ":h" => help(),
            ":backend" | ":b" => {
                let backend = self.backend.lock();
                match backend.addr() {
                    Some(addr) => {
                        let status = if backend.is_connected() {
                            "connected"
                        } else {
                            "not connected (lazy)"
                        };
                        vec![format!("[Backend] {} ({})", addr, status)]
                    }
                    None => vec!["[Backend] Not configured".to_string()],
                }
            }
            ":fork" => match self.current().clone_instance() {
                Ok(engine) => {
                    self.engines.push(engine);
                    vec![format!("[Fork] now on engine #{}", self.engines.len() - 1)]
                }
                Err(e) => vec![format!("[Host Error] {}", e)],
            },
            ":unfork" => {
                if self.engines.len() > 1 {
                    self.engines.pop();
                    vec![format!("[Fork] back to engine #{}", self.engines.len() - 1)]
                } else {
                    vec!["[Host] Not in a fork".to_string()]
                }
            }
            ":stats" => {
                let stats = self.current().stats();
                vec![format!(
                    "[Stats] engine #{}: {} bytes of linear memory",
                    self.engines.len() - 1,
                    stats.memory_size
                )]
            }
            _ => self.command(input),
        };
        Step::Continue(lines)
    }

    fn command(&mut self, input: &str) -> Vec<String> {
        if let Some(path) = input.strip_prefix(":consult ") {
            let path = path.trim();
            match self.current().consult(path) {
                Ok(()) => vec![format!("[Consult] {} loaded.", path)],
                Err(e) => vec![format!("[Error] {}", e)],
            }
        } else if let Some(clause) = input.strip_prefix(":assert ") {
            let clause = clause.trim().trim_end_matches('.');
            if clause.is_empty() {
                return vec!["[Host] Usage: :assert <clause>".to_string()];
            }
            match self.current().consult_text("user", &format!("{}.\n", clause)) {
                Ok(()) => vec!["[Assert] ok.".to_string()],
                Err(e) => vec![format!("[Error] {}", e)],
            }
        } else if let Some(spec) = input.strip_prefix(":compute ") {
            self.compute(spec.trim())
        } else if let Some(addr) = input.strip_prefix(":backend ") {
            let addr = addr.trim();
            self.backend.lock().set_addr(addr);
            vec![format!("[Backend] Set to {} (connects on first use)", addr)]
        } else if input.starts_with(':') {
            vec![format!("[Host] Unknown command {}; try :help", input)]
        } else {
            self.query(input)
        }
    }

    /// Register `name/arity` as a predicate answered by the compute backend.
    fn compute(&mut self, spec: &str) -> Vec<String> {
        let Some((name, arity)) = spec
            .rsplit_once('/')
            .and_then(|(n, a)| Some((n.trim(), a.trim().parse::<usize>().ok()?)))
            .filter(|(n, _)| !n.is_empty())
        else {
            return vec!["[Host] Usage: :compute <name>/<arity>".to_string()];
        };
        let backend = self.backend.clone();
        let registered = self.current().register(name, arity, move |_, goal| {
            let name = goal.name().map(|n| n.as_str()).unwrap_or_default();
            let outcome = backend.lock().dispatch(name, goal.args());
            backend::reply_for(goal, outcome)
        });
        match registered {
            Ok(()) => vec![format!("[Compute] Registered {}/{} for external dispatch", name, arity)],
            Err(e) => vec![format!("[Host Error] {}", e)],
        }
    }

    fn query(&mut self, goal: &str) -> Vec<String> {
        let mut options = QueryOptions::new();
        if let Some(timeout) = self.settings.timeout {
            options = options.timeout(timeout);
        }
        let mut lines = Vec::new();
        let mut found = 0;
        for answer in self.current().query_with(goal, options) {
            match answer {
                Ok(answer) => {
                    found += 1;
                    lines.push(self.format_answer(&answer));
                    if found == self.settings.max_solutions {
                        lines.push(format!("[Query] stopped after {} answers", found));
                        break;
                    }
                }
                Err(e) => {
                    lines.push(format_error(&e));
                    return lines;
                }
            }
        }
        if found == 0 {
            lines.push("[Query] false.".to_string());
        }
        lines
    }

    fn format_answer(&self, answer: &Answer) -> String {
        if self.settings.json {
            return serde_json::to_string(&answer.solution)
                .unwrap_or_else(|e| format!("[Host Error] {}", e));
        }
        if answer.solution.is_empty() {
            return "[Answer] true.".to_string();
        }
        let parts: Vec<String> = answer
            .solution
            .iter()
            .map(|(name, value)| format_binding(name, value))
            .collect();
        format!("[Answer] {}", parts.join(", "))
    }
}

fn format_binding(name: &str, value: &Term) -> String {
    match value.as_variable() {
        Some(var) if !var.attrs.is_empty() => {
            let goals: Vec<String> = var.attrs.iter().map(|g| g.to_string()).collect();
            format!("{} = {} {{{}}}", name, value, goals.join(", "))
        }
        _ => format!("{} = {}", name, value),
    }
}

fn format_error(e: &Error) -> String {
    match e {
        Error::Thrown { ball, .. } => format!("[Error] uncaught exception: {}", ball),
        Error::Cancelled => "[Error] query timed out".to_string(),
        other => format!("[Host Error] {}", other),
    }
}

fn help() -> Vec<String> {
    [
        "  <goal>                 Run a query, e.g. member(X, [1,2,3])",
        "  :consult <file>        Load a file (guest path)",
        "  :assert <clause>       Add a clause to module user",
        "  :compute <name>/<ar>   Answer name/ar through the compute backend",
        "  :backend [host:port]   Show or set compute backend address",
        "  :fork                  Continue on a clone of the current engine",
        "  :unfork                Drop the clone and return to the previous engine",
        "  :stats                 Show engine memory usage",
        "  :quit                  Exit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    println!("==================================================");
    println!(" wasmpl - Prolog on WebAssembly                   ");
    println!("==================================================");

    match &cli.compute {
        Some(addr) => println!("Compute backend: {}", addr),
        None => println!("Compute backend: none (set WASMPL_COMPUTE_ADDR=host:port or use :backend)"),
    }

    println!("Loading engine...");
    let engine = Prolog::new(cli.config()?)?;
    let settings = Settings {
        timeout: cli.timeout_ms.map(Duration::from_millis),
        max_solutions: cli.max_solutions.max(1),
        json: cli.json,
    };
    let mut repl = Repl::new(engine, Backend::new(cli.compute.clone()), settings);

    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::default();

    println!("Ready. Commands: :consult :assert :compute :backend :fork :unfork :stats :help :quit\n");

    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => match repl.execute(&buffer) {
                Step::Continue(lines) => {
                    for line in lines {
                        println!("{}", line);
                    }
                }
                Step::Quit => break,
            },
            Ok(Signal::CtrlD) | Ok(Signal::CtrlC) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    for engine in repl.engines.drain(..).rev() {
        engine.close();
    }
    Ok(())
}
