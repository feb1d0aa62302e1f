use std::{env, fs, path::Path, process};

use minuet::bytecode::Program;
use minuet::lang::ast::{Expr, Operator, SourceBuilder, SourceUnit, Stmt};
use minuet::runtime::{Engine, EngineConfig, NativeRegistry};

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging() {
    let level = env::var("MINUET_LOG")
        .ok()
        .and_then(|v| v.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Warn);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let dump = args.contains(&"--dump".to_string());
    let config = match engine_config(&args) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            process::exit(1);
        }
    };

    // first non-flag argument that is not a flag value is the image path
    let filename = positional(&args);

    let program = match filename {
        Some(filename) => load_image(filename),
        None => demo_program(),
    };

    if dump {
        print!("{}", program);
        return;
    }

    let mut vm = Engine::new(config, program);
    let status = vm.run();
    if let Some(result) = vm.register(0) {
        println!("main returned {}", result);
    }
    if !status.is_ok() {
        eprintln!("Run failed: {}", status);
    }
    process::exit(status.code());
}

const VALUE_FLAGS: [&str; 4] = ["--registers", "--stack", "--depth", "--steps"];

fn positional(args: &[String]) -> Option<&String> {
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
        } else if !arg.starts_with('-') {
            return Some(arg);
        }
    }
    None
}

fn flag_value(args: &[String], flag: &str) -> Result<Option<usize>, String> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let raw = args
        .get(pos + 1)
        .ok_or_else(|| format!("{} expects a number", flag))?;
    raw.parse::<usize>()
        .map(Some)
        .map_err(|_| format!("{} expects a number, got '{}'", flag, raw))
}

fn engine_config(args: &[String]) -> Result<EngineConfig, String> {
    let mut config = EngineConfig::default();
    if let Some(n) = flag_value(args, "--registers")? {
        config.register_file_limit = n;
    }
    if let Some(n) = flag_value(args, "--stack")? {
        config.operand_stack_limit = n;
    }
    if let Some(n) = flag_value(args, "--depth")? {
        config.max_call_depth = n;
    }
    config.max_steps = flag_value(args, "--steps")?;
    Ok(config)
}

fn load_image(filename: &str) -> Program {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("mnb") {
        eprintln!("Error: expected a .mnb image, got {}", filename);
        process::exit(1);
    }

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };

    match Program::from_bytes(&bytes) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

/// `main() { x = 2 + 3 * 4; if (x < 20) { return 0; } return x; }`
fn demo_program() -> Program {
    let mut src = SourceBuilder::new();
    let main_name = src.ident("main");
    let x = src.ident("x");
    let two = src.int(2);
    let three = src.int(3);
    let four = src.int(4);
    let init = Expr::binary(Operator::Add, two, Expr::binary(Operator::Mul, three, four));
    let lhs = src.name("x");
    let twenty = src.int(20);
    let cond = Expr::binary(Operator::Lesser, lhs, twenty);
    let zero = src.int(0);
    let fallback = src.name("x");

    let body = vec![
        Stmt::LocalDef { name: x, init },
        Stmt::If {
            cond,
            then_body: Box::new(Stmt::Block(vec![Stmt::Return(zero)])),
            else_body: None,
        },
        Stmt::Return(fallback),
    ];
    let main = Stmt::Function {
        name: main_name,
        params: Vec::new(),
        body: Box::new(Stmt::Block(body)),
    };

    let sources = vec![src.finish()];
    let forest: Vec<SourceUnit> = vec![(main, 0)];

    let mut ir = match minuet::lower(&forest, &sources, &NativeRegistry::standard()) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    minuet::condense(&mut ir);

    match minuet::emit(&ir) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("MINUET - register bytecode compiler core and VM");
    println!();
    println!("Usage:");
    println!("  minuet                     Compile and run the built-in demo");
    println!("  minuet <image.mnb>         Run a bytecode image");
    println!("  minuet --dump [image.mnb]  Print the instruction listing");
    println!("  --registers N              Register file size");
    println!("  --stack N                  Operand stack size");
    println!("  --depth N                  Maximum call depth");
    println!("  --steps N                  Stop after N instructions");
    println!("  --help, -h                 Show this help");
    println!();
    println!("Set MINUET_LOG=trace|debug|info|warn|error for diagnostics.");
}
