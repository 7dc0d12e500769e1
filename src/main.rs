use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use stepwise::interpreter::ExecutionState;
use stepwise::{
    Interpreter, InterpreterOptions, build_call_tree, build_cfg, mark_executed_cfg_nodes,
    parse_ast,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    Summary,
    Snapshots,
    Cfg,
    Ast,
    CallTree,
}

impl Emit {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "summary" => Self::Summary,
            "snapshots" => Self::Snapshots,
            "cfg" => Self::Cfg,
            "ast" => Self::Ast,
            "calltree" => Self::CallTree,
            other => bail!(
                "Unknown output '{other}' (expected summary, snapshots, cfg, ast or calltree)"
            ),
        })
    }
}

struct Args {
    emit: Emit,
    config: Option<PathBuf>,
    max_steps: Option<usize>,
    input: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        emit: Emit::Summary,
        config: None,
        max_steps: None,
        input: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--emit" | "-e" => {
                let name = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing output kind after {arg}"))?;
                parsed.emit = Emit::parse(&name)?;
            }
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing config path after {arg}"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--max-steps" => {
                let raw = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing step count after {arg}"))?;
                let steps = raw
                    .parse()
                    .with_context(|| format!("Invalid step count '{raw}'"))?;
                parsed.max_steps = Some(steps);
            }
            _ => {
                parsed.input = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }
    Ok(parsed)
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = parse_args()?;

    let mut options = match &args.config {
        Some(path) => InterpreterOptions::load(path)?,
        None => InterpreterOptions::default(),
    };
    if let Some(max_steps) = args.max_steps {
        options.max_steps = max_steps;
        options.validate()?;
    }

    let source = if let Some(path) = &args.input {
        fs::read_to_string(path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    match args.emit {
        Emit::Ast => {
            let tree = parse_ast(&source)?;
            print!("{}", serde_yaml::to_string(&tree)?);
        }
        Emit::Summary => print_summary(&run(&source, options)?)?,
        Emit::Snapshots => {
            let states = run(&source, options)?;
            print!("{}", serde_yaml::to_string(&states)?);
        }
        Emit::Cfg => {
            let graph = build_cfg(&source)?;
            let marked = mark_executed_cfg_nodes(&graph, &run(&source, options)?);
            print!("{}", serde_yaml::to_string(&marked)?);
        }
        Emit::CallTree => {
            let tree = build_call_tree(&run(&source, options)?);
            print!("{}", serde_yaml::to_string(&tree)?);
        }
    }
    Ok(())
}

fn run(source: &str, options: InterpreterOptions) -> Result<Vec<ExecutionState>> {
    let mut interpreter = Interpreter::with_options(options);
    interpreter.parse(source)?;
    Ok(interpreter.run())
}

/// Console output, then the final globals; fails if the run ended in an error.
fn print_summary(states: &[ExecutionState]) -> Result<()> {
    let Some(last) = states.last() else {
        return Ok(());
    };
    for entry in last.output.iter() {
        println!("{}", entry.text());
    }
    println!("--- {} steps", states.len());
    for (name, variable) in &last.global_variables {
        println!("{name} = {}", variable.value);
    }
    if let Some(error) = &last.error_state {
        bail!(
            "{}: {} (line {}, column {})",
            error.name,
            error.message,
            error.line,
            error.column
        );
    }
    Ok(())
}
