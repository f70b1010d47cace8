use clap::Parser as ClapParser;
use std::{process, time::Duration};

use talc::demos::{self, DEMOS, Demo};
use talc::{HeapCreateInfo, Runtime, RuntimeCreateInfo, RuntimeError, Scheduler, SchedulerSettings};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Demo programs to run, in order
    #[arg(required = false, help = "Demos to run (default: all default demos)")]
    demos: Vec<String>,

    #[arg(long, help = "List the available demos and exit")]
    list: bool,

    #[arg(long, help = "Print bytecode instead of running")]
    disassemble: bool,

    /// Preemption interval; 0 disables the timer unit
    #[arg(long, default_value_t = 10, help = "Time slice in milliseconds")]
    time_slice_ms: u64,

    #[arg(long, help = "Capacity of each heap arena in words")]
    arena_words: Option<usize>,

    #[arg(long, help = "Log filter, overrides RUST_LOG")]
    log_level: Option<String>,

    #[arg(long, short, help = "Do not echo the Transcript")]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = &cli.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    if cli.list {
        for demo in DEMOS {
            let marker = if demo.by_default { ' ' } else { '*' };
            println!("{marker} {:<12} {}", demo.name, demo.about);
        }
        return;
    }

    let selected: Vec<&Demo> = if cli.demos.is_empty() {
        DEMOS.iter().filter(|d| d.by_default).collect()
    } else {
        cli.demos
            .iter()
            .map(|name| {
                demos::find(name).unwrap_or_else(|| {
                    eprintln!("Unknown demo '{name}', try --list");
                    process::exit(1);
                })
            })
            .collect()
    };

    for demo in selected {
        if let Err(err) = run_demo(&cli, demo) {
            eprintln!("Error in demo {}: {err}", demo.name);
            process::exit(1);
        }
    }
}

fn run_demo(cli: &Cli, demo: &Demo) -> Result<(), RuntimeError> {
    let runtime = Runtime::new(RuntimeCreateInfo {
        heap: HeapCreateInfo {
            arena_words: cli.arena_words,
            ..Default::default()
        },
        echo_transcript: !cli.quiet,
    })?;
    println!("== {} ==", demo.name);

    let program = (demo.program)();
    if cli.disassemble {
        print!("{}", program.disassemble(&runtime)?);
        return Ok(());
    }

    let time_slice = (cli.time_slice_ms > 0).then(|| Duration::from_millis(cli.time_slice_ms));
    let mut scheduler = Scheduler::new(runtime, SchedulerSettings { time_slice });
    let ids = program.load(&mut scheduler)?;
    scheduler.run()?;

    for id in ids {
        if let Some(value) = scheduler.result_of(id) {
            println!("=> {}", scheduler.runtime().print_string(value));
        }
    }
    let stats = scheduler.runtime().heap.stats();
    log::debug!(
        "{} objects allocated, {} collections",
        stats.allocated_objects,
        stats.collections
    );
    Ok(())
}
