use std::process;

use clap::Parser as ClapParser;

use heap::HeapSettings;
use sable::demos::{self, DEMOS};
use sable::{Vm, VmSettings};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bundled programs to run, in order
    #[arg(help = "Demo names (see --list)")]
    demos: Vec<String>,

    /// List bundled demos
    #[arg(long)]
    list: bool,

    /// Print bytecode and constants instead of executing
    #[arg(long, help = "Dump bytecode + constant pool for inputs")]
    dump_bytecode: bool,

    /// Collect at every allocation
    #[arg(long)]
    gc_stress: bool,

    /// Maximum call depth
    #[arg(long, default_value_t = VmSettings::default().max_frames)]
    max_frames: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list || cli.demos.is_empty() {
        for demo in DEMOS {
            println!("{:<12} {}", demo.name, demo.about);
        }
        return;
    }

    let settings = VmSettings {
        max_frames: cli.max_frames,
        heap: HeapSettings {
            stress: cli.gc_stress,
            ..HeapSettings::default()
        },
    };
    let mut vm = match Vm::new(settings) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Error starting VM: {err}");
            process::exit(1);
        }
    };

    for name in &cli.demos {
        let Some(demo) = demos::find(name) else {
            eprintln!("Unknown demo '{name}', try --list");
            process::exit(1);
        };
        let chunk = match (demo.build)(&mut vm) {
            Ok(chunk) => chunk,
            Err(err) => {
                eprintln!("Error assembling {name}: {err}");
                process::exit(1);
            }
        };

        if cli.dump_bytecode {
            print!("{}", vm.disassemble(&chunk));
            continue;
        }
        // The VM has already reported the error on stderr.
        if vm.interpret(chunk).is_err() {
            process::exit(1);
        }
    }

    let stats = vm.collect();
    log::debug!(
        "final collection: {} freed, {} finalized, {} live",
        stats.freed,
        stats.finalized,
        vm.heap().live_objects()
    );
}
