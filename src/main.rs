use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;

use boson::backend::ninja;
use boson::frontend::{parser::Parser, SourceFile, SourceFileOrigin};
use boson::mir::passes::lower_project;
use boson::mir::state::Persistent;
use boson::mir::{ast_to_mir::lower_ast, lower::lower, ControlFlowGraph, InstructionKind, MessageLevel};
use boson::{Error, Result};

#[derive(Debug, ClapParser)]
#[command(version, about = "The boson build system", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Configure a build directory from a source tree
    Configure {
        /// The directory to generate build files into
        builddir: PathBuf,

        /// The directory holding the root meson.build
        #[arg(short = 'C', long = "source-dir", default_value = ".")]
        sourcedir: PathBuf,

        /// Print an intermediate form and exit
        #[arg(short = 'e', long, value_enum)]
        emit: Option<EmitFormat>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitFormat {
    #[value(name = "ast")]
    Ast,
    #[value(name = "mir")]
    Mir,
}

/// Print accumulated user messages grouped by level; returns whether any
/// were errors.
fn emit_messages(cfg: &ControlFlowGraph) -> bool {
    let mut errors = false;

    for level in [MessageLevel::Message, MessageLevel::Warn, MessageLevel::Error] {
        let heading = match level {
            MessageLevel::Message => "User messages:".bold(),
            MessageLevel::Warn => "Warnings:".yellow(),
            MessageLevel::Error => "Errors:".red(),
            MessageLevel::Debug => "Debug information:".bold(),
        };

        let mut printed_heading = false;
        for block in cfg.blocks.values() {
            for instruction in &block.instructions {
                let InstructionKind::Message(message) = &instruction.kind else {
                    continue;
                };
                if message.level != level {
                    continue;
                }
                if !printed_heading {
                    println!("{heading}");
                    printed_heading = true;
                }
                println!("{}{}", " *  ".bold(), message.message);
                if message.level == MessageLevel::Error {
                    errors = true;
                }
            }
        }
    }

    errors
}

fn configure(sourcedir: &Path, builddir: &Path, emit: Option<EmitFormat>) -> Result<()> {
    let sourcedir = sourcedir.canonicalize()?;
    let builddir = if builddir.is_absolute() {
        builddir.to_path_buf()
    } else {
        std::env::current_dir()?.join(builddir)
    };

    println!("{}", "The boson build system".bold());
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Source dir: {}", sourcedir.display().to_string().bold());
    println!("Build dir: {}", builddir.display().to_string().bold());

    let path = sourcedir.join("meson.build");
    let source = SourceFile {
        contents: std::fs::read_to_string(&path)?,
        origin: SourceFileOrigin::File(path),
    };

    let ast = Parser::parse_program(&source)?;
    if emit == Some(EmitFormat::Ast) {
        println!("{ast:#?}");
        return Ok(());
    }

    let mut pstate = Persistent::new(sourcedir, builddir);

    let mut cfg = lower_ast(&ast, Path::new(""))?;
    lower_project(&mut cfg, &mut pstate)?;
    lower(&mut cfg, &mut pstate)?;

    if emit == Some(EmitFormat::Mir) {
        print!("{}", cfg.dump());
        return Ok(());
    }

    if emit_messages(&cfg) {
        return Err(Error::meson("Configure failed with errors."));
    }

    ninja::generate(&cfg, &pstate)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = match &args.command {
        Command::Configure {
            builddir,
            sourcedir,
            emit,
        } => configure(sourcedir, builddir, *emit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {error}", "boson error:".red());
            ExitCode::FAILURE
        }
    }
}
