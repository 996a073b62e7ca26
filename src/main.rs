use std::fs;
use std::path::{Path, PathBuf};

use biokernel::EvalConfig;
use biokernel::Failure;
use biokernel::Lexer;
use biokernel::eval::DEFAULT_STEP_BUDGET;
use biokernel::lex::SingleTokenError;
use biokernel::lex::StringTerminationError;
use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Log checker and evaluator activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Tokenize {
        filename: PathBuf,
    },
    Parse {
        filename: PathBuf,
    },
    /// Type check a program and print its type
    Check {
        filename: PathBuf,
    },
    /// Type check and evaluate a program
    Run {
        filename: PathBuf,

        /// Maximum number of reduction steps
        #[arg(long, env = "BIOKERNEL_STEP_BUDGET", default_value_t = DEFAULT_STEP_BUDGET)]
        step_budget: u64,

        /// Re-check the type of the program after every reduction step
        #[arg(long)]
        audit: bool,
    },
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

fn fail(failure: Failure) -> ! {
    let code = failure.exit_code();
    eprintln!("{:?}", failure.into_report());
    std::process::exit(code);
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("biokernel=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;

            for token in Lexer::new(filename.to_str(), &file_contents) {
                let token = match token {
                    Ok(token) => token,
                    Err(e) => {
                        if let Some(single_token_error) = e.downcast_ref::<SingleTokenError>() {
                            eprintln!(
                                "[line {}] Error: Unexpected character: {}",
                                single_token_error.line(),
                                single_token_error.token
                            );
                        } else if let Some(string_termination_error) =
                            e.downcast_ref::<StringTerminationError>()
                        {
                            eprintln!(
                                "[line {}] Error: Unterminated string",
                                string_termination_error.line()
                            );
                        }
                        fail(Failure::Parse(e));
                    }
                };
                println!("{token}");
            }
            println!("EOF  null");
        }
        Commands::Parse { filename } => {
            let file_contents = read(&filename)?;
            match biokernel::parse(filename.to_str(), &file_contents) {
                Ok(program) => print!("{program}"),
                Err(e) => fail(Failure::Parse(e)),
            }
        }
        Commands::Check { filename } => {
            let file_contents = read(&filename)?;
            match biokernel::typecheck(filename.to_str(), &file_contents) {
                Ok(program) => println!("{}", program.ty),
                Err(failure) => fail(failure),
            }
        }
        Commands::Run {
            filename,
            step_budget,
            audit,
        } => {
            let file_contents = read(&filename)?;
            let program = match biokernel::typecheck(filename.to_str(), &file_contents) {
                Ok(program) => program,
                Err(failure) => fail(failure),
            };
            info!(ty = %program.ty, "program checked");
            let config = EvalConfig {
                step_budget,
                audit_preservation: audit,
            };
            match biokernel::run(&program, config) {
                Ok(value) => println!("{value}"),
                Err(e) => fail(Failure::Runtime(e)),
            }
        }
    }
    Ok(())
}
